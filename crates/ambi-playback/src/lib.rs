//! Plays one extracted binary against a wall-clock-anchored virtual video
//! clock, firing one UDP datagram per frame as its timestamp elapses.
//!
//! The engine is commanded from the orchestrator (start / pause / resume /
//! sync_to / stop); commands never block for more than a short critical
//! section, and the run loop keeps all file and socket i/o outside that
//! section.

mod engine;
mod sink;

pub use engine::{CatchupMode, EngineControl, EngineStatus, PlaybackEngine, PlaybackOptions};
pub use sink::{FrameSink, UdpFrameSink};
