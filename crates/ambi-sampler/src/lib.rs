//! Converts decoded RGB24 frames into LED payloads.
//!
//! One LED strip runs around the screen; each LED owns a rectangle of
//! border pixels and takes their average color. The emitted sequence is
//! clockwise starting at the top-right corner (right → bottom → left → top),
//! rotated so index 0 lands on the physical first LED, optionally tinted and
//! projected to RGBW.

mod geometry;
mod sampler;
mod tint;

pub use geometry::StripGeometry;
pub use sampler::{BorderSampler, SamplerError, DEFAULT_BORDER_FRACTION};
pub use tint::TintFilter;
