//! The offline half of the pipeline: decode one video with ffmpeg at a
//! chosen rate, run the border sampler over every frame, and write the
//! result through the codec.

mod extract;
mod probe;

pub use extract::{extract_item, ExtractError, ExtractOptions, ExtractReport, FpsMode};
pub use probe::probe_fps;
