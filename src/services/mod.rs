//! Services kept apart from the matting pipeline itself
//!
//! - Image I/O: decoding inputs and writing PNG results
//! - Progress reporting: stage updates for frontends

pub mod io;
pub mod progress;

pub use io::ImageIOService;
pub use progress::{
    ConsoleProgressReporter, ProcessingStage, ProgressReporter, ProgressTracker, ProgressUpdate,
};
