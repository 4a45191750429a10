//! Ordered playback: the output device and the scheduler that feeds it.

pub mod output;
pub mod scheduler;

pub use output::{AudioOutput, RodioOutput};
pub use scheduler::{PlaybackOutcome, PlaybackQueue, PlaybackScheduler, SchedulerEvent};
