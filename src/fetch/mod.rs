//! Cache-miss index fetch pipeline / 缓存未命中时的索引拉取流水线
//!
//! probe -> gate -> head -> (download || extract) -> promote

pub mod coordinator;
pub mod downloader;
pub mod error;
pub mod extract;
pub mod gate;
pub mod pipe;
pub mod probe;
pub mod timings;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{Deadlines, FetchCoordinator, FetchOptions, FetchReport, PipelineOutcome};
pub use error::{FetchError, Stage};
pub use probe::{probe, CacheState, CacheStatus};
pub use timings::StageTimings;
