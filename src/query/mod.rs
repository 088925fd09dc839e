pub mod duration;
pub mod merger;

pub use duration::parse_duration;
pub use merger::QueryMerger;
