pub mod aggregator;
pub mod ring;

pub use aggregator::{Aggregator, EpochBarrier};
pub use ring::{merge_window, Ring};
