pub mod writer;

pub use writer::Writer;

use crate::types::{LatestEntry, Snapshot};

/// Everything the aggregator hands off to the persister.
#[derive(Debug)]
pub enum PersistMsg {
    Minute(Snapshot),
    Latest(LatestEntry),
}
