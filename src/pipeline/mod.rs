pub mod mode;

pub use mode::{Mode, ModeManager};
