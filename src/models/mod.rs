pub mod proxy;
pub mod thresholds;

pub use proxy::*;
pub use thresholds::*;
