pub mod logging;
pub mod unique;

pub use logging::{JsonLogger, Logger, NullLogger, PrintLogger};
pub use unique::Unique;
