pub mod config;
pub mod dashboard;
pub mod error;
pub mod lease;
pub mod shutdown;
pub mod supervisor;
pub mod worker;

pub use error::{FarmError, Result};
