pub mod config;
pub mod error;
pub mod types;

pub use config::AiepConfig;
pub use error::{AiepError, Result};
pub use types::*;
