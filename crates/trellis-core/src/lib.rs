pub mod config;
pub mod error;
pub mod store;
pub mod traits;
pub mod types;

pub use config::{ModelConfig, RetryConfig};
pub use error::{Result, TrellisError, ValidationError};
pub use store::ContextStore;
pub use types::*;
