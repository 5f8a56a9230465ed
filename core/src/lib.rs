pub mod backoff;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod telemetry;

pub use config::{Config, StorageConfig};
pub use endpoint::{Credentials, Endpoint, ResponseFormat};
pub use error::{Error, Result};
