pub mod config;
pub mod deployments;
pub mod error;
pub mod forward;
pub mod logging;
pub mod payload;
pub mod pipeline;
pub mod server;

pub use config::{AzureConfig, ConfigSource, RelayConfig};
pub use deployments::Deployment;
pub use error::{RelayError, Result};
pub use forward::{Forwarded, Forwarder, LineStream};
pub use logging::SharedLogger;
pub use pipeline::{AzurePipeline, PipeOutput};
pub use server::{build_router, AppState};
