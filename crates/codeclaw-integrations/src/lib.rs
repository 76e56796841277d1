pub mod http;
pub mod local;
pub mod traits;

pub use http::{classify_status, HttpPublisher};
pub use local::{safe_project_name, DirectoryPublisher};
pub use traits::{PublishError, PushReceipt, Publisher};

use codeclaw_storage::PublisherConfig;
use std::sync::Arc;

/// Publisher for the configured destination: `file://` endpoints write into a
/// local checkout, anything else goes to the dataset host over HTTP.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be created
pub fn publisher_for(config: &PublisherConfig) -> anyhow::Result<Arc<dyn Publisher>> {
    if config.endpoint.starts_with("file://") {
        return Ok(Arc::new(DirectoryPublisher::from_endpoint(&config.endpoint)));
    }
    Ok(Arc::new(HttpPublisher::new(
        &config.endpoint,
        config.repo.clone(),
        config.api_key.clone(),
    )?))
}
