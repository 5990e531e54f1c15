pub mod elastic;
pub mod error;

pub use error::TargetError;

use async_trait::async_trait;
use pgsync_config::AdapterConfig;
use pgsync_models::{DeleteRow, DocumentRow, Index};
use std::sync::Arc;

/// A document target. Each mutation call maps to a single bulk request;
/// write failures are logged and dropped, never retried here. The next
/// event for the same reference rewrites the document.
#[async_trait]
pub trait TargetAdapter: Send + Sync {
    /// Adapter instance name from the configuration.
    fn name(&self) -> &str;

    /// Creates indices that carry settings or mappings, if absent.
    async fn prepare(&self, indices: &[Arc<Index>]) -> Result<(), TargetError>;

    async fn insert(&self, rows: &[DocumentRow]);
    async fn update(&self, rows: &[DocumentRow]);
    async fn delete(&self, rows: &[DeleteRow]);
}

/// Instantiates the adapter a config entry names.
pub async fn build_target(
    name: &str,
    config: &AdapterConfig,
) -> Result<Arc<dyn TargetAdapter>, TargetError> {
    match config.driver.as_str() {
        "elastic" => {
            let target = elastic::ElasticTarget::connect(name, &config.options).await?;
            Ok(Arc::new(target))
        }
        other => Err(TargetError::UnknownDriver(other.to_string())),
    }
}
