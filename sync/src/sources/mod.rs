pub mod error;
pub mod postgres;

pub use error::SourceError;

use async_trait::async_trait;
use futures::stream::BoxStream;
use pgsync_config::AdapterConfig;
use pgsync_models::{Event, Index, Record, RelationId, RelationUpdateEvent};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Records stream out page by page; a failed page is logged and ends the
/// stream early rather than tearing anything down.
pub type RecordStream = BoxStream<'static, Record>;

/// A relational source: installs its change triggers, turns notifications
/// into [`Event`]s and materialises documents for an index.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Adapter instance name from the configuration.
    fn name(&self) -> &str;

    /// Idempotently (re)installs the trigger schema for every index.
    async fn install_triggers(&self, indices: &[Arc<Index>]) -> Result<(), SourceError>;

    /// Blocks on the notification channel, forwarding parsed events until
    /// the receiver goes away. A connection failure is fatal.
    async fn listen(&self, events: mpsc::Sender<Event>) -> Result<(), SourceError>;

    /// Every currently-matching root row, for the bulk reindex path.
    async fn scan_all(&self, index: Arc<Index>) -> Result<RecordStream, SourceError>;

    /// Documents for an explicit set of root references.
    async fn records_for_references(
        &self,
        references: Vec<String>,
        index: Arc<Index>,
    ) -> Result<RecordStream, SourceError>;

    /// Documents for the root rows affected by grouped relation changes.
    /// The adapter sub-chunks the reference lists to stay under server-side
    /// argument limits.
    async fn records_for_relation_update(
        &self,
        updates: Vec<(RelationId, Vec<RelationUpdateEvent>)>,
        index: Arc<Index>,
    ) -> Result<RecordStream, SourceError>;
}

/// Instantiates the adapter a config entry names.
pub async fn build_source(
    name: &str,
    config: &AdapterConfig,
) -> Result<Arc<dyn SourceAdapter>, SourceError> {
    match config.driver.as_str() {
        "pg-trigger" => {
            let source = postgres::PostgresSource::connect(name, &config.options).await?;
            Ok(Arc::new(source))
        }
        other => Err(SourceError::UnknownDriver(other.to_string())),
    }
}
