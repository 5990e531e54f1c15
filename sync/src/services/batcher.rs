//! Per-index batch loops: four independent tasks translate waiting events
//! into source reads and target writes.

use crate::services::transforms::TransformChain;
use crate::sources::{RecordStream, SourceAdapter, SourceError};
use crate::targets::TargetAdapter;
use futures::StreamExt;
use pgsync_models::{
    DeleteRow, DocumentRow, Index, RelationId, RelationUpdateEvent, WaitingEvents,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

const WAKE_INTERVAL: Duration = Duration::from_millis(100);
const FLUSH_AFTER: Duration = Duration::from_millis(500);
const RELATION_FLUSH_AFTER: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchKind {
    Inserts,
    Updates,
    Deletes,
    RelationUpdates,
}

#[derive(Debug, Clone, Copy)]
enum WriteKind {
    Insert,
    Update,
}

/// Owns one index's mailboxes and batch loops.
pub struct IndexWorker {
    index: Arc<Index>,
    waiting: Arc<WaitingEvents>,
    source: Arc<dyn SourceAdapter>,
    targets: Vec<Arc<dyn TargetAdapter>>,
    transforms: TransformChain,
}

impl IndexWorker {
    pub fn new(
        index: Arc<Index>,
        source: Arc<dyn SourceAdapter>,
        targets: Vec<Arc<dyn TargetAdapter>>,
        transforms: TransformChain,
    ) -> Self {
        IndexWorker {
            index,
            waiting: Arc::new(WaitingEvents::new()),
            source,
            targets,
            transforms,
        }
    }

    pub fn index(&self) -> &Arc<Index> {
        &self.index
    }

    pub fn waiting(&self) -> &Arc<WaitingEvents> {
        &self.waiting
    }

    /// Starts the four batch loops. Each loop wakes every 100 ms and drains
    /// its queue when it holds a full chunk or its flush deadline passed.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        [
            BatchKind::Inserts,
            BatchKind::Updates,
            BatchKind::Deletes,
            BatchKind::RelationUpdates,
        ]
        .into_iter()
        .map(|kind| {
            let worker = Arc::clone(&self);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { worker.run_kind(kind, shutdown).await })
        })
        .collect()
    }

    async fn run_kind(&self, kind: BatchKind, mut shutdown: watch::Receiver<bool>) {
        let flush_after = match kind {
            BatchKind::RelationUpdates => RELATION_FLUSH_AFTER,
            _ => FLUSH_AFTER,
        };
        let mut ticker = interval(WAKE_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_flush = Instant::now();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    while self.queue_len(kind) >= self.index.chunk_size
                        || last_flush.elapsed() >= flush_after
                    {
                        last_flush = Instant::now();
                        if self.queue_len(kind) == 0 {
                            break;
                        }
                        self.process_batch(kind, &mut shutdown).await;
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                // One more drain cycle, then stop; the granted cycle runs to
                // completion, and whatever is still queued is recovered by
                // the next bulk reindex.
                if self.queue_len(kind) > 0 {
                    shutdown.borrow_and_update();
                    self.process_batch(kind, &mut shutdown).await;
                }
                break;
            }
        }
    }

    fn queue_len(&self, kind: BatchKind) -> usize {
        match kind {
            BatchKind::Inserts => self.waiting.inserts.len(),
            BatchKind::Updates => self.waiting.updates.len(),
            BatchKind::Deletes => self.waiting.deletes.len(),
            BatchKind::RelationUpdates => self.waiting.relation_updates.len(),
        }
    }

    async fn process_batch(&self, kind: BatchKind, shutdown: &mut watch::Receiver<bool>) {
        let chunk_size = self.index.chunk_size;
        match kind {
            BatchKind::Inserts => {
                let batch = self.waiting.inserts.drain(chunk_size);
                self.process_documents(batch, WriteKind::Insert, shutdown).await;
            }
            BatchKind::Updates => {
                let batch = self.waiting.updates.drain(chunk_size);
                self.process_documents(batch, WriteKind::Update, shutdown).await;
            }
            BatchKind::Deletes => {
                let batch = self.waiting.deletes.drain(chunk_size);
                self.process_deletes(batch).await;
            }
            BatchKind::RelationUpdates => {
                let batch = self.waiting.relation_updates.drain(chunk_size);
                self.process_relation_updates(batch, shutdown).await;
            }
        }
    }

    async fn process_documents(
        &self,
        references: Vec<String>,
        kind: WriteKind,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        let references = dedup_preserving(references);
        if references.is_empty() {
            return;
        }
        match self
            .source
            .records_for_references(references, Arc::clone(&self.index))
            .await
        {
            Ok(stream) => self.write_stream(stream, kind, Some(shutdown)).await,
            Err(err) => error!("Error getting full records for {}: {err}", self.index.name),
        }
    }

    async fn process_deletes(&self, references: Vec<String>) {
        let rows: Vec<DeleteRow> = references
            .into_iter()
            .map(|reference| DeleteRow {
                index: self.index.name.clone(),
                reference,
            })
            .collect();
        if rows.is_empty() {
            return;
        }
        for target in &self.targets {
            target.delete(&rows).await;
        }
    }

    async fn process_relation_updates(
        &self,
        events: Vec<RelationUpdateEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        // Group by relation node, drop duplicates within the batch.
        let mut groups: Vec<(RelationId, Vec<RelationUpdateEvent>)> = Vec::new();
        let mut group_of: HashMap<RelationId, usize> = HashMap::new();
        let mut seen: HashSet<(RelationId, String, bool)> = HashSet::new();

        for event in events {
            let Some(relation_id) = self.index.relations.by_unique_name(&event.relation) else {
                warn!(
                    "Dropping relation update for unknown relation {} on {}",
                    event.relation, self.index.name
                );
                continue;
            };
            if !seen.insert((relation_id, event.reference.clone(), event.pivot)) {
                continue;
            }
            match group_of.get(&relation_id) {
                Some(&position) => groups[position].1.push(event),
                None => {
                    group_of.insert(relation_id, groups.len());
                    groups.push((relation_id, vec![event]));
                }
            }
        }
        if groups.is_empty() {
            return;
        }

        match self
            .source
            .records_for_relation_update(groups, Arc::clone(&self.index))
            .await
        {
            Ok(stream) => self.write_stream(stream, WriteKind::Update, Some(shutdown)).await,
            Err(err) => error!(
                "Error getting records for relation update on {}: {err}",
                self.index.name
            ),
        }
    }

    /// Accumulates streamed records into chunk-sized bulk writes. When
    /// `cancel` fires, the in-flight paged read is abandoned mid-stream;
    /// records already buffered still flush.
    async fn write_stream(
        &self,
        mut records: RecordStream,
        kind: WriteKind,
        mut cancel: Option<&mut watch::Receiver<bool>>,
    ) {
        let mut buffer: Vec<DocumentRow> = Vec::with_capacity(self.index.chunk_size);
        loop {
            let next = match cancel.as_mut() {
                Some(cancel) => tokio::select! {
                    next = records.next() => next,
                    _ = cancel.changed() => None,
                },
                None => records.next().await,
            };
            let Some(record) = next else {
                break;
            };
            let record = if self.transforms.is_empty() {
                record
            } else {
                match self.transforms.apply(record).await {
                    Ok(record) => record,
                    Err(err) => {
                        warn!("Transform failed, skipping record: {err}");
                        continue;
                    }
                }
            };
            buffer.push(DocumentRow {
                index: self.index.name.clone(),
                reference: record.reference,
                document: serde_json::Value::Object(record.data),
            });
            if buffer.len() >= self.index.chunk_size {
                self.flush(&buffer, kind).await;
                buffer.clear();
            }
        }
        if !buffer.is_empty() {
            self.flush(&buffer, kind).await;
        }
    }

    async fn flush(&self, rows: &[DocumentRow], kind: WriteKind) {
        for target in &self.targets {
            match kind {
                WriteKind::Insert => target.insert(rows).await,
                WriteKind::Update => target.update(rows).await,
            }
        }
    }

    /// Bulk reindex: stream every matching row into insert bulks.
    pub async fn reindex_all(&self) -> Result<(), SourceError> {
        info!("Indexing all documents for {}", self.index.name);
        let stream = self.source.scan_all(Arc::clone(&self.index)).await?;
        self.write_stream(stream, WriteKind::Insert, None).await;
        Ok(())
    }
}

fn dedup_preserving(references: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    references
        .into_iter()
        .filter(|reference| seen.insert(reference.clone()))
        .collect()
}
