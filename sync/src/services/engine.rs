//! Engine wiring: adapters, indices and the streaming/reindex run modes.

use crate::services::batcher::IndexWorker;
use crate::services::dispatcher::Dispatcher;
use crate::services::transforms::TransformChain;
use crate::sources::{self, SourceAdapter};
use crate::targets::{self, TargetAdapter};
use anyhow::Context;
use pgsync_config::Config;
use pgsync_models::Index;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

/// Listener-side buffer; producers block once the channel is this far ahead
/// of the dispatcher.
const EVENT_CHANNEL_CAPACITY: usize = 100;

pub struct SyncEngine {
    sources: HashMap<String, Arc<dyn SourceAdapter>>,
    targets: HashMap<String, Arc<dyn TargetAdapter>>,
    workers: Vec<Arc<IndexWorker>>,
    /// Index names per source instance, for trigger installation.
    indices_by_source: HashMap<String, Vec<Arc<Index>>>,
    /// Index list per target instance, for index creation.
    indices_by_target: HashMap<String, Vec<Arc<Index>>>,
}

impl SyncEngine {
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut sources: HashMap<String, Arc<dyn SourceAdapter>> = HashMap::new();
        for (name, adapter_config) in &config.inputs {
            let source = sources::build_source(name, adapter_config)
                .await
                .with_context(|| format!("cannot initialise source adapter {name}"))?;
            sources.insert(name.clone(), source);
        }

        let mut targets: HashMap<String, Arc<dyn TargetAdapter>> = HashMap::new();
        for (name, adapter_config) in &config.outputs {
            let target = targets::build_target(name, adapter_config)
                .await
                .with_context(|| format!("cannot initialise target adapter {name}"))?;
            targets.insert(name.clone(), target);
        }

        let mut workers = Vec::new();
        let mut indices_by_source: HashMap<String, Vec<Arc<Index>>> = HashMap::new();
        let mut indices_by_target: HashMap<String, Vec<Arc<Index>>> = HashMap::new();
        for mapping in &config.mappings {
            let index = Arc::new(
                Index::from_mapping(mapping)
                    .with_context(|| format!("invalid mapping {}", mapping.name))?,
            );

            let source_name = config.source_for(mapping);
            let source = Arc::clone(&sources[source_name]);
            indices_by_source
                .entry(source_name.to_string())
                .or_default()
                .push(Arc::clone(&index));

            let mut index_targets = Vec::new();
            for target_name in config.targets_for(mapping) {
                index_targets.push(Arc::clone(&targets[target_name]));
                indices_by_target
                    .entry(target_name.clone())
                    .or_default()
                    .push(Arc::clone(&index));
            }

            let transforms = TransformChain::start(&index.transforms)
                .with_context(|| format!("cannot start transforms for {}", mapping.name))?;

            workers.push(Arc::new(IndexWorker::new(
                index,
                source,
                index_targets,
                transforms,
            )));
        }

        info!("Loaded {} indices", workers.len());
        Ok(SyncEngine {
            sources,
            targets,
            workers,
            indices_by_source,
            indices_by_target,
        })
    }

    /// Installs triggers and creates target indices. Any failure here is
    /// fatal for the process.
    pub async fn prepare(&self) -> anyhow::Result<()> {
        for (name, source) in &self.sources {
            let indices = self.indices_by_source.get(name).cloned().unwrap_or_default();
            source
                .install_triggers(&indices)
                .await
                .with_context(|| format!("cannot install triggers on source {name}"))?;
        }
        for (name, target) in &self.targets {
            let indices = self.indices_by_target.get(name).cloned().unwrap_or_default();
            target
                .prepare(&indices)
                .await
                .with_context(|| format!("cannot prepare target {name}"))?;
        }
        Ok(())
    }

    /// Streaming mode: listeners feed the event channel, the dispatcher
    /// routes into index mailboxes, batch loops drain them. Runs until a
    /// termination signal or a listener failure.
    pub async fn listen(&self) -> anyhow::Result<()> {
        let (events_tx, mut events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut listeners = tokio::task::JoinSet::new();
        for (name, source) in &self.sources {
            let name = name.clone();
            let source = Arc::clone(source);
            let events_tx = events_tx.clone();
            listeners.spawn(async move {
                source
                    .listen(events_tx)
                    .await
                    .map_err(|err| anyhow::anyhow!("source listener {name} failed: {err}"))
            });
        }
        drop(events_tx);

        let mut batchers = Vec::new();
        for worker in &self.workers {
            batchers.extend(Arc::clone(worker).spawn(shutdown_rx.clone()));
        }

        let dispatcher = Dispatcher::new(self.workers.iter().map(|worker| {
            (Arc::clone(worker.index()), Arc::clone(worker.waiting()))
        }));

        info!("🚀 Streaming changes for {} indices", self.workers.len());
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut listener_failure = None;
        loop {
            tokio::select! {
                received = events_rx.recv() => match received {
                    Some(event) => dispatcher.dispatch(event),
                    None => break,
                },
                // A listener going away mid-run is fatal.
                joined = listeners.join_next(), if !listeners.is_empty() => {
                    match joined {
                        Some(Ok(Err(err))) => {
                            error!("{err}");
                            listener_failure.get_or_insert(err);
                            break;
                        }
                        Some(Err(join_err)) => {
                            listener_failure
                                .get_or_insert(anyhow::anyhow!("listener panicked: {join_err}"));
                            break;
                        }
                        Some(Ok(Ok(()))) | None => {}
                    }
                }
                _ = &mut ctrl_c => {
                    info!("Received termination signal, shutting down");
                    break;
                }
            }
        }

        // Listeners stop first, then the dispatcher drains the channel,
        // then each batcher runs one final drain cycle.
        listeners.shutdown().await;
        while let Ok(event) = events_rx.try_recv() {
            dispatcher.dispatch(event);
        }
        let _ = shutdown_tx.send(true);
        for batcher in batchers {
            let _ = batcher.await;
        }

        match listener_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Bulk mode: reindex every index sequentially and return.
    pub async fn full_reindex(&self) -> anyhow::Result<()> {
        for worker in &self.workers {
            worker
                .reindex_all()
                .await
                .with_context(|| format!("reindex failed for {}", worker.index().name))?;
        }
        Ok(())
    }
}
