pub mod payload;
pub mod planner;
pub mod reverse;
pub mod triggers;

use crate::sources::{RecordStream, SourceAdapter, SourceError};
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use pgsync_models::{Event, Index, Record, RelationId, RelationUpdateEvent};
use reverse::MAX_REFERENCES_PER_QUERY;
use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgListener, PgPoolOptions, PgRow};
use sqlx::{Executor, PgPool, Row};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_schema() -> String {
    "pgsync".to_string()
}

fn default_channel() -> String {
    "pgsync_event".to_string()
}

fn default_pool_size() -> u32 {
    10
}

#[derive(Debug, Deserialize)]
struct PostgresOptions {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    username: String,
    password: String,
    database: String,
    #[serde(default = "default_schema")]
    schema: String,
    #[serde(default = "default_channel")]
    channel: String,
    #[serde(default = "default_pool_size")]
    pool_size: u32,
}

/// Trigger-driven Postgres source: installs per-index triggers, listens on
/// the notification channel and materialises documents through the planner.
pub struct PostgresSource {
    name: String,
    pool: PgPool,
    schema: String,
    channel: String,
}

impl PostgresSource {
    pub async fn connect(
        name: &str,
        options: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, SourceError> {
        let options: PostgresOptions =
            serde_json::from_value(serde_json::Value::Object(options.clone()))
                .map_err(|err| SourceError::InvalidConfiguration(err.to_string()))?;

        let connect = PgConnectOptions::new()
            .host(&options.host)
            .port(options.port)
            .username(&options.username)
            .password(&options.password)
            .database(&options.database)
            .application_name("pgsync");
        let pool = PgPoolOptions::new()
            .max_connections(options.pool_size)
            .connect_with(connect)
            .await?;

        info!(
            "Connected to {}@{}/{}",
            options.username, options.host, options.database
        );

        Ok(PostgresSource {
            name: name.to_string(),
            pool,
            schema: options.schema,
            channel: options.channel,
        })
    }

    fn materialized_view(&self, index: &Index) -> String {
        format!(
            "{}.{}",
            planner::quote_ident(&self.schema),
            planner::quote_ident(&format!("pgsync_mv_{}", index.name)),
        )
    }

    /// Keyset-paged record stream: pages of `chunk_size` rows until a short
    /// page. A failed page is logged and ends the stream; a row whose JSON
    /// cannot be decoded is logged and skipped.
    fn paged_records(
        &self,
        base: String,
        clauses: Vec<String>,
        order_expr: String,
        chunk_size: usize,
    ) -> RecordStream {
        let pool = self.pool.clone();
        Box::pin(stream! {
            let mut previous: Option<String> = None;
            loop {
                let sql = planner::paged_sql(&base, &clauses, &order_expr, previous.as_deref(), chunk_size);
                let rows = match sqlx::query(&sql).fetch_all(&pool).await {
                    Ok(rows) => rows,
                    Err(err) => {
                        error!("Cannot execute query: {err}");
                        break;
                    }
                };
                let count = rows.len();
                for row in rows {
                    let reference: String = match row.try_get("reference") {
                        Ok(reference) => reference,
                        Err(err) => {
                            error!("Cannot read reference column: {err}");
                            return;
                        }
                    };
                    previous = Some(reference.clone());
                    match decode_document(&row) {
                        Ok(data) => yield Record { reference, data },
                        Err(err) => warn!("Cannot parse json for row {reference}: {err}"),
                    }
                }
                if count < chunk_size {
                    break;
                }
            }
        })
    }
}

fn decode_document(row: &PgRow) -> Result<serde_json::Map<String, serde_json::Value>, String> {
    let value: serde_json::Value = row.try_get("result").map_err(|err| err.to_string())?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(format!("document is not an object: {other}")),
    }
}

#[async_trait]
impl SourceAdapter for PostgresSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn install_triggers(&self, indices: &[Arc<Index>]) -> Result<(), SourceError> {
        for statement in triggers::schema_ddl(&self.schema) {
            self.pool.execute(statement.as_str()).await?;
        }
        for index in indices {
            for statement in triggers::index_ddl(&self.schema, &self.channel, index) {
                self.pool.execute(statement.as_str()).await?;
            }
            info!("Installed triggers for index {}", index.name);
        }
        Ok(())
    }

    async fn listen(&self, events: mpsc::Sender<Event>) -> Result<(), SourceError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(&self.channel).await?;
        info!("Listening on channel {}", self.channel);

        loop {
            let notification = listener.recv().await?;
            match payload::parse_payload(notification.payload()) {
                Ok(parsed) => {
                    for event in parsed {
                        if events.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                }
                Err(err) => warn!("Dropping notification: {err}"),
            }
        }
    }

    async fn scan_all(&self, index: Arc<Index>) -> Result<RecordStream, SourceError> {
        let view = self.materialized_view(&index);
        let mut select = planner::forward_select(&index);
        if let Some(wheres) = planner::root_where(&index) {
            select.push_str(&planner::where_clause(&[wheres]));
        }

        // Snapshot the full result set so paging is stable against
        // concurrent writes.
        self.pool
            .execute(format!("DROP MATERIALIZED VIEW IF EXISTS {view}").as_str())
            .await?;
        self.pool
            .execute(format!("CREATE MATERIALIZED VIEW {view} AS {select}").as_str())
            .await?;

        Ok(self.paged_records(
            format!("SELECT \"result\", \"reference\" FROM {view}"),
            Vec::new(),
            "\"reference\"".to_string(),
            index.chunk_size,
        ))
    }

    async fn records_for_references(
        &self,
        references: Vec<String>,
        index: Arc<Index>,
    ) -> Result<RecordStream, SourceError> {
        let mut clauses = Vec::new();
        if let Some(wheres) = planner::root_where(&index) {
            clauses.push(wheres);
        }
        let refs: Vec<&str> = references.iter().map(String::as_str).collect();
        clauses.push(planner::ref_in_clause(
            &index.table,
            &index.reference_field,
            &refs,
        ));

        Ok(self.paged_records(
            planner::forward_select(&index),
            clauses,
            format!(
                "{}.{}",
                planner::quote_ident(&index.table),
                planner::quote_ident(&index.reference_field),
            ),
            index.chunk_size,
        ))
    }

    async fn records_for_relation_update(
        &self,
        updates: Vec<(RelationId, Vec<RelationUpdateEvent>)>,
        index: Arc<Index>,
    ) -> Result<RecordStream, SourceError> {
        let base = planner::forward_select(&index);
        let order_expr = format!(
            "{}.{}",
            planner::quote_ident(&index.table),
            planner::quote_ident(&index.reference_field),
        );
        let root = planner::root_where(&index);
        let chunk_size = index.chunk_size;

        let mut streams = Vec::new();
        for chunk in reverse::chunk_relation_groups(updates, MAX_REFERENCES_PER_QUERY) {
            let Some(predicate) = reverse::relation_update_where(&index, &chunk) else {
                continue;
            };
            let mut clauses = Vec::new();
            if let Some(root) = &root {
                clauses.push(root.clone());
            }
            clauses.push(predicate);
            streams.push(self.paged_records(
                base.clone(),
                clauses,
                order_expr.clone(),
                chunk_size,
            ));
        }

        Ok(Box::pin(futures::stream::iter(streams).flatten()))
    }
}
