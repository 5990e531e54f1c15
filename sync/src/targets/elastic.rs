//! Elasticsearch-style bulk target.

use crate::targets::{TargetAdapter, TargetError};
use async_trait::async_trait;
use pgsync_models::{DeleteRow, DocumentRow, Index};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
struct ElasticOptions {
    endpoints: Vec<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    prefix: String,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

pub struct ElasticTarget {
    name: String,
    client: reqwest::Client,
    endpoints: Vec<String>,
    username: Option<String>,
    password: Option<String>,
    prefix: String,
    /// One bulk request in flight per adapter instance.
    bulk_lock: Mutex<()>,
}

impl ElasticTarget {
    pub async fn connect(
        name: &str,
        options: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, TargetError> {
        let options: ElasticOptions =
            serde_json::from_value(serde_json::Value::Object(options.clone()))
                .map_err(|err| TargetError::InvalidConfiguration(err.to_string()))?;
        if options.endpoints.is_empty() {
            return Err(TargetError::InvalidConfiguration(
                "elastic target needs at least one endpoint".to_string(),
            ));
        }

        let target = ElasticTarget {
            name: name.to_string(),
            client: reqwest::Client::new(),
            endpoints: options.endpoints,
            username: options.username,
            password: options.password,
            prefix: options.prefix,
            bulk_lock: Mutex::new(()),
        };

        let response = target
            .request(reqwest::Method::GET, "")
            .send()
            .await?
            .error_for_status()?;
        info!("Connected to elasticsearch at {}", response.url());
        Ok(target)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let endpoint = &self.endpoints[0];
        let mut request = self.client.request(method, format!("{endpoint}/{path}"));
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_deref());
        }
        request
    }

    fn index_name(&self, index: &str) -> String {
        format!("{}{}", self.prefix, index)
    }

    async fn send_bulk(&self, body: String) {
        let _guard = self.bulk_lock.lock().await;

        // Walk the endpoint list on transport failures.
        let mut response = None;
        for endpoint in &self.endpoints {
            let mut request = self
                .client
                .post(format!("{endpoint}/_bulk"))
                .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
                .body(body.clone());
            if let Some(username) = &self.username {
                request = request.basic_auth(username, self.password.as_deref());
            }
            match request.send().await {
                Ok(ok) => {
                    response = Some(ok);
                    break;
                }
                Err(err) => warn!("Bulk request to {endpoint} failed: {err}"),
            }
        }
        let Some(response) = response else {
            error!("Every endpoint rejected the bulk request, dropping it");
            return;
        };
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Bulk request failed with {status}: {body}");
            return;
        }

        // Individual row errors don't fail the batch; they are only logged.
        match response.json::<BulkResponse>().await {
            Ok(bulk) if bulk.errors => {
                let failed = bulk
                    .items
                    .iter()
                    .filter(|item| {
                        item.as_object()
                            .and_then(|directives| directives.values().next())
                            .and_then(|outcome| outcome.get("error"))
                            .is_some()
                    })
                    .count();
                warn!("Bulk request completed with {failed} row errors");
            }
            Ok(_) => {}
            Err(err) => warn!("Cannot parse bulk response: {err}"),
        }
    }

    fn document_body(&self, rows: &[DocumentRow]) -> String {
        let mut body = String::new();
        for row in rows {
            let directive = json!({
                "index": {"_index": self.index_name(&row.index), "_id": row.reference}
            });
            body.push_str(&directive.to_string());
            body.push('\n');
            match serde_json::to_string(&row.document) {
                Ok(document) => {
                    body.push_str(&document);
                    body.push('\n');
                }
                Err(err) => {
                    // Directive already appended; degrade to an empty object
                    // rather than desynchronising the directive/body pairs.
                    error!("Cannot serialise document {}: {err}", row.reference);
                    body.push_str("{}\n");
                }
            }
        }
        body
    }
}

#[async_trait]
impl TargetAdapter for ElasticTarget {
    fn name(&self) -> &str {
        &self.name
    }

    async fn prepare(&self, indices: &[Arc<Index>]) -> Result<(), TargetError> {
        for index in indices {
            if index.settings.is_none() && index.mappings.is_none() {
                continue;
            }
            let name = self.index_name(&index.name);
            let exists = self
                .request(reqwest::Method::HEAD, &name)
                .send()
                .await?
                .status()
                .is_success();
            if exists {
                continue;
            }

            let mut request_body = serde_json::Map::new();
            if let Some(settings) = &index.settings {
                request_body.insert("settings".to_string(), settings.clone());
            }
            if let Some(mappings) = &index.mappings {
                request_body.insert("mappings".to_string(), mappings.clone());
            }
            let response = self
                .request(reqwest::Method::PUT, &name)
                .json(&serde_json::Value::Object(request_body))
                .send()
                .await?;
            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(TargetError::Rejected(format!(
                    "cannot create index {name}: {status} {body}"
                )));
            }
            info!("Created index {name}");
        }
        Ok(())
    }

    async fn insert(&self, rows: &[DocumentRow]) {
        if rows.is_empty() {
            return;
        }
        debug!("Sending insert bulk of {} rows", rows.len());
        self.send_bulk(self.document_body(rows)).await;
    }

    async fn update(&self, rows: &[DocumentRow]) {
        if rows.is_empty() {
            return;
        }
        debug!("Sending update bulk of {} rows", rows.len());
        self.send_bulk(self.document_body(rows)).await;
    }

    async fn delete(&self, rows: &[DeleteRow]) {
        if rows.is_empty() {
            return;
        }
        debug!("Sending delete bulk of {} rows", rows.len());
        let mut body = String::new();
        for row in rows {
            let directive = json!({
                "delete": {"_index": self.index_name(&row.index), "_id": row.reference}
            });
            body.push_str(&directive.to_string());
            body.push('\n');
        }
        self.send_bulk(body).await;
    }
}
