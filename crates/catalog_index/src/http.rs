//! HTTP client for an Elasticsearch-compatible index server.

use crate::backend::{BulkOutcome, CreateOutcome, Document, Resolution, SearchIndex};
use crate::error::{IndexError, IndexResult};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const SCROLL_KEEP_ALIVE: &str = "1m";
const SCROLL_PAGE: usize = 500;

/// Search index reached over the Elasticsearch REST API.
#[derive(Debug, Clone)]
pub struct ElasticsearchIndex {
    base_url: String,
    client: Client,
}

impl ElasticsearchIndex {
    /// Creates a client for the server at `base_url` (e.g. `http://localhost:9200`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    /// Creates a client with a per-request timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { base_url, client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> IndexResult<Response> {
        request
            .send()
            .await
            .map_err(|e| IndexError::Unreachable(e.to_string()))
    }

    async fn json_body(response: Response) -> IndexResult<Value> {
        response
            .json()
            .await
            .map_err(|e| IndexError::InvalidBody(e.to_string()))
    }

    async fn expect_success(response: Response) -> IndexResult<Value> {
        let status = response.status();
        if status.is_success() {
            return Self::json_body(response).await;
        }
        if status == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::IndexNotFound(body));
        }
        let message = response.text().await.unwrap_or_default();
        Err(IndexError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    async fn clear_scroll(&self, scroll_id: &str) {
        let request = self
            .client
            .delete(self.url("_search/scroll"))
            .json(&json!({ "scroll_id": scroll_id }));
        if let Err(e) = self.send(request).await {
            debug!(error = %e, "failed to clear scroll context");
        }
    }
}

fn hits(body: &Value) -> Vec<Document> {
    body["hits"]["hits"]
        .as_array()
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| {
                    Some(Document {
                        id: hit["_id"].as_str()?.to_string(),
                        source: hit["_source"].clone(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    fn endpoint(&self) -> String {
        self.base_url.clone()
    }

    async fn ping(&self) -> IndexResult<()> {
        let response = self.send(self.client.get(self.url("/"))).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(IndexError::Unreachable(format!(
                "health probe returned {}",
                response.status()
            )))
        }
    }

    async fn resolve(&self, name: &str) -> IndexResult<Resolution> {
        let response = self
            .send(self.client.get(self.url(&format!("_alias/{name}"))))
            .await?;
        if response.status().is_success() {
            let body = Self::json_body(response).await?;
            let targets: Vec<String> = body
                .as_object()
                .map(|indexes| indexes.keys().cloned().collect())
                .unwrap_or_default();
            if !targets.is_empty() && !targets.iter().any(|t| t == name) {
                return Ok(Resolution::Alias(targets));
            }
        }

        let response = self.send(self.client.head(self.url(name))).await?;
        match response.status() {
            s if s.is_success() => Ok(Resolution::Index(name.to_string())),
            StatusCode::NOT_FOUND => Ok(Resolution::Missing),
            s => Err(IndexError::Rejected {
                status: s.as_u16(),
                message: format!("cannot resolve {name}"),
            }),
        }
    }

    async fn create_index(&self, name: &str) -> IndexResult<CreateOutcome> {
        let response = self.send(self.client.put(self.url(name))).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(CreateOutcome::Created);
        }
        let body = Self::json_body(response).await.unwrap_or(Value::Null);
        if body["error"]["type"] == "resource_already_exists_exception" {
            return Ok(CreateOutcome::AlreadyExists);
        }
        Err(IndexError::Rejected {
            status: status.as_u16(),
            message: body.to_string(),
        })
    }

    async fn get_document(&self, index: &str, id: &str) -> IndexResult<Option<Value>> {
        let response = self
            .send(self.client.get(self.url(&format!("{index}/_doc/{id}"))))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            let body = Self::json_body(response).await.unwrap_or(Value::Null);
            if body["found"] == false {
                return Ok(None);
            }
            return Err(IndexError::IndexNotFound(index.to_string()));
        }
        let body = Self::expect_success(response).await?;
        Ok(Some(body["_source"].clone()))
    }

    async fn index_document(&self, index: &str, id: &str, body: Value) -> IndexResult<()> {
        let request = self
            .client
            .put(self.url(&format!("{index}/_doc/{id}")))
            .json(&body);
        Self::expect_success(self.send(request).await?).await?;
        Ok(())
    }

    async fn bulk_delete(&self, index: &str, ids: &[String]) -> IndexResult<BulkOutcome> {
        if ids.is_empty() {
            return Ok(BulkOutcome::default());
        }

        let mut payload = String::new();
        for id in ids {
            payload.push_str(&json!({ "delete": { "_id": id } }).to_string());
            payload.push('\n');
        }

        let request = self
            .client
            .post(self.url(&format!("{index}/_bulk")))
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(payload);
        let response = self.send(request).await?;
        let status = response.status();
        if status != StatusCode::OK {
            let message = response.text().await.unwrap_or_default();
            return Err(IndexError::Bulk {
                status: status.as_u16(),
                message,
            });
        }

        let body = Self::json_body(response).await?;
        let mut outcome = BulkOutcome::default();
        let items = body["items"].as_array().cloned().unwrap_or_default();
        for item in &items {
            let delete = &item["delete"];
            if !delete["error"].is_null() {
                return Err(IndexError::Bulk {
                    status: 200,
                    message: delete["error"].to_string(),
                });
            }
            match delete["result"].as_str() {
                Some("deleted") => outcome.deleted += 1,
                _ => outcome.not_found += 1,
            }
        }
        Ok(outcome)
    }

    async fn get_mapping(&self, index: &str) -> IndexResult<Value> {
        let response = self
            .send(self.client.get(self.url(&format!("{index}/_mapping"))))
            .await?;
        let body = Self::expect_success(response).await?;
        Ok(body[index]["mappings"].clone())
    }

    async fn put_mapping(&self, index: &str, mapping: Value) -> IndexResult<()> {
        let request = self
            .client
            .put(self.url(&format!("{index}/_mapping")))
            .json(&mapping);
        Self::expect_success(self.send(request).await?).await?;
        Ok(())
    }

    async fn refresh(&self, index: &str) -> IndexResult<()> {
        let request = self.client.post(self.url(&format!("{index}/_refresh")));
        Self::expect_success(self.send(request).await?).await?;
        Ok(())
    }

    async fn count(&self, index: &str) -> IndexResult<u64> {
        let response = self
            .send(self.client.get(self.url(&format!("{index}/_count"))))
            .await?;
        let body = Self::expect_success(response).await?;
        body["count"]
            .as_u64()
            .ok_or_else(|| IndexError::InvalidBody("count missing from response".into()))
    }

    async fn scan(&self, index: &str) -> IndexResult<Vec<Document>> {
        let request = self
            .client
            .post(self.url(&format!("{index}/_search?scroll={SCROLL_KEEP_ALIVE}")))
            .json(&json!({ "size": SCROLL_PAGE, "sort": ["_doc"] }));
        let mut body = Self::expect_success(self.send(request).await?).await?;

        let mut documents = Vec::new();
        loop {
            let page = hits(&body);
            let scroll_id = body["_scroll_id"].as_str().map(str::to_string);
            if page.is_empty() {
                if let Some(scroll_id) = scroll_id {
                    self.clear_scroll(&scroll_id).await;
                }
                break;
            }
            documents.extend(page);

            let Some(scroll_id) = scroll_id else {
                break;
            };
            let request = self
                .client
                .post(self.url("_search/scroll"))
                .json(&json!({ "scroll": SCROLL_KEEP_ALIVE, "scroll_id": scroll_id }));
            body = Self::expect_success(self.send(request).await?).await?;
        }

        documents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(documents)
    }
}
