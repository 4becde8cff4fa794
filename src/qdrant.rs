//! Qdrant REST implementation of [`VectorStore`].
//!
//! | Operation | Request |
//! |-----------|---------|
//! | create | `PUT /collections/{name}` with `{"vectors": {"size", "distance"}}` |
//! | upsert | `PUT /collections/{name}/points?wait=true` with `{"points": [...]}` |
//! | scroll | `POST /collections/{name}/points/scroll` |
//! | delete | `DELETE /collections/{name}` |
//!
//! Each point carries its chunk text as `payload.text`. The `api-key`
//! header is sent when the configured environment variable is set.
//! "Already exists" on create (409, or 400 mentioning it) and 404 on
//! delete are reported as outcomes, not errors.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use parley_core::store::{
    CreateOutcome, DeleteOutcome, Distance, ScrollPage, VectorPoint, VectorStore,
};

use crate::config::VectorStoreConfig;

pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct ScrollResponse {
    result: ScrollResult,
}

#[derive(Deserialize)]
struct ScrollResult {
    #[serde(default)]
    points: Vec<ScrolledPoint>,
    #[serde(default)]
    next_page_offset: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ScrolledPoint {
    id: serde_json::Value,
    #[serde(default)]
    payload: Option<serde_json::Value>,
    #[serde(default)]
    vector: Option<Vec<f32>>,
}

impl QdrantStore {
    pub fn new(config: &VectorStoreConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        Self::with_api_key(&config.url, api_key, config.timeout_secs)
    }

    pub fn with_api_key(base_url: &str, api_key: Option<String>, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header("Content-Type", "application/json");
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }
}

fn point_id(value: &serde_json::Value) -> Result<u64> {
    value
        .as_u64()
        .ok_or_else(|| anyhow!("unsupported point id: {}", value))
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn create_collection(
        &self,
        collection: &str,
        dims: usize,
        distance: Distance,
    ) -> Result<CreateOutcome> {
        let body = serde_json::json!({
            "vectors": { "size": dims, "distance": distance.as_str() }
        });
        let response = self
            .request(reqwest::Method::PUT, &format!("/collections/{}", collection))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Qdrant create request failed for {}", collection))?;

        let status = response.status();
        if status.is_success() {
            return Ok(CreateOutcome::Created);
        }
        let body_text = response.text().await.unwrap_or_default();
        if status == StatusCode::CONFLICT
            || (status == StatusCode::BAD_REQUEST && body_text.contains("already exists"))
        {
            return Ok(CreateOutcome::AlreadyExists);
        }
        bail!("Qdrant create error {}: {}", status, body_text);
    }

    async fn upsert_points(&self, collection: &str, points: &[VectorPoint]) -> Result<()> {
        let points: Vec<serde_json::Value> = points
            .iter()
            .map(|p| {
                serde_json::json!({
                    "id": p.id,
                    "vector": p.vector,
                    "payload": { "text": p.text },
                })
            })
            .collect();
        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/collections/{}/points?wait=true", collection),
            )
            .json(&serde_json::json!({ "points": points }))
            .send()
            .await
            .with_context(|| format!("Qdrant upsert request failed for {}", collection))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Qdrant upsert error {}: {}", status, body_text);
        }
        Ok(())
    }

    async fn scroll(
        &self,
        collection: &str,
        limit: usize,
        offset: Option<u64>,
    ) -> Result<ScrollPage> {
        let mut body = serde_json::json!({
            "limit": limit,
            "with_payload": true,
            "with_vector": true,
        });
        if let Some(offset) = offset {
            body["offset"] = serde_json::json!(offset);
        }

        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{}/points/scroll", collection),
            )
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Qdrant scroll request failed for {}", collection))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            tracing::debug!(collection, "scrolled a missing collection; treating it as empty");
            return Ok(ScrollPage::default());
        }
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Qdrant scroll error {}: {}", status, body_text);
        }

        let parsed: ScrollResponse = response
            .json()
            .await
            .context("Invalid Qdrant scroll response")?;

        let mut points = Vec::with_capacity(parsed.result.points.len());
        for p in parsed.result.points {
            let text = p
                .payload
                .as_ref()
                .and_then(|payload| payload.get("text"))
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string();
            let Some(vector) = p.vector else {
                tracing::warn!(collection, "scrolled point without vector skipped");
                continue;
            };
            points.push(VectorPoint {
                id: point_id(&p.id)?,
                vector,
                text,
            });
        }

        let next_offset = match parsed.result.next_page_offset {
            Some(serde_json::Value::Null) | None => None,
            Some(value) => Some(point_id(&value)?),
        };

        Ok(ScrollPage {
            points,
            next_offset,
        })
    }

    async fn delete_collection(&self, collection: &str) -> Result<DeleteOutcome> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/collections/{}", collection))
            .send()
            .await
            .with_context(|| format!("Qdrant delete request failed for {}", collection))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(DeleteOutcome::NotFound);
        }
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Qdrant delete error {}: {}", status, body_text);
        }
        Ok(DeleteOutcome::Deleted)
    }
}
