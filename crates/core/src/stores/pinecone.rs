use crate::error::ConfigError;
use crate::models::{
    Chunk, ChunkMetadata, ContentType, IndexEntry, IndexSpec, IndexStats, MetadataFilter,
    ScoredEntry,
};
use crate::traits::VectorIndex;
use crate::IndexError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const BACKEND: &str = "pinecone";
const API_VERSION: &str = "2024-07";
const UPSERT_BATCH: usize = 100;
const READY_POLLS: usize = 60;

#[derive(Debug, Clone)]
pub struct PineconeConfig {
    pub api_key: String,
    pub control_url: String,
    pub cloud: String,
    pub region: String,
    /// Data-plane host; discovered from the control plane when absent.
    pub host: Option<String>,
    pub timeout: Duration,
    pub ready_poll_interval: Duration,
}

impl PineconeConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            control_url: "https://api.pinecone.io".to_string(),
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
            host: None,
            timeout: Duration::from_secs(30),
            ready_poll_interval: Duration::from_secs(2),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = non_empty_env("PINECONE_API_KEY").ok_or(ConfigError::MissingEnv("PINECONE_API_KEY"))?;

        let mut config = Self::new(api_key);
        if let Some(cloud) = non_empty_env("PINECONE_CLOUD") {
            config.cloud = cloud;
        }
        if let Some(region) = non_empty_env("PINECONE_REGION") {
            config.region = region;
        }
        config.host = non_empty_env("PINECONE_HOST");
        Ok(config)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub struct PineconeIndex {
    client: Client,
    config: PineconeConfig,
    host: OnceLock<Url>,
}

impl PineconeIndex {
    pub fn new(config: PineconeConfig) -> Result<Self, IndexError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        let host = OnceLock::new();
        if let Some(configured) = &config.host {
            let _ = host.set(host_url(configured)?);
        }

        Ok(Self {
            client,
            config,
            host,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Api-Key", &self.config.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    fn data_url(&self, path: &str) -> Result<Url, IndexError> {
        let host = self
            .host
            .get()
            .ok_or_else(|| IndexError::NotReady("index host unknown; call ensure_index first".to_string()))?;
        Ok(host.join(path)?)
    }

    async fn describe(&self, name: &str) -> Result<Option<Value>, IndexError> {
        let url = format!("{}/indexes/{}", self.config.control_url, name);
        let response = self.authorized(self.client.get(url)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        Ok(Some(checked(response).await?.json().await?))
    }

    async fn create(&self, spec: &IndexSpec) -> Result<(), IndexError> {
        let url = format!("{}/indexes", self.config.control_url);
        let response = self
            .authorized(self.client.post(url))
            .json(&json!({
                "name": spec.name,
                "dimension": spec.dimension,
                "metric": spec.metric.as_str(),
                "spec": {
                    "serverless": {
                        "cloud": self.config.cloud,
                        "region": self.config.region,
                    }
                }
            }))
            .send()
            .await?;

        // Another caller created it between our describe and create.
        if response.status() == StatusCode::CONFLICT {
            return Ok(());
        }

        checked(response).await?;
        info!(index = %spec.name, dimension = spec.dimension, metric = spec.metric.as_str(), "created index");
        Ok(())
    }

    async fn wait_until_ready(&self, name: &str) -> Result<Value, IndexError> {
        for _ in 0..READY_POLLS {
            if let Some(description) = self.describe(name).await? {
                let ready = description
                    .pointer("/status/ready")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if ready {
                    return Ok(description);
                }
            }
            tokio::time::sleep(self.config.ready_poll_interval).await;
        }

        Err(IndexError::NotReady(format!("index {name} did not become ready")))
    }
}

fn host_url(host: &str) -> Result<Url, IndexError> {
    let trimmed = host.trim().trim_end_matches('/');
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    Ok(Url::parse(&format!("{with_scheme}/"))?)
}

async fn checked(response: Response) -> Result<Response, IndexError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(IndexError::Service {
        backend: BACKEND.to_string(),
        details: format!("{status}: {body}"),
    })
}

fn check_existing(spec: &IndexSpec, description: &Value) -> Result<(), IndexError> {
    let found_dimension = description
        .pointer("/dimension")
        .and_then(Value::as_u64)
        .unwrap_or_default() as usize;
    let found_metric = description
        .pointer("/metric")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if found_dimension != spec.dimension || found_metric != spec.metric.as_str() {
        return Err(IndexError::ConfigMismatch {
            name: spec.name.clone(),
            requested_dimension: spec.dimension,
            requested_metric: spec.metric.as_str().to_string(),
            found_dimension,
            found_metric,
        });
    }

    Ok(())
}

fn entry_payload(entry: &IndexEntry) -> Value {
    let metadata = &entry.chunk.metadata;
    let mut fields = Map::new();
    fields.insert("text".to_string(), json!(entry.chunk.content));
    fields.insert("source".to_string(), json!(metadata.source));
    fields.insert("content_type".to_string(), json!(metadata.content_type));
    fields.insert("chunk_index".to_string(), json!(metadata.chunk_index));
    if let Some(page) = metadata.page {
        fields.insert("page".to_string(), json!(page));
    }
    if let Some(row) = metadata.row {
        fields.insert("row".to_string(), json!(row));
    }

    json!({
        "id": entry.id,
        "values": entry.vector,
        "metadata": fields,
    })
}

fn filter_payload(filter: &MetadataFilter) -> Value {
    json!({ "source": { "$in": filter.sources } })
}

// Pinecone hands numeric metadata back as floats.
fn metadata_number(metadata: &Value, key: &str) -> Option<u64> {
    metadata
        .get(key)
        .and_then(|value| value.as_u64().or_else(|| value.as_f64().map(|float| float as u64)))
}

fn match_to_entry(hit: &Value) -> Option<ScoredEntry> {
    let id = hit.get("id").and_then(Value::as_str)?.to_string();
    let score = hit.get("score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
    let metadata = hit.get("metadata")?;

    let content_type = metadata
        .get("content_type")
        .cloned()
        .and_then(|value| serde_json::from_value::<ContentType>(value).ok())
        .unwrap_or(ContentType::Text);

    Some(ScoredEntry {
        id,
        score,
        chunk: Chunk {
            content: metadata
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            metadata: ChunkMetadata {
                source: metadata
                    .get("source")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                page: metadata_number(metadata, "page").map(|page| page as u32),
                row: metadata_number(metadata, "row"),
                content_type,
                chunk_index: metadata_number(metadata, "chunk_index").unwrap_or_default(),
            },
        },
    })
}

fn parse_stats(payload: &Value, namespace: Option<&str>) -> IndexStats {
    let namespaces: BTreeMap<String, u64> = payload
        .get("namespaces")
        .and_then(Value::as_object)
        .map(|listed| {
            listed
                .iter()
                .filter(|(name, _)| namespace.map_or(true, |wanted| wanted == name.as_str()))
                .map(|(name, summary)| {
                    let count = summary
                        .get("vectorCount")
                        .and_then(Value::as_u64)
                        .unwrap_or_default();
                    (name.clone(), count)
                })
                .collect()
        })
        .unwrap_or_default();

    let total_vector_count = match namespace {
        Some(_) => namespaces.values().sum(),
        None => payload
            .get("totalVectorCount")
            .and_then(Value::as_u64)
            .unwrap_or_else(|| namespaces.values().sum()),
    };

    IndexStats {
        total_vector_count,
        namespaces,
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn ensure_index(&self, spec: &IndexSpec) -> Result<(), IndexError> {
        let description = match self.describe(&spec.name).await? {
            Some(description) => {
                check_existing(spec, &description)?;
                description
            }
            None => {
                self.create(spec).await?;
                let description = self.wait_until_ready(&spec.name).await?;
                check_existing(spec, &description)?;
                description
            }
        };

        if self.host.get().is_none() {
            let host = description
                .pointer("/host")
                .and_then(Value::as_str)
                .ok_or_else(|| IndexError::Service {
                    backend: BACKEND.to_string(),
                    details: format!("index {} has no host", spec.name),
                })?;
            let _ = self.host.set(host_url(host)?);
        }

        debug!(index = %spec.name, "index ready");
        Ok(())
    }

    async fn upsert(&self, entries: &[IndexEntry], namespace: &str) -> Result<usize, IndexError> {
        let url = self.data_url("vectors/upsert")?;
        let mut upserted = 0usize;

        for batch in entries.chunks(UPSERT_BATCH) {
            let vectors: Vec<Value> = batch.iter().map(entry_payload).collect();
            let response = self
                .authorized(self.client.post(url.clone()))
                .json(&json!({ "vectors": vectors, "namespace": namespace }))
                .send()
                .await?;

            let payload: Value = checked(response).await?.json().await?;
            upserted += payload
                .get("upsertedCount")
                .and_then(Value::as_u64)
                .map(|count| count as usize)
                .unwrap_or(batch.len());
        }

        Ok(upserted)
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        namespace: &str,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredEntry>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut body = json!({
            "vector": vector,
            "topK": k,
            "namespace": namespace,
            "includeMetadata": true,
            "includeValues": false,
        });
        if let Some(filter) = filter.filter(|filter| !filter.sources.is_empty()) {
            body["filter"] = filter_payload(filter);
        }

        let response = self
            .authorized(self.client.post(self.data_url("query")?))
            .json(&body)
            .send()
            .await?;
        let payload: Value = checked(response).await?.json().await?;

        let mut matches: Vec<ScoredEntry> = payload
            .get("matches")
            .and_then(Value::as_array)
            .map(|listed| listed.iter().filter_map(match_to_entry).collect())
            .unwrap_or_default();

        // Stable sort keeps the service's order among equal scores.
        matches.sort_by(|left, right| right.score.total_cmp(&left.score));
        matches.truncate(k);
        Ok(matches)
    }

    async fn stats(&self, namespace: Option<&str>) -> Result<IndexStats, IndexError> {
        let response = self
            .authorized(self.client.post(self.data_url("describe_index_stats")?))
            .json(&json!({}))
            .send()
            .await?;
        let payload: Value = checked(response).await?.json().await?;
        Ok(parse_stats(&payload, namespace))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metric;

    fn spec() -> IndexSpec {
        IndexSpec {
            name: "document-store".to_string(),
            dimension: 1536,
            metric: Metric::Cosine,
        }
    }

    #[test]
    fn existing_index_with_other_dimension_is_a_mismatch() {
        let description = json!({"name": "document-store", "dimension": 768, "metric": "cosine"});
        let result = check_existing(&spec(), &description);
        assert!(matches!(
            result,
            Err(IndexError::ConfigMismatch { found_dimension: 768, .. })
        ));

        let matching = json!({"dimension": 1536, "metric": "cosine"});
        assert!(check_existing(&spec(), &matching).is_ok());
    }

    #[test]
    fn match_metadata_round_trips_into_chunk() {
        let hit = json!({
            "id": "abc",
            "score": 0.82,
            "metadata": {
                "text": "page body",
                "source": "doc.pdf",
                "page": 2.0,
                "content_type": "pdf",
                "chunk_index": 4.0
            }
        });

        let entry = match_to_entry(&hit).expect("match should parse");
        assert_eq!(entry.id, "abc");
        assert_eq!(entry.chunk.content, "page body");
        assert_eq!(entry.chunk.metadata.source, "doc.pdf");
        assert_eq!(entry.chunk.metadata.page, Some(2));
        assert_eq!(entry.chunk.metadata.row, None);
        assert_eq!(entry.chunk.metadata.content_type, ContentType::Pdf);
        assert_eq!(entry.chunk.metadata.chunk_index, 4);
    }

    #[test]
    fn stats_can_be_narrowed_to_one_namespace() {
        let payload = json!({
            "namespaces": {
                "default": {"vectorCount": 4},
                "archive": {"vectorCount": 6}
            },
            "dimension": 1536,
            "totalVectorCount": 10
        });

        let all = parse_stats(&payload, None);
        assert_eq!(all.total_vector_count, 10);
        assert_eq!(all.namespace_count("archive"), 6);

        let narrowed = parse_stats(&payload, Some("default"));
        assert_eq!(narrowed.total_vector_count, 4);
        assert_eq!(narrowed.namespaces.len(), 1);
    }

    #[test]
    fn host_gets_https_scheme_and_joins_paths() -> Result<(), IndexError> {
        let url = host_url("document-store-abc.svc.pinecone.io")?;
        assert_eq!(
            url.join("vectors/upsert")?.as_str(),
            "https://document-store-abc.svc.pinecone.io/vectors/upsert"
        );
        Ok(())
    }

    #[test]
    fn data_calls_before_ensure_index_are_not_ready() -> Result<(), IndexError> {
        let index = PineconeIndex::new(PineconeConfig::new("key"))?;
        assert!(matches!(index.data_url("query"), Err(IndexError::NotReady(_))));
        Ok(())
    }

    #[test]
    fn entry_payload_stores_text_and_optional_fields() {
        let entry = IndexEntry {
            id: "id-1".to_string(),
            vector: vec![0.5, 0.5],
            chunk: Chunk {
                content: "name: bolt".to_string(),
                metadata: ChunkMetadata {
                    source: "a.csv".to_string(),
                    page: None,
                    row: Some(0),
                    content_type: ContentType::Tabular,
                    chunk_index: 0,
                },
            },
        };

        let payload = entry_payload(&entry);
        assert_eq!(payload["metadata"]["text"], "name: bolt");
        assert_eq!(payload["metadata"]["content_type"], "tabular");
        assert_eq!(payload["metadata"]["row"], 0);
        assert!(payload["metadata"].get("page").is_none());
    }
}
