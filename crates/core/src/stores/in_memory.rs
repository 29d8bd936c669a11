use crate::models::{IndexEntry, IndexSpec, IndexStats, Metric, MetadataFilter, ScoredEntry};
use crate::traits::VectorIndex;
use crate::IndexError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

const BACKEND: &str = "memory";

/// A single named index held in process.
///
/// Entries keep their first-insertion position; overwriting an id replaces the
/// vector in place. Query results with equal scores come back in that
/// insertion order.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    state: RwLock<State>,
}

#[derive(Debug, Default)]
struct State {
    spec: Option<IndexSpec>,
    namespaces: BTreeMap<String, Namespace>,
}

#[derive(Debug, Default)]
struct Namespace {
    entries: Vec<IndexEntry>,
    positions: HashMap<String, usize>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn spec(&self) -> Option<IndexSpec> {
        self.state.read().await.spec.clone()
    }
}

pub(crate) fn similarity(metric: Metric, left: &[f32], right: &[f32]) -> f32 {
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    match metric {
        Metric::Dotproduct => dot,
        Metric::Cosine => {
            let norm_left = left.iter().map(|value| value * value).sum::<f32>().sqrt();
            let norm_right = right.iter().map(|value| value * value).sum::<f32>().sqrt();
            if norm_left == 0.0 || norm_right == 0.0 {
                0.0
            } else {
                dot / (norm_left * norm_right)
            }
        }
        Metric::Euclidean => {
            let distance = left
                .iter()
                .zip(right)
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f32>()
                .sqrt();
            1.0 / (1.0 + distance)
        }
    }
}

fn ready_spec(state: &State) -> Result<&IndexSpec, IndexError> {
    state
        .spec
        .as_ref()
        .ok_or_else(|| IndexError::NotReady("index has not been created".to_string()))
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn ensure_index(&self, spec: &IndexSpec) -> Result<(), IndexError> {
        let mut state = self.state.write().await;
        let existing = state.spec.get_or_insert_with(|| spec.clone());

        if existing.name != spec.name {
            return Err(IndexError::Service {
                backend: BACKEND.to_string(),
                details: format!("bound to index {}, not {}", existing.name, spec.name),
            });
        }
        if existing.dimension != spec.dimension || existing.metric != spec.metric {
            return Err(IndexError::ConfigMismatch {
                name: spec.name.clone(),
                requested_dimension: spec.dimension,
                requested_metric: spec.metric.as_str().to_string(),
                found_dimension: existing.dimension,
                found_metric: existing.metric.as_str().to_string(),
            });
        }

        Ok(())
    }

    async fn upsert(&self, entries: &[IndexEntry], namespace: &str) -> Result<usize, IndexError> {
        let mut state = self.state.write().await;
        let dimension = ready_spec(&state)?.dimension;

        if let Some(bad) = entries.iter().find(|entry| entry.vector.len() != dimension) {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                got: bad.vector.len(),
            });
        }

        let target = state.namespaces.entry(namespace.to_string()).or_default();
        for entry in entries {
            match target.positions.get(&entry.id) {
                Some(&position) => target.entries[position] = entry.clone(),
                None => {
                    target.positions.insert(entry.id.clone(), target.entries.len());
                    target.entries.push(entry.clone());
                }
            }
        }

        Ok(entries.len())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        namespace: &str,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredEntry>, IndexError> {
        let state = self.state.read().await;
        let spec = ready_spec(&state)?;

        if vector.len() != spec.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: spec.dimension,
                got: vector.len(),
            });
        }

        let Some(target) = state.namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<ScoredEntry> = target
            .entries
            .iter()
            .filter(|entry| filter.map_or(true, |filter| filter.matches(&entry.chunk.metadata)))
            .map(|entry| ScoredEntry {
                id: entry.id.clone(),
                score: similarity(spec.metric, &entry.vector, vector),
                chunk: entry.chunk.clone(),
            })
            .collect();

        scored.sort_by(|left, right| right.score.total_cmp(&left.score));
        scored.truncate(k);
        Ok(scored)
    }

    async fn stats(&self, namespace: Option<&str>) -> Result<IndexStats, IndexError> {
        let state = self.state.read().await;
        ready_spec(&state)?;

        let namespaces: BTreeMap<String, u64> = state
            .namespaces
            .iter()
            .filter(|(name, _)| namespace.map_or(true, |wanted| wanted == name.as_str()))
            .map(|(name, target)| (name.clone(), target.entries.len() as u64))
            .collect();

        Ok(IndexStats {
            total_vector_count: namespaces.values().sum(),
            namespaces,
        })
    }
}
