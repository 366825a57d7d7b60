// src/router/neural.rs — Tier-1 embedding classifier
//
// Encodes the labelled examples once at startup and classifies queries by
// cosine similarity with top-k weighted voting. Every routed query can be
// recorded to a SQLite learning DB; retraining folds accepted corrections
// into the example set and swaps in a freshly built index.

use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use rusqlite::{params, Connection};

use super::params::extract_params;
use super::training::{training_examples, TOOL_NAMES};
use super::{RouteMethod, RouteResult};
use crate::provider::GenerationBackend;

/// Immutable after build; retrain builds a fresh one and swaps.
struct Index {
    embeddings: Vec<Vec<f32>>,
    labels: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NeuralClassification {
    pub tool: String,
    pub confidence: f32,
    /// (tool, normalized vote weight), strongest first.
    pub top_matches: Vec<(String, f32)>,
    pub embedding_time_ms: f32,
}

#[derive(Debug, Default, Clone)]
struct RouterStats {
    total_classifications: u64,
    miss_count: u64,
}

pub struct NeuralRouter {
    backend: Arc<dyn GenerationBackend>,
    index: RwLock<Arc<Index>>,
    training: Mutex<Vec<(String, String)>>,
    db: Mutex<Connection>,
    stats: Mutex<RouterStats>,
    top_k: usize,
}

fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

impl NeuralRouter {
    /// Build the router: load examples, embed them through the backend, and
    /// open the learning database. An embedding failure propagates so the
    /// hybrid router can mark tier 1 unavailable.
    pub async fn build(
        backend: Arc<dyn GenerationBackend>,
        db_path: Option<&Path>,
        top_k: usize,
    ) -> anyhow::Result<Self> {
        let training: Vec<(String, String)> = training_examples()
            .into_iter()
            .map(|(tool, text)| (tool.to_string(), text.to_string()))
            .collect();

        let index = Self::build_index(&backend, &training).await?;

        let conn = match db_path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let conn = Connection::open(path)?;
                conn.pragma_update(None, "journal_mode", "WAL")?;
                conn
            }
            None => Connection::open_in_memory()?,
        };
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS routing_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query TEXT NOT NULL,
                predicted_tool TEXT,
                predicted_confidence REAL,
                actual_tool TEXT,
                correct BOOLEAN,
                timestamp REAL
            );
            CREATE TABLE IF NOT EXISTS custom_examples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query TEXT NOT NULL,
                tool TEXT NOT NULL,
                source TEXT DEFAULT 'history',
                created_at REAL
            );",
        )?;

        tracing::info!(
            "Neural router index built: {} examples, dim {}",
            index.labels.len(),
            index.embeddings.first().map(|e| e.len()).unwrap_or(0)
        );

        Ok(Self {
            backend,
            index: RwLock::new(Arc::new(index)),
            training: Mutex::new(training),
            db: Mutex::new(conn),
            stats: Mutex::new(RouterStats::default()),
            top_k: top_k.max(1),
        })
    }

    async fn build_index(
        backend: &Arc<dyn GenerationBackend>,
        training: &[(String, String)],
    ) -> anyhow::Result<Index> {
        let texts: Vec<&str> = training.iter().map(|(_, t)| t.as_str()).collect();
        let raw = backend
            .embed(&texts)
            .await
            .map_err(|e| anyhow::anyhow!("embedding backend unavailable: {}", e))?;
        if raw.len() != training.len() || raw.iter().any(|v| v.is_empty()) {
            anyhow::bail!("embedding backend returned {} vectors for {} texts", raw.len(), training.len());
        }
        Ok(Index {
            embeddings: raw.into_iter().map(normalize).collect(),
            labels: training.iter().map(|(tool, _)| tool.clone()).collect(),
        })
    }

    pub fn n_examples(&self) -> usize {
        self.index.read().expect("index lock").labels.len()
    }

    /// Classify a query by top-k weighted voting over cosine similarity.
    pub async fn classify(&self, query: &str) -> anyhow::Result<NeuralClassification> {
        let start = Instant::now();
        let raw = self
            .backend
            .embed(&[query])
            .await
            .map_err(|e| anyhow::anyhow!("embedding failed: {}", e))?;
        let q = normalize(raw.into_iter().next().unwrap_or_default());
        let index = self.index.read().expect("index lock").clone();

        let mut sims: Vec<(usize, f32)> = index
            .embeddings
            .iter()
            .enumerate()
            .map(|(i, e)| (i, dot(&q, e)))
            .collect();
        sims.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));

        let mut votes: Vec<(String, f32)> = Vec::new();
        for (idx, sim) in sims.iter().take(self.top_k) {
            let tool = &index.labels[*idx];
            let weight = sim.max(0.0);
            match votes.iter_mut().find(|(t, _)| t == tool) {
                Some((_, w)) => *w += weight,
                None => votes.push((tool.clone(), weight)),
            }
        }

        let elapsed_ms = start.elapsed().as_secs_f32() * 1000.0;
        let total_weight: f32 = votes.iter().map(|(_, w)| w).sum();

        {
            let mut stats = self.stats.lock().expect("stats lock");
            stats.total_classifications += 1;
            if total_weight <= 0.0 {
                stats.miss_count += 1;
            }
        }

        if total_weight <= 0.0 {
            return Ok(NeuralClassification {
                tool: "unknown".into(),
                confidence: 0.0,
                top_matches: vec![],
                embedding_time_ms: elapsed_ms,
            });
        }

        votes.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let top_matches: Vec<(String, f32)> = votes
            .iter()
            .map(|(t, w)| (t.clone(), w / total_weight))
            .collect();
        let (best_tool, best_weight) = votes[0].clone();

        Ok(NeuralClassification {
            tool: best_tool,
            confidence: best_weight / total_weight,
            top_matches,
            embedding_time_ms: elapsed_ms,
        })
    }

    /// Full route: classify + extract parameters. None below the confidence
    /// threshold.
    pub async fn route(&self, query: &str, min_confidence: f32) -> anyhow::Result<Option<RouteResult>> {
        let classification = self.classify(query).await?;
        if classification.confidence < min_confidence || classification.tool == "unknown" {
            return Ok(None);
        }
        Ok(Some(RouteResult {
            params: extract_params(query, &classification.tool),
            tool: classification.tool,
            confidence: classification.confidence,
            method: RouteMethod::Neural,
        }))
    }

    // ------------------------------------------------------------------
    // Learning
    // ------------------------------------------------------------------

    /// Record a routing outcome. A wrong prediction with a known actual tool
    /// is also stored as a custom example for the next retrain.
    pub fn record_outcome(
        &self,
        query: &str,
        predicted_tool: Option<&str>,
        predicted_confidence: f32,
        actual_tool: &str,
    ) -> anyhow::Result<()> {
        let correct = predicted_tool == Some(actual_tool);
        let now = chrono::Utc::now().timestamp() as f64;
        let conn = self.db.lock().expect("db lock");
        conn.execute(
            "INSERT INTO routing_history
             (query, predicted_tool, predicted_confidence, actual_tool, correct, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![query, predicted_tool, predicted_confidence, actual_tool, correct, now],
        )?;
        if !correct && TOOL_NAMES.contains(&actual_tool) {
            conn.execute(
                "INSERT INTO custom_examples (query, tool, source, created_at)
                 VALUES (?1, ?2, 'history', ?3)",
                params![query, actual_tool, now],
            )?;
        }
        Ok(())
    }

    pub fn add_custom_example(&self, query: &str, tool: &str) -> anyhow::Result<()> {
        let now = chrono::Utc::now().timestamp() as f64;
        let conn = self.db.lock().expect("db lock");
        conn.execute(
            "INSERT INTO custom_examples (query, tool, source, created_at)
             VALUES (?1, ?2, 'manual', ?3)",
            params![query, tool, now],
        )?;
        Ok(())
    }

    /// Fold stored custom examples into the training set and rebuild the
    /// index. The new index is swapped in atomically; concurrent readers
    /// keep using the old one until the swap. Returns the number of new
    /// examples added.
    pub async fn retrain_from_history(&self) -> anyhow::Result<usize> {
        let rows: Vec<(String, String)> = {
            let conn = self.db.lock().expect("db lock");
            let mut stmt = conn.prepare("SELECT query, tool FROM custom_examples")?;
            let rows = stmt
                .query_map([], |r| Ok((r.get::<_, String>(1)?, r.get::<_, String>(0)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        if rows.is_empty() {
            return Ok(0);
        }

        let new_training = {
            let mut training = self.training.lock().expect("training lock");
            let mut added = 0usize;
            for (tool, query) in rows {
                if TOOL_NAMES.contains(&tool.as_str())
                    && !training.iter().any(|(t, q)| *t == tool && *q == query)
                {
                    training.push((tool, query));
                    added += 1;
                }
            }
            if added == 0 {
                return Ok(0);
            }
            (training.clone(), added)
        };

        let (training, added) = new_training;
        let index = Self::build_index(&self.backend, &training).await?;
        *self.index.write().expect("index lock") = Arc::new(index);
        tracing::info!("Neural router retrained with {} new examples", added);
        Ok(added)
    }

    // ------------------------------------------------------------------
    // Stats
    // ------------------------------------------------------------------

    pub fn get_stats(&self) -> anyhow::Result<serde_json::Value> {
        let (history, correct, custom) = {
            let conn = self.db.lock().expect("db lock");
            let history: i64 =
                conn.query_row("SELECT COUNT(*) FROM routing_history", [], |r| r.get(0))?;
            let correct: i64 = conn.query_row(
                "SELECT COUNT(*) FROM routing_history WHERE correct = 1",
                [],
                |r| r.get(0),
            )?;
            let custom: i64 =
                conn.query_row("SELECT COUNT(*) FROM custom_examples", [], |r| r.get(0))?;
            (history, correct, custom)
        };
        let stats = self.stats.lock().expect("stats lock").clone();

        Ok(serde_json::json!({
            "total_training_examples": self.n_examples(),
            "total_classifications": stats.total_classifications,
            "miss_count": stats.miss_count,
            "history_records": history,
            "history_accuracy": if history > 0 { correct as f64 / history as f64 } else { 0.0 },
            "custom_examples": custom,
        }))
    }
}
