// src/tracker/mod.rs — Pipeline outcome tracker
//
// Append-only SQLite log of every pipeline run with full context: task
// classification, profile, rule results, scores, timing. The analytics
// queries feed the profile adapter and the adaptive strategy. Persistence
// errors never reach the request path; callers log and move on.

pub mod profile_adapter;

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::util::query_hash;

pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 86_400);

/// Full context of a single pipeline run. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub query_hash: String,
    pub timestamp: f64,

    pub task_type: String,
    pub risk_level: String,
    pub validation_profile: String,
    pub complexity: String,

    pub n_candidates: u32,
    pub best_score: f64,
    pub all_passed: bool,
    pub generation_time: f64,
    pub validation_time: f64,
    pub total_time: f64,

    // Comma-joined rule names plus the numeric counts
    pub rules_run: String,
    pub rules_passed: String,
    pub rules_failed: String,
    pub n_rules_run: u32,
    pub n_rules_passed: u32,
    pub n_rules_failed: u32,

    pub swecas_code: Option<i64>,
}

impl OutcomeRecord {
    pub fn for_query(query: &str) -> Self {
        Self {
            query_hash: query_hash(query),
            timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            task_type: "general".into(),
            risk_level: "medium".into(),
            validation_profile: "balanced".into(),
            complexity: "moderate".into(),
            n_candidates: 1,
            best_score: 0.0,
            all_passed: false,
            generation_time: 0.0,
            validation_time: 0.0,
            total_time: 0.0,
            rules_run: String::new(),
            rules_passed: String::new(),
            rules_failed: String::new(),
            n_rules_run: 0,
            n_rules_passed: 0,
            n_rules_failed: 0,
            swecas_code: None,
        }
    }
}

/// Confidence report for a profile suggestion.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileConfidence {
    pub suggested_profile: Option<String>,
    pub total_outcomes: i64,
    pub confidence: f64,
    pub avg_score: f64,
    pub alternatives: Vec<ProfileAlternative>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileAlternative {
    pub profile: String,
    pub count: i64,
    pub avg_score: f64,
}

pub struct OutcomeTracker {
    conn: Mutex<Connection>,
    ttl: Duration,
}

impl OutcomeTracker {
    /// File-backed tracker with WAL, or in-memory when `path` is None.
    pub fn new(path: Option<&Path>, ttl: Duration) -> anyhow::Result<Self> {
        let conn = match path {
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
            "CREATE TABLE IF NOT EXISTS outcomes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query_hash TEXT NOT NULL,
                timestamp REAL NOT NULL,
                task_type TEXT NOT NULL,
                risk_level TEXT NOT NULL,
                validation_profile TEXT NOT NULL,
                complexity TEXT NOT NULL,
                n_candidates INTEGER DEFAULT 1,
                best_score REAL DEFAULT 0.0,
                all_passed INTEGER DEFAULT 0,
                generation_time REAL DEFAULT 0.0,
                validation_time REAL DEFAULT 0.0,
                total_time REAL DEFAULT 0.0,
                rules_run TEXT DEFAULT '',
                rules_passed TEXT DEFAULT '',
                rules_failed TEXT DEFAULT '',
                n_rules_run INTEGER DEFAULT 0,
                n_rules_passed INTEGER DEFAULT 0,
                n_rules_failed INTEGER DEFAULT 0,
                swecas_code INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_outcomes_profile
                ON outcomes(validation_profile);
            CREATE INDEX IF NOT EXISTS idx_outcomes_task_type
                ON outcomes(task_type);
            CREATE INDEX IF NOT EXISTS idx_outcomes_timestamp
                ON outcomes(timestamp);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            ttl,
        })
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        Self::new(None, DEFAULT_TTL)
    }

    // ------------------------------------------------------------------
    // Record
    // ------------------------------------------------------------------

    /// Append-only insert; returns the row id.
    pub fn record(&self, outcome: &OutcomeRecord) -> anyhow::Result<i64> {
        let conn = self.conn.lock().expect("tracker lock");
        conn.execute(
            "INSERT INTO outcomes (
                query_hash, timestamp, task_type, risk_level,
                validation_profile, complexity, n_candidates,
                best_score, all_passed,
                generation_time, validation_time, total_time,
                rules_run, rules_passed, rules_failed,
                n_rules_run, n_rules_passed, n_rules_failed,
                swecas_code
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            params![
                outcome.query_hash,
                outcome.timestamp,
                outcome.task_type,
                outcome.risk_level,
                outcome.validation_profile,
                outcome.complexity,
                outcome.n_candidates,
                outcome.best_score,
                outcome.all_passed as i64,
                outcome.generation_time,
                outcome.validation_time,
                outcome.total_time,
                outcome.rules_run,
                outcome.rules_passed,
                outcome.rules_failed,
                outcome.n_rules_run,
                outcome.n_rules_passed,
                outcome.n_rules_failed,
                outcome.swecas_code,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    // ------------------------------------------------------------------
    // Analytics
    // ------------------------------------------------------------------

    /// The profile with the highest average score for similar tasks, or None
    /// below 3 samples.
    pub fn suggest_profile(&self, task_type: &str, complexity: &str) -> anyhow::Result<Option<String>> {
        let conn = self.conn.lock().expect("tracker lock");
        let mut stmt = conn.prepare(
            "SELECT validation_profile, COUNT(*) as count, AVG(best_score) as avg_score
             FROM outcomes
             WHERE task_type = ?1 AND complexity = ?2
             GROUP BY validation_profile
             HAVING count >= 3
             ORDER BY avg_score DESC
             LIMIT 1",
        )?;
        let mut rows = stmt.query(params![task_type, complexity])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// How confident the suggestion is: sample size scaled to 20 plus a
    /// bonus for a clear score gap to the runner-up.
    pub fn get_profile_confidence(
        &self,
        task_type: &str,
        complexity: &str,
    ) -> anyhow::Result<ProfileConfidence> {
        let conn = self.conn.lock().expect("tracker lock");
        let mut stmt = conn.prepare(
            "SELECT validation_profile, COUNT(*) as count, AVG(best_score) as avg_score
             FROM outcomes
             WHERE task_type = ?1 AND complexity = ?2
             GROUP BY validation_profile
             ORDER BY avg_score DESC",
        )?;
        let rows: Vec<(String, i64, f64)> = stmt
            .query_map(params![task_type, complexity], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        if rows.is_empty() {
            return Ok(ProfileConfidence {
                suggested_profile: None,
                total_outcomes: 0,
                confidence: 0.0,
                avg_score: 0.0,
                alternatives: vec![],
            });
        }

        let total: i64 = rows.iter().map(|(_, c, _)| c).sum();
        let (best_profile, best_count, best_score) = rows[0].clone();

        let sample_confidence = (best_count as f64 / 20.0).min(1.0);
        let margin_bonus = if rows.len() > 1 {
            ((best_score - rows[1].2) * 2.0).min(0.2).max(0.0)
        } else {
            0.0
        };

        Ok(ProfileConfidence {
            suggested_profile: if best_count >= 3 { Some(best_profile) } else { None },
            total_outcomes: total,
            confidence: (sample_confidence + margin_bonus).min(1.0),
            avg_score: best_score,
            alternatives: rows[1..]
                .iter()
                .map(|(p, c, s)| ProfileAlternative {
                    profile: p.clone(),
                    count: *c,
                    avg_score: *s,
                })
                .collect(),
        })
    }

    /// Per-profile effectiveness: count, avg score/time, success rate.
    pub fn get_profile_stats(&self) -> anyhow::Result<serde_json::Value> {
        let conn = self.conn.lock().expect("tracker lock");
        let mut stmt = conn.prepare(
            "SELECT validation_profile, COUNT(*) as count,
                    AVG(best_score), AVG(total_time), AVG(validation_time),
                    SUM(CASE WHEN all_passed = 1 THEN 1 ELSE 0 END),
                    AVG(n_rules_run)
             FROM outcomes
             GROUP BY validation_profile",
        )?;
        let mut result = serde_json::Map::new();
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, f64>(2)?,
                r.get::<_, f64>(3)?,
                r.get::<_, f64>(4)?,
                r.get::<_, i64>(5)?,
                r.get::<_, f64>(6)?,
            ))
        })?;
        for row in rows {
            let (profile, count, avg_score, avg_time, avg_val_time, pass_count, avg_rules) = row?;
            result.insert(
                profile,
                serde_json::json!({
                    "count": count,
                    "avg_score": avg_score,
                    "avg_time": avg_time,
                    "avg_validation_time": avg_val_time,
                    "success_rate": if count > 0 { pass_count as f64 / count as f64 } else { 0.0 },
                    "avg_rules": avg_rules,
                }),
            );
        }
        Ok(serde_json::Value::Object(result))
    }

    /// Per-rule run/passed/failed counts derived from the comma-joined
    /// rule name columns.
    pub fn get_rule_effectiveness(&self) -> anyhow::Result<serde_json::Value> {
        let conn = self.conn.lock().expect("tracker lock");
        let mut stmt = conn.prepare("SELECT rules_run, rules_passed, rules_failed FROM outcomes")?;
        let rows: Vec<(String, String, String)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stats: Vec<(String, [i64; 3])> = Vec::new();
        let mut bump = |list: &mut Vec<(String, [i64; 3])>, name: &str, slot: usize| {
            match list.iter_mut().find(|(n, _)| n == name) {
                Some((_, counts)) => counts[slot] += 1,
                None => {
                    let mut counts = [0i64; 3];
                    counts[slot] += 1;
                    list.push((name.to_string(), counts));
                }
            }
        };

        for (run, passed, failed) in &rows {
            for name in run.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                bump(&mut stats, name, 0);
            }
            for name in passed.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                bump(&mut stats, name, 1);
            }
            for name in failed.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                bump(&mut stats, name, 2);
            }
        }

        let mut result = serde_json::Map::new();
        for (name, [run, passed, failed]) in stats {
            result.insert(
                name,
                serde_json::json!({
                    "times_run": run,
                    "times_passed": passed,
                    "times_failed": failed,
                    "fail_rate": if run > 0 { failed as f64 / run as f64 } else { 0.0 },
                }),
            );
        }
        Ok(serde_json::Value::Object(result))
    }

    pub fn get_task_type_stats(&self) -> anyhow::Result<serde_json::Value> {
        let conn = self.conn.lock().expect("tracker lock");
        let mut stmt = conn.prepare(
            "SELECT task_type, COUNT(*) as count, AVG(best_score), AVG(total_time),
                    SUM(CASE WHEN all_passed = 1 THEN 1 ELSE 0 END)
             FROM outcomes
             GROUP BY task_type",
        )?;
        let mut result = serde_json::Map::new();
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, f64>(2)?,
                r.get::<_, f64>(3)?,
                r.get::<_, i64>(4)?,
            ))
        })?;
        for row in rows {
            let (task_type, count, avg_score, avg_time, pass_count) = row?;
            result.insert(
                task_type,
                serde_json::json!({
                    "count": count,
                    "avg_score": avg_score,
                    "avg_time": avg_time,
                    "success_rate": if count > 0 { pass_count as f64 / count as f64 } else { 0.0 },
                }),
            );
        }
        Ok(serde_json::Value::Object(result))
    }

    /// How well risk levels predict outcomes: high risk should correlate
    /// with lower scores and more rule failures.
    pub fn get_risk_accuracy(&self) -> anyhow::Result<serde_json::Value> {
        let conn = self.conn.lock().expect("tracker lock");
        let mut stmt = conn.prepare(
            "SELECT risk_level, COUNT(*) as count, AVG(best_score),
                    SUM(CASE WHEN all_passed = 1 THEN 1 ELSE 0 END),
                    AVG(n_rules_failed)
             FROM outcomes
             GROUP BY risk_level",
        )?;
        let mut result = serde_json::Map::new();
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, f64>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, f64>(4)?,
            ))
        })?;
        for row in rows {
            let (risk, count, avg_score, pass_count, avg_failures) = row?;
            result.insert(
                risk,
                serde_json::json!({
                    "count": count,
                    "avg_score": avg_score,
                    "success_rate": if count > 0 { pass_count as f64 / count as f64 } else { 0.0 },
                    "avg_rule_failures": avg_failures,
                }),
            );
        }
        Ok(serde_json::Value::Object(result))
    }

    /// Overall tracker statistics.
    pub fn get_stats(&self) -> anyhow::Result<serde_json::Value> {
        let conn = self.conn.lock().expect("tracker lock");
        let (total, avg_score, avg_time, passed): (i64, Option<f64>, Option<f64>, Option<i64>) =
            conn.query_row(
                "SELECT COUNT(*), AVG(best_score), AVG(total_time),
                        SUM(CASE WHEN all_passed = 1 THEN 1 ELSE 0 END)
                 FROM outcomes",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )?;
        Ok(serde_json::json!({
            "total_outcomes": total,
            "avg_score": avg_score.unwrap_or(0.0),
            "avg_time": avg_time.unwrap_or(0.0),
            "success_rate": if total > 0 { passed.unwrap_or(0) as f64 / total as f64 } else { 0.0 },
            "ttl_days": self.ttl.as_secs() / 86_400,
        }))
    }

    pub fn get_total_outcomes(&self) -> anyhow::Result<i64> {
        let conn = self.conn.lock().expect("tracker lock");
        Ok(conn.query_row("SELECT COUNT(*) FROM outcomes", [], |r| r.get(0))?)
    }

    pub fn get_recent_outcomes(&self, limit: u32) -> anyhow::Result<Vec<OutcomeRecord>> {
        let conn = self.conn.lock().expect("tracker lock");
        let mut stmt = conn.prepare(
            "SELECT query_hash, timestamp, task_type, risk_level, validation_profile,
                    complexity, n_candidates, best_score, all_passed,
                    generation_time, validation_time, total_time,
                    rules_run, rules_passed, rules_failed,
                    n_rules_run, n_rules_passed, n_rules_failed, swecas_code
             FROM outcomes
             ORDER BY timestamp DESC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |r| {
                Ok(OutcomeRecord {
                    query_hash: r.get(0)?,
                    timestamp: r.get(1)?,
                    task_type: r.get(2)?,
                    risk_level: r.get(3)?,
                    validation_profile: r.get(4)?,
                    complexity: r.get(5)?,
                    n_candidates: r.get(6)?,
                    best_score: r.get(7)?,
                    all_passed: r.get::<_, i64>(8)? != 0,
                    generation_time: r.get(9)?,
                    validation_time: r.get(10)?,
                    total_time: r.get(11)?,
                    rules_run: r.get(12)?,
                    rules_passed: r.get(13)?,
                    rules_failed: r.get(14)?,
                    n_rules_run: r.get(15)?,
                    n_rules_passed: r.get(16)?,
                    n_rules_failed: r.get(17)?,
                    swecas_code: r.get(18)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Free-form insights: the best profile, the most-failing rule, the
    /// weakest task type.
    pub fn get_learning_summary(&self) -> anyhow::Result<serde_json::Value> {
        let profiles = self.get_profile_stats()?;
        let rules = self.get_rule_effectiveness()?;
        let task_types = self.get_task_type_stats()?;
        let risks = self.get_risk_accuracy()?;
        let overall = self.get_stats()?;

        let mut insights: Vec<String> = Vec::new();

        if let Some(obj) = profiles.as_object() {
            if let Some((name, stats)) = obj.iter().max_by(|a, b| {
                let sa = a.1["avg_score"].as_f64().unwrap_or(0.0);
                let sb = b.1["avg_score"].as_f64().unwrap_or(0.0);
                sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal)
            }) {
                insights.push(format!(
                    "Best profile: {} (avg score: {:.4}, success rate: {:.4})",
                    name,
                    stats["avg_score"].as_f64().unwrap_or(0.0),
                    stats["success_rate"].as_f64().unwrap_or(0.0),
                ));
            }
        }

        if let Some(obj) = rules.as_object() {
            let mut problematic: Vec<(&String, f64, i64)> = obj
                .iter()
                .filter_map(|(name, stats)| {
                    let fail_rate = stats["fail_rate"].as_f64()?;
                    let runs = stats["times_run"].as_i64()?;
                    (fail_rate > 0.2 && runs >= 3).then_some((name, fail_rate, runs))
                })
                .collect();
            problematic.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            if let Some((name, fail_rate, runs)) = problematic.first() {
                insights.push(format!(
                    "Most failing rule: {} (fail rate: {:.4}, runs: {})",
                    name, fail_rate, runs
                ));
            }
        }

        if let Some(obj) = task_types.as_object() {
            if let Some((name, stats)) = obj.iter().min_by(|a, b| {
                let sa = a.1["success_rate"].as_f64().unwrap_or(1.0);
                let sb = b.1["success_rate"].as_f64().unwrap_or(1.0);
                sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal)
            }) {
                let rate = stats["success_rate"].as_f64().unwrap_or(1.0);
                if rate < 0.8 {
                    insights.push(format!(
                        "Weakest task type: {} (success rate: {:.4})",
                        name, rate
                    ));
                }
            }
        }

        Ok(serde_json::json!({
            "total_outcomes": overall["total_outcomes"],
            "overall_success_rate": overall["success_rate"],
            "overall_avg_score": overall["avg_score"],
            "profiles": profiles,
            "rules": rules,
            "task_types": task_types,
            "risk_levels": risks,
            "insights": insights,
        }))
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Delete rows older than the TTL; returns the count deleted.
    pub fn cleanup_old(&self, max_age: Option<Duration>) -> anyhow::Result<usize> {
        let ttl = max_age.unwrap_or(self.ttl);
        let cutoff = chrono::Utc::now().timestamp_millis() as f64 / 1000.0 - ttl.as_secs_f64();
        let conn = self.conn.lock().expect("tracker lock");
        let deleted = conn.execute("DELETE FROM outcomes WHERE timestamp < ?1", params![cutoff])?;
        Ok(deleted)
    }
}
