// src/core/strategy.rs — Adaptive generation strategy
//
// Classifies codegen complexity from keyword patterns and picks the number
// of candidates and the temperature sweep. Learns from recorded outcomes:
// consistently high scores shrink the candidate count, consistently low
// scores grow it. Critical is pinned at 3 candidates.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::types::{Complexity, GenerationPlan};
use crate::util::query_hash;

/// Rough wall-clock estimate per candidate, used for plan estimates.
pub const TIME_PER_CANDIDATE: Duration = Duration::from_secs(20);

/// History rows kept per strategy instance.
pub const MAX_HISTORY: usize = 200;

/// Minimum samples per complexity before any adjustment.
pub const MIN_SAMPLES: usize = 5;

/// Default (n_candidates, temperatures) per complexity.
pub fn default_strategy(complexity: Complexity) -> (u8, Vec<f32>) {
    match complexity {
        Complexity::Trivial => (1, vec![0.2]),
        Complexity::Simple => (1, vec![0.3]),
        Complexity::Moderate => (2, vec![0.2, 0.6]),
        Complexity::Complex => (3, vec![0.2, 0.5, 0.8]),
        Complexity::Critical => (3, vec![0.1, 0.4, 0.7]),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyOutcome {
    pub complexity: Complexity,
    pub n: u8,
    pub best_score: f32,
    pub all_passed: bool,
    pub total_time: f32,
    pub query_hash: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    history: Vec<StrategyOutcome>,
    strategies: HashMap<String, (u8, Vec<f32>)>,
}

struct ComplexityPatterns {
    trivial: Regex,
    simple: Regex,
    complex: Regex,
    critical: Regex,
}

impl Default for ComplexityPatterns {
    fn default() -> Self {
        Self {
            trivial: Regex::new(
                r"(?i)\b(?:hello\s*world|fizz\s*buzz|add\s+two\s+numbers|print\b|one[-\s]liner)",
            )
            .expect("trivial pattern"),
            simple: Regex::new(
                r"(?i)\b(?:sort|reverse|parse\s+json|read\s+a?\s*file|count|sum|filter|fibonacci|palindrome)\b",
            )
            .expect("simple pattern"),
            complex: Regex::new(
                r"(?i)\b(?:middleware|design\s+pattern|rate\s+limit|architecture|concurrent|async|distributed|cache\s+layer|state\s+machine|scheduler)\b",
            )
            .expect("complex pattern"),
            critical: Regex::new(
                r"(?i)\b(?:auth|jwt|oauth|token|encrypt|decrypt|crypto|password|bcrypt|security|secret|vault|tls|certificate)",
            )
            .expect("critical pattern"),
        }
    }
}

pub struct AdaptiveStrategy {
    patterns: ComplexityPatterns,
    strategies: HashMap<Complexity, (u8, Vec<f32>)>,
    history: Vec<StrategyOutcome>,
    history_path: Option<PathBuf>,
    persist: bool,
}

impl AdaptiveStrategy {
    /// In-memory strategy (tests, ephemeral runs).
    pub fn new() -> Self {
        Self::with_persistence(None, false)
    }

    /// Strategy backed by a JSON history file. State is loaded eagerly;
    /// a missing or unreadable file starts fresh.
    pub fn with_persistence(history_path: Option<PathBuf>, persist: bool) -> Self {
        let mut strategies = HashMap::new();
        for c in Complexity::all() {
            strategies.insert(c, default_strategy(c));
        }

        let mut s = Self {
            patterns: ComplexityPatterns::default(),
            strategies,
            history: Vec::new(),
            history_path,
            persist,
        };
        if s.persist {
            s.load();
        }
        s
    }

    // ------------------------------------------------------------------
    // Classification
    // ------------------------------------------------------------------

    /// Classify codegen complexity. SWECAS 500-series forces critical.
    pub fn classify_complexity(&self, query: &str, swecas_code: Option<i64>) -> Complexity {
        if let Some(code) = swecas_code {
            if (500..600).contains(&code) {
                return Complexity::Critical;
            }
        }

        if self.patterns.critical.is_match(query) {
            return Complexity::Critical;
        }
        if self.patterns.complex.is_match(query) {
            return Complexity::Complex;
        }
        if self.patterns.trivial.is_match(query) {
            return Complexity::Trivial;
        }
        if self.patterns.simple.is_match(query) {
            return Complexity::Simple;
        }

        // Length-based fallback: short imperative queries are usually simple.
        if query.split_whitespace().count() <= 4 {
            Complexity::Simple
        } else {
            Complexity::Moderate
        }
    }

    fn keyword_matched(&self, query: &str) -> bool {
        self.patterns.critical.is_match(query)
            || self.patterns.complex.is_match(query)
            || self.patterns.trivial.is_match(query)
            || self.patterns.simple.is_match(query)
    }

    /// Produce a generation plan for a query.
    pub fn get_strategy(&self, query: &str, swecas_code: Option<i64>) -> GenerationPlan {
        let complexity = self.classify_complexity(query, swecas_code);
        let (n, temperatures) = self
            .strategies
            .get(&complexity)
            .cloned()
            .unwrap_or_else(|| default_strategy(complexity));

        let swecas_forced = swecas_code.map(|c| (500..600).contains(&c)).unwrap_or(false);
        let mut reasoning = format!("{} complexity, {} candidate(s)", complexity, n);
        if swecas_forced {
            reasoning = format!(
                "SWECAS {} (security) forces critical; {}",
                swecas_code.unwrap_or(0),
                reasoning
            );
        }

        let confidence = if swecas_forced || self.keyword_matched(query) {
            0.92
        } else {
            0.7
        };

        GenerationPlan {
            n_candidates: n,
            temperatures,
            complexity,
            estimated_time: TIME_PER_CANDIDATE * n as u32,
            reasoning,
            confidence,
        }
    }

    // ------------------------------------------------------------------
    // Learning
    // ------------------------------------------------------------------

    /// Record a pipeline outcome against the plan that produced it and
    /// adjust the per-complexity strategy when evidence is sufficient.
    pub fn record_outcome(
        &mut self,
        plan: &GenerationPlan,
        best_score: f32,
        all_passed: bool,
        total_time: f32,
        query: &str,
    ) {
        self.history.push(StrategyOutcome {
            complexity: plan.complexity,
            n: plan.n_candidates,
            best_score,
            all_passed,
            total_time,
            query_hash: query_hash(query),
        });
        if self.history.len() > MAX_HISTORY {
            let overflow = self.history.len() - MAX_HISTORY;
            self.history.drain(..overflow);
        }

        self.adjust(plan.complexity);

        if self.persist {
            if let Err(e) = self.save() {
                tracing::warn!("Failed to persist adaptive history: {}", e);
            }
        }
    }

    fn adjust(&mut self, complexity: Complexity) {
        // Critical is pinned: breadth never shrinks below 3.
        if complexity == Complexity::Critical {
            return;
        }

        let rows: Vec<&StrategyOutcome> = self
            .history
            .iter()
            .filter(|o| o.complexity == complexity)
            .collect();
        if rows.len() < MIN_SAMPLES {
            return;
        }

        let mean_score: f32 = rows.iter().map(|o| o.best_score).sum::<f32>() / rows.len() as f32;
        let pass_rate: f32 =
            rows.iter().filter(|o| o.all_passed).count() as f32 / rows.len() as f32;

        let (current_n, _) = self
            .strategies
            .get(&complexity)
            .cloned()
            .unwrap_or_else(|| default_strategy(complexity));

        let new_n = if mean_score >= 0.9 && pass_rate >= 0.9 {
            current_n.saturating_sub(1).max(1)
        } else if mean_score < 0.6 || pass_rate < 0.5 {
            (current_n + 1).min(3)
        } else {
            current_n
        };

        if new_n != current_n {
            let temps = recenter_temperatures(complexity, new_n);
            tracing::info!(
                "Adaptive strategy: {} n {} -> {} (mean {:.2}, pass rate {:.2})",
                complexity,
                current_n,
                new_n,
                mean_score,
                pass_rate
            );
            self.strategies.insert(complexity, (new_n, temps));
        }
    }

    /// Current (n, temperatures) for a complexity.
    pub fn current(&self, complexity: Complexity) -> (u8, Vec<f32>) {
        self.strategies
            .get(&complexity)
            .cloned()
            .unwrap_or_else(|| default_strategy(complexity))
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    fn load(&mut self) {
        let Some(path) = self.history_path.clone() else {
            return;
        };
        let Ok(content) = std::fs::read_to_string(&path) else {
            return;
        };
        match serde_json::from_str::<PersistedState>(&content) {
            Ok(state) => {
                self.history = state.history;
                for (name, (n, temps)) in state.strategies {
                    if let Some(c) = Complexity::parse(&name) {
                        self.strategies.insert(c, (n.clamp(1, 3), temps));
                    }
                }
            }
            Err(e) => tracing::warn!("Ignoring corrupt adaptive history {:?}: {}", path, e),
        }
    }

    /// Atomic write: serialise to a temp file in the target directory, then
    /// rename over the destination.
    fn save(&self) -> anyhow::Result<()> {
        let Some(path) = &self.history_path else {
            return Ok(());
        };
        let state = PersistedState {
            history: self.history.clone(),
            strategies: self
                .strategies
                .iter()
                .map(|(c, v)| (c.as_str().to_string(), v.clone()))
                .collect(),
        };
        let dir = path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir)?;
        let tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&tmp, &state)?;
        tmp.persist(path)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Stats
    // ------------------------------------------------------------------

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn get_stats(&self) -> serde_json::Value {
        let mut distribution: HashMap<&str, usize> = HashMap::new();
        let mut score_sums: HashMap<&str, (f32, usize)> = HashMap::new();
        for o in &self.history {
            let key = o.complexity.as_str();
            *distribution.entry(key).or_default() += 1;
            let e = score_sums.entry(key).or_insert((0.0, 0));
            e.0 += o.best_score;
            e.1 += 1;
        }

        let avg_scores: HashMap<&str, f32> = score_sums
            .into_iter()
            .map(|(k, (sum, n))| (k, sum / n as f32))
            .collect();

        let current: HashMap<&str, serde_json::Value> = Complexity::all()
            .iter()
            .map(|c| {
                let (n, temps) = self.current(*c);
                (c.as_str(), serde_json::json!({"n": n, "temperatures": temps}))
            })
            .collect();

        serde_json::json!({
            "total_outcomes": self.history.len(),
            "complexity_distribution": distribution,
            "avg_scores": avg_scores,
            "current_strategies": current,
        })
    }
}

impl Default for AdaptiveStrategy {
    fn default() -> Self {
        Self::new()
    }
}

/// Temperatures for an adjusted n: the first n entries of the complexity's
/// default sweep.
pub fn recenter_temperatures(complexity: Complexity, n: u8) -> Vec<f32> {
    let (_, defaults) = default_strategy(complexity);
    let n = n.clamp(1, 3) as usize;
    if n <= defaults.len() {
        defaults[..n].to_vec()
    } else {
        let mut temps = defaults.clone();
        while temps.len() < n {
            temps.push(*temps.last().unwrap_or(&0.5));
        }
        temps
    }
}

/// Wall-clock budget split for one run: the generation step is the critical
/// step and receives `critical_share` of the total, divided evenly across
/// candidates; validation gets the remainder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeBudget {
    pub per_candidate_generation: Duration,
    pub validation: Duration,
}

pub fn allocate_budget(total: Duration, n_candidates: u8, critical_share: f32) -> TimeBudget {
    let share = critical_share.clamp(0.01, 0.99);
    let generation = total.mul_f32(share);
    let n = n_candidates.max(1) as u32;
    TimeBudget {
        per_candidate_generation: generation / n,
        validation: total - generation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // ─── Complexity classification ──────────────────────────────

    #[test]
    fn test_trivial_hello_world() {
        let s = AdaptiveStrategy::new();
        assert_eq!(
            s.classify_complexity("write hello world", None),
            Complexity::Trivial
        );
        assert_eq!(
            s.classify_complexity("Write a fizzbuzz program", None),
            Complexity::Trivial
        );
    }

    #[test]
    fn test_simple_sort() {
        let s = AdaptiveStrategy::new();
        assert_eq!(
            s.classify_complexity("write a sort function", None),
            Complexity::Simple
        );
        assert_eq!(
            s.classify_complexity("parse json from a string", None),
            Complexity::Simple
        );
    }

    #[test]
    fn test_moderate_fallback_by_length() {
        let s = AdaptiveStrategy::new();
        let query =
            "write a function that takes a list of items and does something interesting with them";
        assert_eq!(s.classify_complexity(query, None), Complexity::Moderate);
    }

    #[test]
    fn test_complex_middleware() {
        let s = AdaptiveStrategy::new();
        assert_eq!(
            s.classify_complexity("implement API middleware for rate limiting", None),
            Complexity::Complex
        );
        assert_eq!(
            s.classify_complexity("write a design pattern for observer", None),
            Complexity::Complex
        );
    }

    #[test]
    fn test_critical_auth() {
        let s = AdaptiveStrategy::new();
        assert_eq!(
            s.classify_complexity("implement JWT auth for users", None),
            Complexity::Critical
        );
        assert_eq!(
            s.classify_complexity("implement password hashing with bcrypt", None),
            Complexity::Critical
        );
    }

    #[test]
    fn test_swecas_override_to_critical() {
        let s = AdaptiveStrategy::new();
        assert_eq!(
            s.classify_complexity("write hello world", Some(512)),
            Complexity::Critical
        );
        assert_eq!(
            s.classify_complexity("write hello world", Some(100)),
            Complexity::Trivial
        );
    }

    #[test]
    fn test_case_insensitive() {
        let s = AdaptiveStrategy::new();
        assert_eq!(
            s.classify_complexity("WRITE JWT AUTH", None),
            Complexity::Critical
        );
    }

    // ─── Strategy selection ─────────────────────────────────────

    #[test]
    fn test_trivial_strategy() {
        let s = AdaptiveStrategy::new();
        let plan = s.get_strategy("write hello world", None);
        assert_eq!(plan.n_candidates, 1);
        assert_eq!(plan.temperatures, vec![0.2]);
        assert_eq!(plan.complexity, Complexity::Trivial);
    }

    #[test]
    fn test_critical_strategy() {
        let s = AdaptiveStrategy::new();
        let plan = s.get_strategy("implement JWT auth with token refresh", None);
        assert_eq!(plan.n_candidates, 3);
        assert_eq!(plan.temperatures, vec![0.1, 0.4, 0.7]);
    }

    #[test]
    fn test_moderate_strategy() {
        let s = AdaptiveStrategy::new();
        let query =
            "write a function that takes a list of items and does something interesting with them";
        let plan = s.get_strategy(query, None);
        assert_eq!(plan.n_candidates, 2);
        assert_eq!(plan.temperatures, vec![0.2, 0.6]);
    }

    #[test]
    fn test_temperatures_monotone_in_unit_interval() {
        let s = AdaptiveStrategy::new();
        for query in [
            "write hello world",
            "sort a list",
            "implement API middleware for rate limiting",
            "implement JWT auth",
        ] {
            let plan = s.get_strategy(query, None);
            assert!((1..=3).contains(&plan.n_candidates));
            let mut prev = -1.0f32;
            for t in &plan.temperatures {
                assert!(*t >= 0.0 && *t <= 1.0);
                assert!(*t >= prev);
                prev = *t;
            }
        }
    }

    #[test]
    fn test_reasoning_includes_complexity() {
        let s = AdaptiveStrategy::new();
        let plan = s.get_strategy("write hello world", None);
        assert!(plan.reasoning.contains("trivial"));
    }

    #[test]
    fn test_reasoning_includes_swecas() {
        let s = AdaptiveStrategy::new();
        let plan = s.get_strategy("write code for this", Some(512));
        assert!(plan.reasoning.contains("SWECAS"));
        assert!(plan.reasoning.contains("512"));
    }

    #[test]
    fn test_estimated_time() {
        let s = AdaptiveStrategy::new();
        let plan = s.get_strategy("write hello world", None);
        assert_eq!(plan.estimated_time, TIME_PER_CANDIDATE);
    }

    #[test]
    fn test_confidence_high_for_keyword_match() {
        let s = AdaptiveStrategy::new();
        let plan = s.get_strategy("implement JWT auth", None);
        assert!(plan.confidence >= 0.9);
    }

    // ─── History and learning ───────────────────────────────────

    fn record_n(s: &mut AdaptiveStrategy, query: &str, n: usize, score: f32, passed: bool) {
        for _ in 0..n {
            let plan = s.get_strategy(query, None);
            s.record_outcome(&plan, score, passed, 20.0, query);
        }
    }

    #[test]
    fn test_record_adds_to_history() {
        let mut s = AdaptiveStrategy::new();
        record_n(&mut s, "write hello world", 1, 0.95, true);
        assert_eq!(s.history_len(), 1);
    }

    #[test]
    fn test_history_capped_at_max() {
        let mut s = AdaptiveStrategy::new();
        record_n(&mut s, "sort a list", 250, 0.8, true);
        assert_eq!(s.history_len(), MAX_HISTORY);
    }

    #[test]
    fn test_downgrade_on_high_scores() {
        let mut s = AdaptiveStrategy::new();
        let query =
            "write a function that takes a list of items and does something interesting with them";
        assert_eq!(s.current(Complexity::Moderate).0, 2);
        record_n(&mut s, query, 10, 0.95, true);
        assert!(s.current(Complexity::Moderate).0 < 2);
    }

    #[test]
    fn test_upgrade_on_low_scores() {
        let mut s = AdaptiveStrategy::new();
        assert_eq!(s.current(Complexity::Simple).0, 1);
        record_n(&mut s, "sort a list", 10, 0.5, false);
        assert!(s.current(Complexity::Simple).0 > 1);
    }

    #[test]
    fn test_min_samples_required() {
        let mut s = AdaptiveStrategy::new();
        record_n(&mut s, "sort a list", 4, 0.5, false);
        assert_eq!(s.current(Complexity::Simple), default_strategy(Complexity::Simple));
    }

    #[test]
    fn test_critical_never_downgraded() {
        let mut s = AdaptiveStrategy::new();
        record_n(&mut s, "implement JWT auth", 10, 0.99, true);
        assert_eq!(s.current(Complexity::Critical).0, 3);
    }

    #[test]
    fn test_adjusted_n_stays_in_bounds() {
        let mut s = AdaptiveStrategy::new();
        record_n(&mut s, "sort a list", 50, 0.1, false);
        let (n, temps) = s.current(Complexity::Simple);
        assert!((1..=3).contains(&n));
        assert_eq!(temps.len(), n as usize);
    }

    // ─── Persistence ────────────────────────────────────────────

    #[test]
    fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        let mut s1 = AdaptiveStrategy::with_persistence(Some(path.clone()), true);
        let plan = s1.get_strategy("write hello world", None);
        s1.record_outcome(&plan, 0.9, true, 22.0, "write hello world");
        assert!(path.exists());

        let s2 = AdaptiveStrategy::with_persistence(Some(path), true);
        assert_eq!(s2.history_len(), 1);
    }

    #[test]
    fn test_no_persist_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let mut s = AdaptiveStrategy::with_persistence(Some(path.clone()), false);
        let plan = s.get_strategy("write hello world", None);
        s.record_outcome(&plan, 0.9, true, 20.0, "test");
        assert!(!path.exists());
    }

    #[test]
    fn test_corrupt_history_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "{not valid json").unwrap();
        let s = AdaptiveStrategy::with_persistence(Some(path), true);
        assert_eq!(s.history_len(), 0);
    }

    // ─── Stats ──────────────────────────────────────────────────

    #[test]
    fn test_empty_stats() {
        let s = AdaptiveStrategy::new();
        let stats = s.get_stats();
        assert_eq!(stats["total_outcomes"], 0);
        assert!(stats["current_strategies"]["trivial"].is_object());
    }

    #[test]
    fn test_stats_with_history() {
        let mut s = AdaptiveStrategy::new();
        record_n(&mut s, "write hello world", 1, 0.9, true);
        let stats = s.get_stats();
        assert_eq!(stats["total_outcomes"], 1);
        assert_eq!(stats["complexity_distribution"]["trivial"], 1);
        assert!((stats["avg_scores"]["trivial"].as_f64().unwrap() - 0.9).abs() < 0.001);
    }

    // ─── Recentre + budget ──────────────────────────────────────

    #[test]
    fn test_recenter_prefix() {
        assert_eq!(recenter_temperatures(Complexity::Complex, 2), vec![0.2, 0.5]);
        assert_eq!(recenter_temperatures(Complexity::Moderate, 1), vec![0.2]);
    }

    #[test]
    fn test_recenter_extends_when_needed() {
        let temps = recenter_temperatures(Complexity::Simple, 3);
        assert_eq!(temps.len(), 3);
    }

    #[test]
    fn test_budget_split() {
        let b = allocate_budget(Duration::from_secs(100), 2, 0.5);
        assert_eq!(b.per_candidate_generation, Duration::from_secs(25));
        assert_eq!(b.validation, Duration::from_secs(50));
    }

    #[test]
    fn test_budget_share_clamped() {
        let b = allocate_budget(Duration::from_secs(100), 1, 1.5);
        assert!(b.validation > Duration::ZERO);
    }
}
