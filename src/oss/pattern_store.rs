// src/oss/pattern_store.rs — Learned OSS pattern store
//
// Read-mostly collaborator: the pipeline only queries framework/testing
// patterns learned from analyzed repositories. Writers (collectors) are
// external; the insert API exists for them and for tests, serialised
// through the single connection.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};

pub struct PatternStore {
    conn: Mutex<Connection>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternRecord {
    pub repo_name: String,
    pub category: String,
    pub pattern_name: String,
    pub confidence: f64,
}

impl PatternStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("pattern store lock");
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS repos (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                full_name TEXT UNIQUE NOT NULL,
                stars INTEGER DEFAULT 0,
                description TEXT DEFAULT '',
                collected_at REAL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS patterns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                repo_id INTEGER NOT NULL REFERENCES repos(id),
                category TEXT NOT NULL,
                pattern_name TEXT NOT NULL,
                confidence REAL DEFAULT 1.0
            );
            CREATE INDEX IF NOT EXISTS idx_patterns_category ON patterns(category);
            CREATE INDEX IF NOT EXISTS idx_patterns_name ON patterns(pattern_name);",
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Writers (collectors, tests)
    // ------------------------------------------------------------------

    pub fn insert_repo(&self, full_name: &str, stars: i64) -> anyhow::Result<i64> {
        let conn = self.conn.lock().expect("pattern store lock");
        conn.execute(
            "INSERT OR IGNORE INTO repos (full_name, stars) VALUES (?1, ?2)",
            params![full_name, stars],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM repos WHERE full_name = ?1",
            params![full_name],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn insert_pattern(
        &self,
        repo_id: i64,
        category: &str,
        pattern_name: &str,
        confidence: f64,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("pattern store lock");
        conn.execute(
            "INSERT INTO patterns (repo_id, category, pattern_name, confidence)
             VALUES (?1, ?2, ?3, ?4)",
            params![repo_id, category, pattern_name, confidence],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Known framework patterns that appear in the given code.
    pub fn frameworks_in(&self, code: &str) -> anyhow::Result<Vec<String>> {
        let conn = self.conn.lock().expect("pattern store lock");
        let mut stmt = conn.prepare(
            "SELECT DISTINCT pattern_name FROM patterns WHERE category = 'framework'",
        )?;
        let names = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names.into_iter().filter(|n| code.contains(n.as_str())).collect())
    }

    /// Patterns that co-occur with `pattern_name` across repos, most common
    /// first.
    pub fn companion_patterns(&self, pattern_name: &str, limit: u32) -> anyhow::Result<Vec<String>> {
        let conn = self.conn.lock().expect("pattern store lock");
        let mut stmt = conn.prepare(
            "SELECT p2.pattern_name, COUNT(*) as n
             FROM patterns p1
             JOIN patterns p2 ON p1.repo_id = p2.repo_id
             WHERE p1.pattern_name = ?1 AND p2.pattern_name != ?1
             GROUP BY p2.pattern_name
             ORDER BY n DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![pattern_name, limit], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Most common patterns per category.
    pub fn top_patterns(&self, category: &str, limit: u32) -> anyhow::Result<Vec<(String, i64)>> {
        let conn = self.conn.lock().expect("pattern store lock");
        let mut stmt = conn.prepare(
            "SELECT pattern_name, COUNT(*) as n
             FROM patterns
             WHERE category = ?1
             GROUP BY pattern_name
             ORDER BY n DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![category, limit], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Short prompt-context snippet naming the patterns relevant to a query.
    /// Empty string when nothing matches.
    pub fn context_snippet(&self, query: &str, max_patterns: usize) -> anyhow::Result<String> {
        let query_lower = query.to_lowercase();
        let mut relevant: Vec<String> = Vec::new();

        for category in ["framework", "testing"] {
            for (name, _) in self.top_patterns(category, 20)? {
                if query_lower.contains(&name.to_lowercase()) {
                    let companions = self.companion_patterns(&name, 3)?;
                    if companions.is_empty() {
                        relevant.push(format!("{} ({})", name, category));
                    } else {
                        relevant.push(format!(
                            "{} ({}), commonly paired with {}",
                            name,
                            category,
                            companions.join(", ")
                        ));
                    }
                }
                if relevant.len() >= max_patterns {
                    break;
                }
            }
        }

        if relevant.is_empty() {
            Ok(String::new())
        } else {
            Ok(format!(
                "Patterns observed in popular OSS projects:\n- {}",
                relevant.join("\n- ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_store() -> PatternStore {
        let store = PatternStore::in_memory().unwrap();
        let r1 = store.insert_repo("org/web-app", 1200).unwrap();
        let r2 = store.insert_repo("org/api-service", 800).unwrap();
        store.insert_pattern(r1, "framework", "flask", 1.0).unwrap();
        store.insert_pattern(r1, "testing", "pytest", 1.0).unwrap();
        store.insert_pattern(r2, "framework", "flask", 1.0).unwrap();
        store.insert_pattern(r2, "testing", "pytest", 1.0).unwrap();
        store.insert_pattern(r2, "framework", "sqlalchemy", 0.8).unwrap();
        store
    }

    #[test]
    fn test_frameworks_in_code() {
        let store = seeded_store();
        let found = store.frameworks_in("import flask\napp = flask.Flask()").unwrap();
        assert_eq!(found, vec!["flask".to_string()]);
    }

    #[test]
    fn test_frameworks_none_matching() {
        let store = seeded_store();
        assert!(store.frameworks_in("print('hi')").unwrap().is_empty());
    }

    #[test]
    fn test_companion_patterns() {
        let store = seeded_store();
        let companions = store.companion_patterns("flask", 5).unwrap();
        // pytest co-occurs with flask in both repos
        assert_eq!(companions[0], "pytest");
    }

    #[test]
    fn test_top_patterns() {
        let store = seeded_store();
        let top = store.top_patterns("framework", 5).unwrap();
        assert_eq!(top[0].0, "flask");
        assert_eq!(top[0].1, 2);
    }

    #[test]
    fn test_context_snippet_matches_query() {
        let store = seeded_store();
        let snippet = store.context_snippet("build a flask endpoint", 5).unwrap();
        assert!(snippet.contains("flask"));
        assert!(snippet.contains("pytest"));
    }

    #[test]
    fn test_context_snippet_empty_for_unrelated() {
        let store = seeded_store();
        assert!(store.context_snippet("sort a list", 5).unwrap().is_empty());
    }

    #[test]
    fn test_insert_repo_idempotent() {
        let store = PatternStore::in_memory().unwrap();
        let a = store.insert_repo("org/x", 1).unwrap();
        let b = store.insert_repo("org/x", 1).unwrap();
        assert_eq!(a, b);
    }
}
