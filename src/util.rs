// src/util.rs — Small shared helpers

use sha2::{Digest, Sha256};

/// Short stable hash for grouping similar queries.
pub fn query_hash(query: &str) -> String {
    let digest = Sha256::digest(query.as_bytes());
    hex::encode(digest)[..12].to_string()
}

/// Deterministic per-candidate seed derived from the task id and index.
pub fn candidate_seed(task_id: &str, index: u32) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(task_id.as_bytes());
    hasher.update(index.to_le_bytes());
    let digest = hasher.finalize();
    u64::from_le_bytes(digest[..8].try_into().expect("digest is at least 8 bytes"))
}

/// Last path component, handling both separators.
pub fn basename(path: &str) -> &str {
    if path.is_empty() {
        return "?";
    }
    path.trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(path)
}

/// Truncate to at most `max` characters, on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
