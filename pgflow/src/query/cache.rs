//! SQL hashing used to key the server-side prepared statement cache (§4.4.3).
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Hashes SQL text the same way regardless of process restarts within a
/// run; used purely as an in-memory cache key, never persisted.
pub(crate) fn hash_sql(sql: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    sql.hash(&mut hasher);
    hasher.finish()
}

/// Extracts the row/affected-row count from a `CommandComplete` tag, e.g.
/// `"INSERT 0 5"` or `"SELECT 5"`. The count is always the tag's last
/// whitespace-separated token.
pub(crate) fn rows_affected(tag: &str) -> u64 {
    tag.rsplit(' ').next().and_then(|n| n.parse().ok()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_sql_hashes_equal() {
        assert_eq!(hash_sql("select 1"), hash_sql("select 1"));
        assert_ne!(hash_sql("select 1"), hash_sql("select 2"));
    }

    #[test]
    fn rows_affected_reads_last_token() {
        assert_eq!(rows_affected("INSERT 0 5"), 5);
        assert_eq!(rows_affected("SELECT 5"), 5);
        assert_eq!(rows_affected("DELETE 0"), 0);
    }
}
