//! SQL text helpers: classification, normalization, identifier quoting,
//! and the statement rewriting used by the insert/update builders.
//!
//! All matching is case-insensitive with dot-matches-newline, so multi-line
//! statements classify the same as single-line ones.

use std::sync::LazyLock;

use regex::Regex;

static RE_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static RE_SELECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^\s*select\s+.*from\s").unwrap());
static RE_INSERT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^\s*(?:insert|replace)\s+.*into\s").unwrap());
static RE_UPDATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^\s*update\s+.*set\s").unwrap());
static RE_DELETE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^\s*delete\s+.*from\s").unwrap());
static RE_LIMITED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\s+limit\s+\d+").unwrap());
static RE_INSERT_HEAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^(\s*(?:insert|replace)\s+.*into\s+[`.\w]+)(.*)$").unwrap());
static RE_UPDATE_HEAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^(\s*update\s+[`.\w]+)\s+(.*)$").unwrap());

/// Collapse all whitespace runs (including newlines) to single spaces.
///
/// Used to keep multi-line statements on one log line.
pub fn inline(sql: &str) -> String {
    RE_WHITESPACE.replace_all(sql, " ").into_owned()
}

/// Backtick-quote a column or table name.
pub fn identifier(name: &str) -> String {
    format!("`{name}`")
}

/// Backtick-quote a sequence of names, preserving order.
pub fn identifiers<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|n| identifier(n.as_ref()))
        .collect()
}

/// Whether the statement reads rows (`select ... from ...`).
pub fn is_select(sql: &str) -> bool {
    RE_SELECT.is_match(sql)
}

/// Whether the statement inserts rows (`insert`/`replace ... into ...`).
pub fn is_insert(sql: &str) -> bool {
    RE_INSERT.is_match(sql)
}

/// Whether the statement updates rows (`update ... set ...`).
pub fn is_update(sql: &str) -> bool {
    RE_UPDATE.is_match(sql)
}

/// Whether the statement deletes rows (`delete ... from ...`).
pub fn is_delete(sql: &str) -> bool {
    RE_DELETE.is_match(sql)
}

/// Whether the statement writes (insert, update, or delete).
pub fn is_write(sql: &str) -> bool {
    is_insert(sql) || is_update(sql) || is_delete(sql)
}

/// Anything that is not a write counts as a read.
pub fn is_read(sql: &str) -> bool {
    !is_write(sql)
}

/// Whether the statement already carries a `limit N` clause.
pub fn is_limited(sql: &str) -> bool {
    RE_LIMITED.is_match(sql)
}

/// Append `limit n` to an unlimited SELECT; any other statement is
/// returned unchanged.
pub fn limit(sql: &str, n: u64) -> String {
    if is_select(sql) && !is_limited(sql) {
        format!("{} limit {n}", sql.trim_end())
    } else {
        sql.to_string()
    }
}

/// Split an insert/replace statement after the table name.
///
/// `"insert ignore into t (a) values (1)"` splits into
/// `("insert ignore into t", "(a) values (1)")`. Returns `None` when the
/// statement does not open with an insert/replace verb.
pub(crate) fn insert_parts(sql: &str) -> Option<(String, String)> {
    RE_INSERT_HEAD.captures(sql).map(|caps| {
        (
            caps[1].trim().to_string(),
            caps[2].trim().to_string(),
        )
    })
}

/// Split an update statement after the table name.
///
/// `"update t set a = 1 where id = 2"` splits into
/// `("update t", "set a = 1 where id = 2")`.
pub(crate) fn update_parts(sql: &str) -> Option<(String, String)> {
    RE_UPDATE_HEAD.captures(sql).map(|caps| {
        (
            caps[1].trim().to_string(),
            caps[2].trim().to_string(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_collapses_whitespace() {
        assert_eq!(
            inline("select *\n  from t\twhere id = 1"),
            "select * from t where id = 1"
        );
    }

    #[test]
    fn test_inline_is_idempotent() {
        let once = inline("select *\n\n  from\tt");
        assert_eq!(inline(&once), once);
    }

    #[test]
    fn test_identifier_quoting() {
        assert_eq!(identifier("name"), "`name`");
        assert_eq!(identifiers(["a", "b"]), vec!["`a`", "`b`"]);
    }

    #[test]
    fn test_classification() {
        assert!(is_select("  SELECT id\nFROM users"));
        assert!(!is_select("select 1"));
        assert!(is_insert("insert ignore into t values (1)"));
        assert!(is_insert("replace into t values (1)"));
        assert!(is_update("update t set a = 1"));
        assert!(is_delete("delete from t where id = 1"));
        assert!(is_write("DELETE FROM t"));
        assert!(is_read("show tables"));
        assert!(!is_read("update t set a = 1"));
    }

    #[test]
    fn test_is_limited() {
        assert!(is_limited("select * from t limit 10"));
        assert!(is_limited("select * from t LIMIT 5 offset 20"));
        assert!(!is_limited("select * from t"));
    }

    #[test]
    fn test_limit_appends_only_to_unlimited_select() {
        assert_eq!(limit("select * from t\n", 1), "select * from t limit 1");
        assert_eq!(limit("select * from t limit 3", 1), "select * from t limit 3");
        assert_eq!(limit("delete from t", 1), "delete from t");
    }

    #[test]
    fn test_insert_parts() {
        let (head, tail) = insert_parts("insert ignore into db.t (a) values (1)").unwrap();
        assert_eq!(head, "insert ignore into db.t");
        assert_eq!(tail, "(a) values (1)");
        assert!(insert_parts("select * from t").is_none());
    }

    #[test]
    fn test_update_parts() {
        let (head, rest) = update_parts("update `t` set a = 1 where id = 2").unwrap();
        assert_eq!(head, "update `t`");
        assert_eq!(rest, "set a = 1 where id = 2");
        assert!(update_parts("delete from t").is_none());
    }
}
