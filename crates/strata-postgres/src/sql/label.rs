use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

static INTO_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bINTO\s+([A-Za-z0-9_."]+)"#).expect("INTO pattern is valid")
});

static UPDATE_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bUPDATE\s+([A-Za-z0-9_."]+)"#).expect("UPDATE pattern is valid")
});

static FROM_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bFROM\s+([A-Za-z0-9_."]+)"#).expect("FROM pattern is valid")
});

/// Short advisory label identifying a query in logs.
///
/// Takes the form `"<OPERATION> <table>"`, `"<OPERATION>"` or `"unknown"`.
/// Labels are never used to execute anything.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryLabel(String);

impl QueryLabel {
    /// Label used when there is no query text to inspect.
    pub const UNKNOWN: &'static str = "unknown";

    /// Returns the label used for empty or missing query text.
    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_owned())
    }

    /// Uses an explicit, human-chosen name verbatim.
    pub(crate) fn from_name(name: &str) -> Self {
        Self(name.to_owned())
    }

    /// Derives a best-effort label from raw query text.
    ///
    /// Never fails: text that cannot be classified yields either the leading
    /// keyword alone or [`QueryLabel::UNKNOWN`].
    pub fn from_text(text: &str) -> Self {
        let normalized = WHITESPACE.replace_all(text, " ");
        let normalized = normalized.trim();
        if normalized.is_empty() {
            return Self::unknown();
        }

        let operation = leading_operation(normalized);
        let pattern = match operation.as_str() {
            "INSERT" => &*INTO_TABLE,
            "UPDATE" => &*UPDATE_TABLE,
            _ => &*FROM_TABLE,
        };

        let table = pattern
            .captures(normalized)
            .and_then(|captures| captures.get(1))
            .map(|table| table.as_str().replace('"', ""))
            .filter(|table| !table.is_empty());

        match table {
            Some(table) => Self(format!("{operation} {table}")),
            None => Self(operation),
        }
    }

    /// Returns the label as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Classifies the statement by its leading keyword.
fn leading_operation(normalized: &str) -> String {
    let is_cte = normalized
        .get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("WITH "));
    if is_cte {
        return "WITH".to_owned();
    }

    normalized
        .split(' ')
        .next()
        .unwrap_or_default()
        .to_uppercase()
}

impl fmt::Display for QueryLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for QueryLabel {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<&str> for QueryLabel {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_with_quoted_table() {
        let label = QueryLabel::from_text(r#"SELECT * FROM "Orders" WHERE id = 1"#);
        assert_eq!(label, "SELECT Orders");
    }

    #[test]
    fn lowercase_insert() {
        let label = QueryLabel::from_text("insert into users (a) values (1)");
        assert_eq!(label, "INSERT users");
    }

    #[test]
    fn update_targets_updated_table() {
        let label = QueryLabel::from_text("update accounts set active = false from users");
        assert_eq!(label, "UPDATE accounts");
    }

    #[test]
    fn delete_uses_from_clause() {
        let label = QueryLabel::from_text("DELETE FROM app.sessions WHERE expired");
        assert_eq!(label, "DELETE app.sessions");
    }

    #[test]
    fn common_table_expression() {
        let label = QueryLabel::from_text(
            "with recent as (select id from events)\n  select * from recent",
        );
        assert_eq!(label, "WITH events");
    }

    #[test]
    fn collapses_whitespace_before_matching() {
        let label = QueryLabel::from_text("  \n\tSELECT\n  count(*)\n  FROM\n\t  orders  ");
        assert_eq!(label, "SELECT orders");
    }

    #[test]
    fn operation_only_when_no_table() {
        assert_eq!(QueryLabel::from_text("select 1"), "SELECT");
        assert_eq!(QueryLabel::from_text("BEGIN"), "BEGIN");
        assert_eq!(
            QueryLabel::from_text(r#"SET search_path TO "tenant", public"#),
            "SET"
        );
    }

    #[test]
    fn keyword_inside_identifier_is_not_a_clause() {
        let label = QueryLabel::from_text("SELECT data_from FROM imports");
        assert_eq!(label, "SELECT imports");
    }

    #[test]
    fn empty_text_is_unknown() {
        assert_eq!(QueryLabel::from_text(""), QueryLabel::UNKNOWN);
        assert_eq!(QueryLabel::from_text(" \n\t "), QueryLabel::UNKNOWN);
    }

    #[test]
    fn unparsable_text_never_fails() {
        assert_eq!(QueryLabel::from_text("???"), "???");
        assert_eq!(QueryLabel::from_text("select * from \"\""), "SELECT");
    }
}
