use super::QueryLabel;
use crate::{PgError, PgResult};

/// Describes a query for labeling purposes.
///
/// A descriptor is either raw query text or a structured value carrying a stable,
/// human-chosen `name` alongside the text. When a non-empty name is present it is
/// used verbatim as the log label; otherwise the label is derived from the text.
///
/// ```rust
/// use strata_postgres::QueryDescriptor;
///
/// let raw = QueryDescriptor::from("insert into users (a) values (1)");
/// assert_eq!(raw.label(), "INSERT users");
///
/// let named = QueryDescriptor::named("fetchUser").with_text("SELECT * FROM users");
/// assert_eq!(named.label(), "fetchUser");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryDescriptor {
    name: Option<String>,
    text: Option<String>,
}

impl QueryDescriptor {
    /// Creates a descriptor from raw query text.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            name: None,
            text: Some(text.into()),
        }
    }

    /// Creates a descriptor carrying only an explicit name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            text: None,
        }
    }

    /// Sets the explicit name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the query text.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Returns the explicit name, if any.
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the query text, if any.
    #[inline]
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Returns the query text for execution.
    ///
    /// # Errors
    ///
    /// Returns [`PgError::InvalidArgument`] if the descriptor has no text or the
    /// text is whitespace-only.
    pub fn sql(&self) -> PgResult<&str> {
        self.text()
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| PgError::invalid_argument("query text cannot be empty"))
    }

    /// Derives the log label for this query.
    pub fn label(&self) -> QueryLabel {
        if let Some(name) = self.name().filter(|name| !name.is_empty()) {
            return QueryLabel::from_name(name);
        }

        match self.text() {
            Some(text) => QueryLabel::from_text(text),
            None => QueryLabel::unknown(),
        }
    }
}

impl From<&str> for QueryDescriptor {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for QueryDescriptor {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&String> for QueryDescriptor {
    fn from(text: &String) -> Self {
        Self::new(text.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_wins_over_text() {
        let descriptor = QueryDescriptor::named("fetchUser")
            .with_text("SELECT * FROM users WHERE id = $1");
        assert_eq!(descriptor.label(), "fetchUser");
        assert_eq!(QueryDescriptor::named("fetchUser").label(), "fetchUser");
    }

    #[test]
    fn empty_name_falls_back_to_text() {
        let descriptor = QueryDescriptor::new("DELETE FROM sessions").with_name("");
        assert_eq!(descriptor.label(), "DELETE sessions");
    }

    #[test]
    fn missing_text_is_unknown() {
        assert_eq!(QueryDescriptor::default().label(), QueryLabel::UNKNOWN);
        assert_eq!(QueryDescriptor::from("").label(), QueryLabel::UNKNOWN);
    }

    #[test]
    fn sql_requires_text() {
        assert!(QueryDescriptor::named("fetchUser").sql().is_err());
        assert!(QueryDescriptor::new("   ").sql().is_err());
        assert_eq!(QueryDescriptor::new("SELECT 1").sql().unwrap(), "SELECT 1");
    }
}
