//! Target schema and the statements built from it.

use std::fmt;

use diesel::result::{DatabaseErrorKind, Error};
use serde::{Deserialize, Serialize};

use crate::sql::quote_identifier;
use crate::{PgError, PgResult};

/// Validated name of the schema every pooled connection resolves into.
///
/// Surrounding whitespace is trimmed; the remaining name must be non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaName(String);

impl SchemaName {
    /// The database's default schema.
    pub const DEFAULT: &'static str = "public";

    /// Validates and creates a schema name.
    ///
    /// # Errors
    ///
    /// Returns [`PgError::InvalidArgument`] if the name is empty or whitespace-only.
    pub fn new(name: impl AsRef<str>) -> PgResult<Self> {
        let name = name.as_ref().trim();
        if name.is_empty() {
            return Err(PgError::invalid_argument("schema name cannot be empty"));
        }

        Ok(Self(name.to_owned()))
    }

    /// Returns the default `public` schema.
    pub fn public() -> Self {
        Self(Self::DEFAULT.to_owned())
    }

    /// Returns whether this is the default schema.
    #[inline]
    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }

    /// Returns the schema name.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the quoted identifier for this schema.
    pub fn quoted(&self) -> PgResult<String> {
        quote_identifier(&self.0)
    }

    /// Statement provisioning this schema, or `None` for the default schema.
    pub fn create_statement(&self) -> PgResult<Option<String>> {
        if self.is_default() {
            return Ok(None);
        }

        Ok(Some(format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            self.quoted()?
        )))
    }

    /// Session statement making unqualified names resolve into this schema.
    ///
    /// Non-default schemas keep `public` as a fallback.
    pub fn search_path_statement(&self) -> PgResult<String> {
        let quoted = self.quoted()?;
        if self.is_default() {
            Ok(format!("SET search_path TO {quoted}"))
        } else {
            Ok(format!("SET search_path TO {quoted}, public"))
        }
    }
}

impl Default for SchemaName {
    fn default() -> Self {
        Self::public()
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SchemaName {
    type Error = PgError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SchemaName> for String {
    fn from(value: SchemaName) -> Self {
        value.0
    }
}

/// Returns whether a `CREATE SCHEMA IF NOT EXISTS` failure only means another
/// initializer created the schema first.
///
/// Two sessions racing on the same schema can both pass the existence check;
/// the loser then fails on the catalog's unique index or reports the schema as
/// already existing.
pub(crate) fn is_concurrent_creation(error: &Error) -> bool {
    match error {
        Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => true,
        Error::DatabaseError(_, info) => info.message().contains("already exists"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_validates() {
        assert_eq!(SchemaName::new("  tenant_a ").unwrap().as_str(), "tenant_a");
        assert!(matches!(
            SchemaName::new("   "),
            Err(PgError::InvalidArgument(_))
        ));
        assert!(SchemaName::new("").is_err());
    }

    #[test]
    fn default_schema_has_single_entry_search_path() {
        let schema = SchemaName::default();
        assert!(schema.is_default());
        assert_eq!(
            schema.search_path_statement().unwrap(),
            r#"SET search_path TO "public""#
        );
        assert_eq!(schema.create_statement().unwrap(), None);
    }

    #[test]
    fn custom_schema_falls_back_to_public() {
        let schema = SchemaName::new("tenant_a").unwrap();
        assert!(!schema.is_default());
        assert_eq!(
            schema.search_path_statement().unwrap(),
            r#"SET search_path TO "tenant_a", public"#
        );
        assert_eq!(
            schema.create_statement().unwrap().as_deref(),
            Some(r#"CREATE SCHEMA IF NOT EXISTS "tenant_a""#)
        );
    }

    #[test]
    fn statements_escape_quotes() {
        let schema = SchemaName::new(r#"evil"; DROP TABLE users; --"#).unwrap();
        assert_eq!(
            schema.search_path_statement().unwrap(),
            r#"SET search_path TO "evil""; DROP TABLE users; --", public"#
        );
    }

    #[test]
    fn deserialization_validates() {
        let schema: SchemaName = serde_json::from_str(r#"" tenant_b ""#).unwrap();
        assert_eq!(schema.as_str(), "tenant_b");
        assert!(serde_json::from_str::<SchemaName>(r#""  ""#).is_err());
    }

    #[test]
    fn unrelated_errors_are_not_races() {
        assert!(!is_concurrent_creation(&Error::NotFound));
    }
}
