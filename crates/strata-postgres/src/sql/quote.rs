use crate::{PgError, PgResult};

/// Quotes an SQL identifier, doubling every embedded double quote.
///
/// Schema names may come from configuration or the environment, so this is the
/// only thing standing between them and the statements built from them. Every
/// quote character is escaped rather than rejected.
///
/// # Errors
///
/// Returns [`PgError::InvalidArgument`] if the identifier is empty or
/// whitespace-only.
///
/// # Example
///
/// ```rust
/// use strata_postgres::quote_identifier;
///
/// assert_eq!(quote_identifier("tenant").unwrap(), r#""tenant""#);
/// assert_eq!(quote_identifier(r#"a"b"#).unwrap(), r#""a""b""#);
/// ```
pub fn quote_identifier(identifier: &str) -> PgResult<String> {
    if identifier.trim().is_empty() {
        return Err(PgError::invalid_argument(
            "identifier must be a non-empty string",
        ));
    }

    Ok(format!("\"{}\"", identifier.replace('"', "\"\"")))
}
