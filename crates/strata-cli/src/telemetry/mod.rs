//! Log output for the `strata` binary.
//!
//! Logs go to stderr so that command results printed on stdout stay
//! machine-readable. `RUST_LOG` overrides [`DEFAULT_DIRECTIVES`]:
//!
//! ```bash
//! RUST_LOG=strata_postgres::connection=trace strata check
//! ```

use anyhow::Context;
use tracing_subscriber::EnvFilter;

/// Directives used when `RUST_LOG` is unset or empty.
pub const DEFAULT_DIRECTIVES: &str = "info";

/// Installs the global subscriber.
///
/// # Errors
///
/// Fails when `RUST_LOG` holds an invalid directive or a subscriber is
/// already installed.
pub fn init_tracing() -> anyhow::Result<()> {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = env_filter(directives.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

/// Parses `directives`, falling back to [`DEFAULT_DIRECTIVES`] when blank.
fn env_filter(directives: Option<&str>) -> anyhow::Result<EnvFilter> {
    let directives = directives
        .map(str::trim)
        .filter(|directives| !directives.is_empty())
        .unwrap_or(DEFAULT_DIRECTIVES);

    EnvFilter::try_new(directives).with_context(|| format!("invalid RUST_LOG value `{directives}`"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_directives_use_default() {
        for directives in [None, Some(""), Some("  ")] {
            let filter = env_filter(directives).unwrap();
            assert_eq!(filter.to_string(), DEFAULT_DIRECTIVES);
        }
    }

    #[test]
    fn custom_directives_are_kept() {
        let filter = env_filter(Some("strata_postgres::queries=warn")).unwrap();
        assert_eq!(filter.to_string(), "strata_postgres::queries=warn");
    }

    #[test]
    fn invalid_directives_are_rejected() {
        let error = env_filter(Some("strata=notalevel")).unwrap_err();
        assert!(error.to_string().contains("invalid RUST_LOG value"));
    }
}
