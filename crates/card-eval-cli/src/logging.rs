//! Logging setup.

use std::path::Path;

use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, fmt};

/// Install the stderr subscriber. `RUST_LOG` wins over `--verbose`.
pub fn init_logging(verbose: bool) -> anyhow::Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;
    Ok(())
}

/// Load provider secrets from `path` if it exists. Variables already set win.
///
/// Runs before the subscriber is installed so `RUST_LOG` can come from the
/// file; pass the result to [`report_env_file`] once logging is up.
pub fn load_env_file(path: &Path) -> Result<bool, dotenvy::Error> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(true),
        Err(err) if err.not_found() => Ok(false),
        Err(err) => Err(err),
    }
}

/// Log what [`load_env_file`] did.
pub fn report_env_file(path: &Path, status: &Result<bool, dotenvy::Error>) {
    match status {
        Ok(true) => debug!(path = %path.display(), "Loaded environment file"),
        Ok(false) => {}
        Err(err) => warn!(path = %path.display(), error = %err, "Could not read environment file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_file_sets_unset_variables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "CARD_EVAL_TEST_LOG_LEVEL=card_eval=trace\n").unwrap();

        assert!(matches!(load_env_file(&path), Ok(true)));
        assert_eq!(std::env::var("CARD_EVAL_TEST_LOG_LEVEL").unwrap(), "card_eval=trace");
    }

    #[test]
    fn test_missing_env_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load_env_file(&dir.path().join("absent.env")), Ok(false)));
    }
}
