//! Tracing setup for the `bezz` binary.

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "bezz_client=info,bezz=info";
const VERBOSE_LOG_FILTER: &str = "bezz_client=debug,bezz=debug";

/// Noisy dependencies kept at `warn` unless `RUST_LOG` says otherwise.
const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls"];

/// Builds the filter: `RUST_LOG` when set, else the default directives.
pub fn build_filter(verbose: bool) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let base = if verbose {
        VERBOSE_LOG_FILTER
    } else {
        DEFAULT_LOG_FILTER
    };
    let mut directives = vec![base.to_string()];
    directives.extend(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")));

    let filter = directives.join(",");
    EnvFilter::try_new(&filter).with_context(|| format!("Invalid tracing filter '{filter}'"))
}

/// Installs a stderr fmt layer. Stdout stays reserved for command output.
pub fn init_logging(verbose: bool) -> Result<()> {
    let filter = build_filter(verbose)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .with_filter(filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives_parse() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let quiet = build_filter(false).unwrap().to_string();
        assert!(quiet.contains("bezz_client=info"));
        assert!(quiet.contains("reqwest=warn"));

        let verbose = build_filter(true).unwrap().to_string();
        assert!(verbose.contains("bezz_client=debug"));
    }
}
