//! Tracing setup for the cibridge binary.
//!
//! Stdout carries command results, so log lines always go to stderr.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// HTTP client crates log every connection at debug level.
const QUIET_DEPENDENCIES: [&str; 3] = ["hyper", "reqwest", "rustls"];

/// Filter used when `RUST_LOG` is unset: `level` for cibridge, `warn` for
/// the HTTP stack.
pub fn default_directives(level: Level) -> String {
    let mut directives = level.as_str().to_ascii_lowercase();
    for krate in QUIET_DEPENDENCIES {
        directives.push_str(&format!(",{krate}=warn"));
    }
    directives
}

/// Install the global subscriber. `json` switches to one JSON object per
/// line. A subscriber installed earlier wins.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let output = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let output: Box<dyn Layer<Registry> + Send + Sync> = if json {
        output.json().boxed()
    } else {
        output.boxed()
    };

    let _ = tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_quiet_http_stack() {
        assert_eq!(
            default_directives(Level::DEBUG),
            "debug,hyper=warn,reqwest=warn,rustls=warn"
        );
    }

    #[test]
    fn test_second_init_is_ignored() {
        init_tracing(false, Level::INFO);
        init_tracing(true, Level::TRACE);
        tracing::info!("still logging");
    }
}
