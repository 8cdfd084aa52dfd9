//! Telemetry initialization.
//!
//! Controlled by `PALIMPSEST_LOG`:
//! - unset or empty → no-op (no subscriber installed, zero overhead)
//! - `"json"` → JSON events to stderr, with span-close events
//! - anything else → parsed as an [`EnvFilter`] directive (e.g.
//!   `palimpsest=debug`) with the compact human format to stderr

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Environment variable read by [`init`].
pub const LOG_ENV: &str = "PALIMPSEST_LOG";

/// What [`init`] decided to install.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TelemetryMode {
    /// Nothing installed.
    Off,
    /// JSON to stderr at `info`.
    Json,
    /// Human-readable output filtered by the given directive.
    Filter(String),
}

impl TelemetryMode {
    /// Interpret a raw `PALIMPSEST_LOG` value.
    #[must_use]
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => Self::Off,
            Some("json") => Self::Json,
            Some(directive) => Self::Filter(directive.to_owned()),
        }
    }
}

/// Initialize telemetry based on `PALIMPSEST_LOG`.
///
/// Safe to call more than once; only the first successful installation takes
/// effect.
pub fn init() -> TelemetryMode {
    let mode = TelemetryMode::from_env_value(std::env::var(LOG_ENV).ok().as_deref());
    match &mode {
        TelemetryMode::Off => {}
        TelemetryMode::Json => init_json(),
        TelemetryMode::Filter(directive) => init_filtered(directive),
    }
    mode
}

/// JSON events to stderr via tracing-subscriber's JSON formatter.
fn init_json() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("info"))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE),
        )
        .try_init();
}

fn init_filtered(directive: &str) {
    let filter = EnvFilter::try_new(directive).unwrap_or_else(|e| {
        eprintln!("warning: invalid {LOG_ENV} directive {directive:?}: {e}; using 'info'");
        EnvFilter::new("info")
    });
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .try_init();
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;

    #[test]
    fn mode_from_env_value() {
        assert_eq!(TelemetryMode::from_env_value(None), TelemetryMode::Off);
        assert_eq!(TelemetryMode::from_env_value(Some("  ")), TelemetryMode::Off);
        assert_eq!(TelemetryMode::from_env_value(Some("json")), TelemetryMode::Json);
        assert_eq!(
            TelemetryMode::from_env_value(Some("palimpsest=debug")),
            TelemetryMode::Filter("palimpsest=debug".into())
        );
    }
}
