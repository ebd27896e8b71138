//! Logging and trace export for the stream cache.
//!
//! Every session logs through `tracing`. Spans are also shipped over OTLP
//! unless `OTEL_ENABLED=false` or the exporter cannot be built, in which case
//! the process keeps logging to stdout only.
//!
//! The crate's level follows the session verbosity: 0 logs at `info`, 1 to 6
//! at `debug` (every accepted record), above 6 at `trace` (every flushed
//! snapshot). `RUST_LOG` adds directives on top.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_SERVICE_NAME: &str = "market-stream-cache";
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4318";

/// Socket and client chatter kept out of the session log.
const QUIET_DEPENDENCIES: [&str; 3] = ["tungstenite=info", "redis=info", "hyper=warn"];

/// Flushes buffered spans on drop. Hold it until the last session ends.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to flush trace export: {e}");
        }
    }
}

/// Export settings plus the session verbosity.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Ship spans over OTLP (`OTEL_ENABLED`).
    pub enabled: bool,
    /// Collector address (`OTEL_EXPORTER_OTLP_ENDPOINT`).
    pub otlp_endpoint: String,
    /// Resource name on exported spans (`OTEL_SERVICE_NAME`).
    pub service_name: String,
    /// Session verbosity, 0..=10.
    pub verbosity: u8,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            verbosity: 0,
        }
    }
}

impl TelemetryConfig {
    /// Reads `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT` and
    /// `OTEL_SERVICE_NAME`. Verbosity comes from the session config instead.
    #[must_use]
    pub fn from_env() -> Self {
        let enabled = std::env::var("OTEL_ENABLED")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_OTLP_ENDPOINT.to_string());

        let service_name =
            std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| DEFAULT_SERVICE_NAME.to_string());

        Self {
            enabled,
            otlp_endpoint,
            service_name,
            verbosity: 0,
        }
    }

    /// Overrides the verbosity.
    #[must_use]
    pub const fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }
}

/// Filter directive for this crate at the given verbosity.
#[must_use]
pub const fn verbosity_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "market_stream_cache=info",
        1..=6 => "market_stream_cache=debug",
        _ => "market_stream_cache=trace",
    }
}

/// `RUST_LOG` plus the crate level and the quiet dependency levels.
#[allow(clippy::expect_used)]
fn session_filter(verbosity: u8) -> EnvFilter {
    QUIET_DEPENDENCIES.iter().fold(
        EnvFilter::from_default_env().add_directive(
            verbosity_directive(verbosity)
                .parse()
                .expect("verbosity directives are valid"),
        ),
        |filter, directive| {
            filter.add_directive(directive.parse().expect("static directives are valid"))
        },
    )
}

/// Installs the global subscriber. Call once, before the first session starts.
#[must_use]
pub fn init_with_config(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = session_filter(config.verbosity);
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let exporter = if config.enabled {
        Some(
            opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(&config.otlp_endpoint)
                .build(),
        )
    } else {
        None
    };

    match exporter {
        Some(Ok(exporter)) => {
            let tracer_provider = SdkTracerProvider::builder()
                .with_batch_exporter(exporter)
                .with_resource(
                    opentelemetry_sdk::Resource::builder()
                        .with_service_name(config.service_name.clone())
                        .build(),
                )
                .build();
            let otel_layer =
                tracing_opentelemetry::layer().with_tracer(tracer_provider.tracer(config.service_name));

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .with(otel_layer)
                .init();

            TelemetryGuard {
                tracer_provider: Some(tracer_provider),
            }
        }
        Some(Err(e)) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();
            tracing::warn!(error = %e, "OTLP exporter unavailable, logging to stdout only");
            TelemetryGuard {
                tracer_provider: None,
            }
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();
            TelemetryGuard {
                tracer_provider: None,
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn default_config() {
        let config = TelemetryConfig::default();
        assert!(config.enabled);
        assert_eq!(config.otlp_endpoint, DEFAULT_OTLP_ENDPOINT);
        assert_eq!(config.service_name, DEFAULT_SERVICE_NAME);
        assert_eq!(config.verbosity, 0);
    }

    #[test]
    fn with_verbosity() {
        assert_eq!(TelemetryConfig::default().with_verbosity(7).verbosity, 7);
    }

    #[test_case(0, "market_stream_cache=info" ; "quiet")]
    #[test_case(1, "market_stream_cache=debug" ; "records")]
    #[test_case(6, "market_stream_cache=debug" ; "upper debug")]
    #[test_case(7, "market_stream_cache=trace" ; "snapshots")]
    #[test_case(10, "market_stream_cache=trace" ; "max")]
    fn verbosity_levels(verbosity: u8, expected: &str) {
        assert_eq!(verbosity_directive(verbosity), expected);
        assert!(expected.parse::<tracing_subscriber::filter::Directive>().is_ok());
    }

    #[test]
    fn session_filter_quiets_socket_and_store_clients() {
        let filter = session_filter(7).to_string();

        assert!(filter.contains("market_stream_cache=trace"));
        for directive in QUIET_DEPENDENCIES {
            assert!(filter.contains(directive), "{directive} missing from {filter}");
        }
    }
}
