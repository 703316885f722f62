use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::workflow::Method;

/// Initialize structured logging.
///
/// `RUST_LOG` wins over `level` when set. JSON output carries the current
/// span and span list so correlation ids reach every event of a dispatch pass.
pub fn init_telemetry(json: bool, level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()?;
    }

    tracing::debug!("fabflow telemetry initialized");
    Ok(())
}

/// Generate a correlation ID for linking related operations
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span wrapping one dispatch pass for `method`
pub fn create_dispatch_span(method: Method, correlation_id: &str) -> tracing::Span {
    tracing::info_span!(
        "fleet_dispatch",
        method = %method,
        correlation.id = correlation_id,
    )
}

/// Span wrapping a fleet-wide operation such as connect or cancel
pub fn create_fleet_span(operation: &str, job_id: Option<&str>) -> tracing::Span {
    tracing::info_span!(
        "fleet_operation",
        operation = operation,
        job.id = job_id,
        correlation.id = %generate_correlation_id(),
    )
}
