//! Prometheus metrics wiring.
//!
//! Counters cover validated payments, tour advances, and payout
//! notifications; HTTP traffic comes from the tracing layer.

use std::sync::Arc;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::warn;

/// Install the global Prometheus recorder and hand back a render handle.
///
/// No scrape listener is started; the router serves GET /metrics by
/// calling `handle.render()` on demand.
///
/// # Errors
/// Fails if a recorder is already installed in this process.
pub fn install_recorder() -> Result<Arc<PrometheusHandle>, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(Arc::new(handle))
}

/// Best-effort install for startup. A failed install is logged and leaves
/// the /metrics endpoint disabled rather than aborting the server.
#[must_use]
pub fn init_metrics_handle() -> Option<Arc<PrometheusHandle>> {
    match install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Metrics recorder not installed; /metrics disabled");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The recorder slot is process-global, so both paths are exercised in
    // one test. No other unit test installs a recorder.
    #[test]
    fn test_recorder_installs_once_and_renders() {
        let handle = init_metrics_handle().expect("first install succeeds");

        metrics::counter!("tours_advanced_total").increment(1);
        assert!(handle.render().contains("tours_advanced_total"));

        assert!(install_recorder().is_err());
        assert!(init_metrics_handle().is_none());
    }
}
