//! Prometheus metrics exposition
//!
//! Library crates emit through the `metrics` facade; this module installs
//! the recorder and owns the task-level series:
//!
//! - `gateway_upstream_requests_total` (counter): labels `supplier`, `status`
//! - `gateway_upstream_latency_seconds` (histogram): label `supplier`
//! - `gateway_transport_errors_total` (counter): label `supplier`
//! - `gateway_supplier_bans_total` (counter): labels `pool`, `supplier`
//! - `gateway_queue_rejections_total` (counter)
//! - `gateway_tasks_total` (counter): label `outcome`

use dispatch::TaskState;
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const LATENCY_METRIC: &str = "gateway_upstream_latency_seconds";

/// Upstream calls range from sub-second chat replies to multi-minute image
/// edits.
const LATENCY_BUCKETS: &[f64] = &[
    0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(LATENCY_METRIC.to_string()), LATENCY_BUCKETS)
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Count a task reaching its terminal state.
pub fn record_task(state: TaskState) {
    metrics::counter!("gateway_tasks_total", "outcome" => state.label()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = builder().unwrap().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_task_without_recorder_is_a_noop() {
        record_task(TaskState::Succeeded);
    }

    #[test]
    fn task_outcomes_render_with_labels() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_task(TaskState::Succeeded);
        record_task(TaskState::Succeeded);
        record_task(TaskState::Aborted);

        let output = handle.render();
        assert!(
            output.contains("gateway_tasks_total{outcome=\"succeeded\"} 2"),
            "got: {output}"
        );
        assert!(
            output.contains("gateway_tasks_total{outcome=\"aborted\"} 1"),
            "got: {output}"
        );
    }

    #[test]
    fn latency_renders_as_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        metrics::histogram!(LATENCY_METRIC, "supplier" => "relay-a").record(42.0);

        let output = handle.render();
        assert!(
            output.contains("gateway_upstream_latency_seconds_bucket"),
            "latency must render _bucket lines, got: {output}"
        );
        assert!(output.contains("le=\"0.05\""), "got: {output}");
        assert!(output.contains("le=\"+Inf\""), "got: {output}");
    }
}
