//! Prometheus counters/gauges/histogram for the engine, exposed via
//! [`Engine::metrics`] rather than bound to an HTTP server: this crate
//! stops at the registry, the way `project-chimera`'s `layer4::metrics`
//! builds a `prometheus::Registry` and leaves the scrape endpoint to the
//! binary that wires it up.

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder};

use crate::error::{SchedulerError, SchedulerResult};

/// Execution-duration buckets in seconds, widened at the top end since
/// scheduled jobs routinely run for minutes rather than milliseconds.
fn duration_buckets() -> Vec<f64> {
    vec![0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]
}

/// All metrics the engine emits. Cheap to clone (every field is an
/// `Arc`-backed Prometheus handle); held once by the engine and handed
/// out by reference through [`Engine::metrics`].
#[derive(Clone)]
pub struct SchedulerMetrics {
    registry: Registry,
    pub executions_total: IntCounter,
    pub executions_succeeded: IntCounter,
    pub executions_failed: IntCounter,
    pub executions_timed_out: IntCounter,
    pub queue_full_rejections: IntCounter,
    pub execution_duration_seconds: Histogram,
    pub running_executions: IntGauge,
    pub registered_schedules: IntGauge,
}

impl SchedulerMetrics {
    pub fn new() -> SchedulerResult<Self> {
        let registry = Registry::new();

        let executions_total = IntCounter::with_opts(Opts::new(
            "falcon_scheduler_executions_total",
            "Total task executions dispatched to the worker pool",
        ))
        .map_err(metric_err)?;
        let executions_succeeded = IntCounter::with_opts(Opts::new(
            "falcon_scheduler_executions_succeeded_total",
            "Executions that completed successfully",
        ))
        .map_err(metric_err)?;
        let executions_failed = IntCounter::with_opts(Opts::new(
            "falcon_scheduler_executions_failed_total",
            "Executions that completed with a failure",
        ))
        .map_err(metric_err)?;
        let executions_timed_out = IntCounter::with_opts(Opts::new(
            "falcon_scheduler_executions_timed_out_total",
            "Executions that were killed by their own timeout",
        ))
        .map_err(metric_err)?;
        let queue_full_rejections = IntCounter::with_opts(Opts::new(
            "falcon_scheduler_queue_full_rejections_total",
            "Dispatch attempts rejected because the worker queue was saturated",
        ))
        .map_err(metric_err)?;
        let execution_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "falcon_scheduler_execution_duration_seconds",
                "Wall-clock duration of completed executions",
            )
            .buckets(duration_buckets()),
        )
        .map_err(metric_err)?;
        let running_executions = IntGauge::with_opts(Opts::new(
            "falcon_scheduler_running_executions",
            "Executions currently in flight in the worker pool",
        ))
        .map_err(metric_err)?;
        let registered_schedules = IntGauge::with_opts(Opts::new(
            "falcon_scheduler_registered_schedules",
            "Tasks currently armed in the cron dispatcher",
        ))
        .map_err(metric_err)?;

        registry.register(Box::new(executions_total.clone())).map_err(metric_err)?;
        registry.register(Box::new(executions_succeeded.clone())).map_err(metric_err)?;
        registry.register(Box::new(executions_failed.clone())).map_err(metric_err)?;
        registry.register(Box::new(executions_timed_out.clone())).map_err(metric_err)?;
        registry.register(Box::new(queue_full_rejections.clone())).map_err(metric_err)?;
        registry.register(Box::new(execution_duration_seconds.clone())).map_err(metric_err)?;
        registry.register(Box::new(running_executions.clone())).map_err(metric_err)?;
        registry.register(Box::new(registered_schedules.clone())).map_err(metric_err)?;

        Ok(Self {
            registry,
            executions_total,
            executions_succeeded,
            executions_failed,
            executions_timed_out,
            queue_full_rejections,
            execution_duration_seconds,
            running_executions,
            registered_schedules,
        })
    }

    /// Records a finished execution's outcome and duration.
    pub fn observe_execution(&self, success: bool, timed_out: bool, duration_secs: f64) {
        self.executions_total.inc();
        if success {
            self.executions_succeeded.inc();
        } else {
            self.executions_failed.inc();
        }
        if timed_out {
            self.executions_timed_out.inc();
        }
        self.execution_duration_seconds.observe(duration_secs);
    }

    /// Renders the registry in Prometheus text exposition format.
    pub fn export(&self) -> SchedulerResult<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer).map_err(metric_err)?;
        String::from_utf8(buffer).map_err(|e| SchedulerError::Internal(e.to_string()))
    }
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new().expect("static metric descriptors are always valid")
    }
}

fn metric_err(e: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::Internal(format!("metrics: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_contains_registered_metric_names() {
        let metrics = SchedulerMetrics::new().unwrap();
        metrics.observe_execution(true, false, 1.5);
        let text = metrics.export().unwrap();
        assert!(text.contains("falcon_scheduler_executions_total"));
        assert!(text.contains("falcon_scheduler_execution_duration_seconds"));
    }

    #[test]
    fn failed_and_timed_out_executions_increment_their_counters() {
        let metrics = SchedulerMetrics::new().unwrap();
        metrics.observe_execution(false, true, 0.2);
        assert_eq!(metrics.executions_failed.get(), 1);
        assert_eq!(metrics.executions_timed_out.get(), 1);
        assert_eq!(metrics.executions_succeeded.get(), 0);
    }
}
