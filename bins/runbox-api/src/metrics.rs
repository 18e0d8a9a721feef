// Prometheus metrics for code executions
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};
use runbox_common::types::ExecutionResult;
use std::time::Duration;

lazy_static! {
    pub static ref EXECUTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "runbox_executions_total",
        "Code execution requests by language and outcome",
        &["language", "outcome"]
    )
    .expect("metric can be registered");
    pub static ref EXECUTION_DURATION: HistogramVec = register_histogram_vec!(
        "runbox_execution_duration_seconds",
        "Wall-clock time of code execution requests",
        &["language"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("metric can be registered");
}

/// Label for a result the coordinator returned
pub fn outcome_of(result: &ExecutionResult) -> &'static str {
    if result.is_timeout() {
        "timeout"
    } else if result.execution_time == runbox_common::types::EXECUTION_TIME_FAILED {
        "failed"
    } else if result.error {
        "error"
    } else {
        "success"
    }
}

pub fn record(language: &str, outcome: &str, elapsed: Duration) {
    EXECUTIONS_TOTAL.with_label_values(&[language, outcome]).inc();
    EXECUTION_DURATION
        .with_label_values(&[language])
        .observe(elapsed.as_secs_f64());
}

/// Text exposition of every registered metric
pub fn render() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
