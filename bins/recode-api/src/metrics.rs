use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder, HistogramVec,
    IntCounter, IntCounterVec, TextEncoder,
};

// Metric names and labels are constant, so registration only fails on a duplicate name.
lazy_static! {
    pub static ref REQUESTS: IntCounterVec = register_int_counter_vec!(
        "recode_requests_total",
        "Requests handled, by route and outcome",
        &["route", "outcome"]
    )
    .expect("recode_requests_total registers once");
    pub static ref SANDBOX_POLLS: IntCounter = register_int_counter!(
        "recode_sandbox_polls_total",
        "Sandbox state polls issued"
    )
    .expect("recode_sandbox_polls_total registers once");
    pub static ref PIPELINE_SECONDS: HistogramVec = register_histogram_vec!(
        "recode_pipeline_seconds",
        "End-to-end pipeline duration",
        &["route"],
        vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    )
    .expect("recode_pipeline_seconds registers once");
}

pub fn record(route: &str, outcome: &str) {
    REQUESTS.with_label_values(&[route, outcome]).inc();
}

/// Prometheus text exposition of the default registry
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_counters() {
        record("/api/translate", "test_render");
        SANDBOX_POLLS.inc();
        PIPELINE_SECONDS.with_label_values(&["/api/decompile"]).observe(2.0);

        let text = render().unwrap();
        assert!(text.contains("recode_requests_total"));
        assert!(text.contains("outcome=\"test_render\""));
        assert!(text.contains("recode_sandbox_polls_total"));
        assert!(text.contains("recode_pipeline_seconds_bucket"));
    }
}
