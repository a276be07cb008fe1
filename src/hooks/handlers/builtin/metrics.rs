//! Metrics collection aspect handler

use crate::hooks::{AspectHandler, AspectInfo, BuiltInConfig, CallResult};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Metrics storage
#[derive(Debug, Clone, Default)]
struct Metrics {
    counters: HashMap<String, u64>,
    gauges: HashMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricType {
    Counter,
    Gauge,
}

/// Built-in metrics handler.
///
/// `metric_type = "counter"` counts calls; `"gauge"` records the number found at
/// `value_path`, a JSON pointer into `{"arguments": [..], "return": ..}`.
pub struct MetricsHandler {
    name: String,
    metric_key: Option<String>,
    metric_type: MetricType,
    value_path: Option<String>,
    label_by_argument: bool,
    metrics: Arc<Mutex<Metrics>>,
}

impl MetricsHandler {
    /// Create a new metrics handler
    pub fn new(name: impl Into<String>, config: BuiltInConfig) -> Self {
        let metric_type = match config.get_str("metric_type") {
            Some("gauge") => MetricType::Gauge,
            Some("counter") | None => MetricType::Counter,
            Some(other) => {
                tracing::warn!(metric_type = other, "Unknown metric type, counting calls instead");
                MetricType::Counter
            }
        };

        Self {
            name: name.into(),
            metric_key: config.get_str("metric_key").map(str::to_string),
            metric_type,
            value_path: config.get_str("value_path").map(str::to_string),
            label_by_argument: config.get_bool("label_by_argument").unwrap_or(false),
            metrics: Arc::new(Mutex::new(Metrics::default())),
        }
    }

    /// Get metric key from config or generate default
    fn metric_key(&self, info: &AspectInfo<'_>) -> String {
        let key = self
            .metric_key
            .clone()
            .unwrap_or_else(|| format!("call.{}", info.member()));

        if !self.label_by_argument {
            return key;
        }
        match info.argument(0) {
            Some(Value::String(label)) => format!("{}{{{}}}", key, label),
            Some(Value::Null) | None => key,
            Some(other) => format!("{}{{{}}}", key, other),
        }
    }

    fn gauge_value(&self, info: &AspectInfo<'_>) -> Option<f64> {
        let view = json!({
            "arguments": info.arguments(),
            "return": info.return_value().unwrap_or(Value::Null),
        });
        let path = self.value_path.as_deref().unwrap_or("/arguments/0");
        view.pointer(path).and_then(|v| v.as_f64())
    }

    fn lock(&self) -> MutexGuard<'_, Metrics> {
        self.metrics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get current metrics snapshot
    pub fn get_metrics(&self) -> Value {
        let metrics = self.lock();
        json!({
            "counters": metrics.counters,
            "gauges": metrics.gauges,
        })
    }

    /// Counter value for `key`, zero when never incremented
    pub fn counter(&self, key: &str) -> u64 {
        self.lock().counters.get(key).copied().unwrap_or(0)
    }

    /// Reset all metrics
    pub fn reset(&self) {
        let mut metrics = self.lock();
        metrics.counters.clear();
        metrics.gauges.clear();
    }
}

impl AspectHandler for MetricsHandler {
    fn execute(&self, info: &AspectInfo<'_>) -> CallResult<()> {
        let metric_key = self.metric_key(info);

        match self.metric_type {
            MetricType::Counter => {
                *self.lock().counters.entry(metric_key).or_insert(0) += 1;
            }
            MetricType::Gauge => match self.gauge_value(info) {
                Some(value) => {
                    self.lock().gauges.insert(metric_key, value);
                }
                None => {
                    tracing::debug!(handler = %self.name, key = %metric_key, "No numeric gauge value for call");
                }
            },
        }

        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::handlers::builtin::testing::{config_from_json, with_call};
    use serde_json::json;

    #[test]
    fn test_counter_metrics() {
        let config = config_from_json("metrics", json!({
            "metric_type": "counter",
            "metric_key": "test_counter",
        }));
        let handler = MetricsHandler::new("counter_test", config);

        for i in 0..3 {
            with_call(vec![json!(i)], |info| handler.execute(info)).unwrap();
        }

        let metrics = handler.get_metrics();
        assert_eq!(metrics["counters"]["test_counter"], 3);
        assert_eq!(handler.counter("test_counter"), 3);
    }

    #[test]
    fn test_default_key_and_labels() {
        let config = config_from_json("metrics", json!({ "label_by_argument": true }));
        let handler = MetricsHandler::new("labels", config);

        for who in ["bob", "bob", "eve"] {
            with_call(vec![json!(who)], |info| handler.execute(info)).unwrap();
        }
        with_call(Vec::new(), |info| handler.execute(info)).unwrap();

        assert_eq!(handler.counter("call.greet{bob}"), 2);
        assert_eq!(handler.counter("call.greet{eve}"), 1);
        assert_eq!(handler.counter("call.greet"), 1);
    }

    #[test]
    fn test_gauge_metrics() {
        let config = config_from_json("metrics", json!({
            "metric_type": "gauge",
            "metric_key": "test_gauge",
        }));
        let handler = MetricsHandler::new("gauge_test", config);

        for value in [10.5, 20.3, 15.7] {
            with_call(vec![json!(value)], |info| handler.execute(info)).unwrap();
        }

        // last value wins
        let metrics = handler.get_metrics();
        assert_eq!(metrics["gauges"]["test_gauge"], 15.7);
    }

    #[test]
    fn test_gauge_from_return_value() {
        let config = config_from_json("metrics", json!({
            "metric_type": "gauge",
            "metric_key": "answer",
            "value_path": "/return/size",
        }));
        let handler = MetricsHandler::new("path_test", config);

        with_call(Vec::new(), |info| {
            info.set_return_value(json!({ "size": 42.5 }));
            handler.execute(info)
        })
        .unwrap();

        assert_eq!(handler.get_metrics()["gauges"]["answer"], 42.5);
    }

    #[test]
    fn test_reset_metrics() {
        let config = config_from_json("metrics", json!({ "metric_key": "reset_test" }));
        let handler = MetricsHandler::new("reset_test", config);

        for _ in 0..5 {
            with_call(Vec::new(), |info| handler.execute(info)).unwrap();
        }
        assert_eq!(handler.counter("reset_test"), 5);

        handler.reset();
        assert!(handler.get_metrics()["counters"].as_object().unwrap().is_empty());
    }
}
