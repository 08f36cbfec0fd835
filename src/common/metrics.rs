//! Process metrics: named gauges and string variables
//!
//! The leadership monitor publishes through [`MetricsSink`], so the sink is
//! injected rather than reached through a global. [`MetricsRegistry`] is the
//! production sink and renders everything in the Prometheus text format.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Destination for fire-and-forget observability updates.
///
/// Implementations must not block or fail; callers never check the outcome.
pub trait MetricsSink: Send + Sync {
    /// Set a named gauge, registering it on first use
    fn set_gauge(&self, name: &str, value: i64);

    /// Set a named string variable, registering it on first use
    fn set_var(&self, name: &str, value: &str);
}

/// Gauge for tracking current values
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
        }
    }

    pub fn set(&self, v: i64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Registry of gauges and string variables
#[derive(Debug)]
pub struct MetricsRegistry {
    gauges: RwLock<BTreeMap<String, Arc<Gauge>>>,
    vars: RwLock<BTreeMap<String, String>>,

    /// Start time for uptime calculation
    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            gauges: RwLock::new(BTreeMap::new()),
            vars: RwLock::new(BTreeMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Get or create a gauge
    pub fn gauge(&self, name: &str) -> Arc<Gauge> {
        if let Some(gauge) = self.gauges.read().get(name) {
            return gauge.clone();
        }
        self.gauges
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Gauge::new()))
            .clone()
    }

    /// Current value of a gauge, if it was ever set
    pub fn gauge_value(&self, name: &str) -> Option<i64> {
        self.gauges.read().get(name).map(|g| g.get())
    }

    /// Current value of a string variable, if it was ever set
    pub fn var(&self, name: &str) -> Option<String> {
        self.vars.read().get(name).cloned()
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output.
    ///
    /// Dots in names become underscores; string variables are exported as
    /// `<name>_info{value="..."} 1`.
    pub fn to_prometheus(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();

        out.push_str("# HELP quorate_uptime_seconds Server uptime in seconds\n");
        out.push_str("# TYPE quorate_uptime_seconds gauge\n");
        let _ = writeln!(out, "quorate_uptime_seconds {}", self.uptime_seconds());

        for (name, gauge) in self.gauges.read().iter() {
            let name = prometheus_name(name);
            let _ = writeln!(out, "# TYPE {} gauge", name);
            let _ = writeln!(out, "{} {}", name, gauge.get());
        }

        for (name, value) in self.vars.read().iter() {
            let name = prometheus_name(name);
            let _ = writeln!(out, "# TYPE {}_info gauge", name);
            let _ = writeln!(
                out,
                "{}_info{{value=\"{}\"}} 1",
                name,
                value.replace('\\', "\\\\").replace('"', "\\\"")
            );
        }

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for MetricsRegistry {
    fn set_gauge(&self, name: &str, value: i64) {
        self.gauge(name).set(value);
    }

    fn set_var(&self, name: &str, value: &str) {
        self.vars.write().insert(name.to_string(), value.to_string());
    }
}

fn prometheus_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 8);
    out.push_str("quorate_");
    out.extend(
        name.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }),
    );
    out
}
