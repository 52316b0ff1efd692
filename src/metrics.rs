//! A thin counter-vector facade so the manager is observable without
//! depending on a specific metrics backend.

use log::warn;
use std::collections::HashMap;

pub type Labels<'a> = HashMap<&'a str, &'a str>;

pub trait Counter {
    fn inc(&self);
    fn add(&self, v: f64);
}

pub trait CounterVec: Send + Sync {
    /// Returns the counter for the supplied labels.
    fn with(&self, labels: &Labels) -> Box<dyn Counter>;
}

/// A counter that does nothing.
pub struct NopCounter;

impl Counter for NopCounter {
    fn inc(&self) {}
    fn add(&self, _v: f64) {}
}

/// A counter vector that does nothing.
pub struct NopCounterVec;

impl CounterVec for NopCounterVec {
    fn with(&self, _labels: &Labels) -> Box<dyn Counter> {
        Box::new(NopCounter)
    }
}

/// A counter vector backed by a registered prometheus vector. Label
/// mismatches degrade to a no-op counter instead of panicking.
pub struct PrometheusCounterVec(pub prometheus::CounterVec);

impl CounterVec for PrometheusCounterVec {
    fn with(&self, labels: &Labels) -> Box<dyn Counter> {
        match self.0.get_metric_with(labels) {
            Ok(counter) => Box::new(PrometheusCounter(counter)),
            Err(e) => {
                warn!("counter labels rejected: {e}");
                Box::new(NopCounter)
            }
        }
    }
}

struct PrometheusCounter(prometheus::Counter);

impl Counter for PrometheusCounter {
    fn inc(&self) {
        self.0.inc();
    }

    fn add(&self, v: f64) {
        self.0.inc_by(v);
    }
}
