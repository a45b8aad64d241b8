//! Lock-free rolling latency averages.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

const ALPHA: f64 = 0.2;

/// Exponential moving average stored as `f64` bits. NaN means "no sample yet".
#[derive(Debug)]
pub struct RollingAverage {
    bits: AtomicU64,
}

impl Default for RollingAverage {
    fn default() -> Self {
        Self { bits: AtomicU64::new(f64::NAN.to_bits()) }
    }
}

impl RollingAverage {
    pub fn record(&self, sample: f64) {
        let _ = self.bits.fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
            let current = f64::from_bits(bits);
            let next = if current.is_nan() { sample } else { current + ALPHA * (sample - current) };
            Some(next.to_bits())
        });
    }

    pub fn get(&self) -> Option<f64> {
        let v = f64::from_bits(self.bits.load(Ordering::Acquire));
        (!v.is_nan()).then_some(v)
    }
}

/// Wall-clock time spent in each orchestrator stage of one query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StageTimings {
    pub enhance_ms: f64,
    pub retrieve_ms: f64,
    pub rerank_ms: Option<f64>,
    pub total_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencySnapshot {
    pub queries: u64,
    pub enhance_ms: Option<f64>,
    pub retrieve_ms: Option<f64>,
    pub rerank_ms: Option<f64>,
    pub total_ms: Option<f64>,
}

#[derive(Debug, Default)]
pub struct LatencyStats {
    queries: AtomicU64,
    enhance: RollingAverage,
    retrieve: RollingAverage,
    rerank: RollingAverage,
    total: RollingAverage,
}

impl LatencyStats {
    pub fn record(&self, timings: &StageTimings) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.enhance.record(timings.enhance_ms);
        self.retrieve.record(timings.retrieve_ms);
        if let Some(ms) = timings.rerank_ms {
            self.rerank.record(ms);
        }
        self.total.record(timings.total_ms);
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            queries: self.queries.load(Ordering::Relaxed),
            enhance_ms: self.enhance.get(),
            retrieve_ms: self.retrieve.get(),
            rerank_ms: self.rerank.get(),
            total_ms: self.total.get(),
        }
    }
}
