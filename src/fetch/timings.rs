//! Per-request stage timings / 请求阶段耗时统计
//!
//! Passed explicitly by `&mut` through the call chain and serialized into the
//! search response as `durations` (microseconds).

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct StageTimings {
    stages: BTreeMap<String, u64>,
}

impl StageTimings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stage duration, accumulating repeated stages / 记录阶段耗时
    pub fn record(&mut self, stage: &str, elapsed: Duration) {
        *self.stages.entry(stage.to_string()).or_default() += elapsed.as_micros() as u64;
    }

    /// Record the time elapsed since `start` / 记录从 start 起的耗时
    pub fn record_since(&mut self, stage: &str, start: Instant) {
        self.record(stage, start.elapsed());
    }

    /// Time a synchronous closure / 计时同步闭包
    pub fn time<T>(&mut self, stage: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let value = f();
        self.record_since(stage, start);
        value
    }

    pub fn get(&self, stage: &str) -> Option<u64> {
        self.stages.get(stage).copied()
    }

    pub fn contains(&self, stage: &str) -> bool {
        self.stages.contains_key(stage)
    }

    /// Merge timings collected by another flight / 合并其他流程的耗时
    pub fn merge(&mut self, other: &StageTimings) {
        for (stage, micros) in &other.stages {
            *self.stages.entry(stage.clone()).or_default() += micros;
        }
    }
}
