//! Phase timings and counters.
//!
//! The recorder is a sum type chosen once from `Config::use_stats`; the
//! disabled variant makes every call a no-op so hot paths never branch on a
//! flag at call sites.

use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatPhase {
    BuildEngine,
    Parser,
    GraphBuild,
    Evaluation,
    Transform,
    Operation,
}

#[derive(Debug, Default)]
pub struct StatsStore {
    elapsed: FxHashMap<StatPhase, Duration>,
    counters: FxHashMap<StatPhase, u64>,
    running: FxHashMap<StatPhase, Instant>,
}

#[derive(Debug)]
pub enum Statistics {
    Enabled(StatsStore),
    Disabled,
}

impl Statistics {
    pub fn new(use_stats: bool) -> Self {
        if use_stats {
            Statistics::Enabled(StatsStore::default())
        } else {
            Statistics::Disabled
        }
    }

    pub fn start(&mut self, phase: StatPhase) {
        if let Statistics::Enabled(store) = self {
            store.running.insert(phase, Instant::now());
        }
    }

    pub fn stop(&mut self, phase: StatPhase) {
        if let Statistics::Enabled(store) = self {
            if let Some(started) = store.running.remove(&phase) {
                *store.elapsed.entry(phase).or_default() += started.elapsed();
            }
        }
    }

    pub fn bump(&mut self, phase: StatPhase) {
        if let Statistics::Enabled(store) = self {
            *store.counters.entry(phase).or_default() += 1;
        }
    }

    pub fn elapsed(&self, phase: StatPhase) -> Option<Duration> {
        match self {
            Statistics::Enabled(store) => store.elapsed.get(&phase).copied(),
            Statistics::Disabled => None,
        }
    }

    pub fn count(&self, phase: StatPhase) -> u64 {
        match self {
            Statistics::Enabled(store) => store.counters.get(&phase).copied().unwrap_or(0),
            Statistics::Disabled => 0,
        }
    }

    pub fn snapshot(&self) -> FxHashMap<StatPhase, Duration> {
        match self {
            Statistics::Enabled(store) => store.elapsed.clone(),
            Statistics::Disabled => FxHashMap::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_recorder_is_inert() {
        let mut stats = Statistics::new(false);
        stats.start(StatPhase::Evaluation);
        stats.stop(StatPhase::Evaluation);
        stats.bump(StatPhase::Operation);
        assert_eq!(stats.elapsed(StatPhase::Evaluation), None);
        assert_eq!(stats.count(StatPhase::Operation), 0);
    }

    #[test]
    fn enabled_recorder_accumulates() {
        let mut stats = Statistics::new(true);
        stats.start(StatPhase::Evaluation);
        stats.stop(StatPhase::Evaluation);
        stats.bump(StatPhase::Operation);
        stats.bump(StatPhase::Operation);
        assert!(stats.elapsed(StatPhase::Evaluation).is_some());
        assert_eq!(stats.count(StatPhase::Operation), 2);
    }
}
