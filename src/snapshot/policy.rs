use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::aggregate::Root;

/// Pure decision function for when to snapshot.
///
/// Policies decide; they never persist. Per-aggregate tracking state
/// (event counts, last-fire clocks) lives behind interior mutability so
/// a policy can be shared by reference across threads.
pub trait SnapshotPolicy: Send + Sync {
    /// Whether a snapshot should be taken now, given the aggregate's
    /// bookkeeping and the number of events applied since the last check.
    fn should_snapshot(&self, root: &Root, events_applied: u64) -> bool;

    /// The cadence this policy aims for, when it has one. Composite
    /// policies aggregate this across children.
    fn interval_hint(&self) -> Option<Duration> {
        None
    }

    /// Observation feed for restore-latency-adaptive policies. Others
    /// ignore it.
    fn record_restore(&self, _aggregate_id: &str, _elapsed: Duration) {}
}

/// Fires once every `threshold` appended events, counted per aggregate.
pub struct EveryNEvents {
    threshold: u64,
    accumulated: RwLock<HashMap<String, u64>>,
}

impl EveryNEvents {
    pub fn new(threshold: u64) -> Self {
        EveryNEvents {
            threshold: threshold.max(1),
            accumulated: RwLock::new(HashMap::new()),
        }
    }
}

impl SnapshotPolicy for EveryNEvents {
    fn should_snapshot(&self, root: &Root, events_applied: u64) -> bool {
        let Ok(mut accumulated) = self.accumulated.write() else {
            return false;
        };
        let count = accumulated.entry(root.id().to_string()).or_insert(0);
        *count += events_applied;
        if *count >= self.threshold {
            *count = 0;
            true
        } else {
            false
        }
    }
}

/// Fires when at least `every` has elapsed since the last fire for the
/// aggregate. The first check seeds the clock without firing.
pub struct TimeInterval {
    every: Duration,
    last_fire: RwLock<HashMap<String, Instant>>,
}

impl TimeInterval {
    pub fn new(every: Duration) -> Self {
        TimeInterval {
            every,
            last_fire: RwLock::new(HashMap::new()),
        }
    }
}

impl SnapshotPolicy for TimeInterval {
    fn should_snapshot(&self, root: &Root, _events_applied: u64) -> bool {
        let Ok(mut last_fire) = self.last_fire.write() else {
            return false;
        };
        let now = Instant::now();
        match last_fire.get(root.id()) {
            Some(last) if now.duration_since(*last) >= self.every => {
                last_fire.insert(root.id().to_string(), now);
                true
            }
            Some(_) => false,
            None => {
                last_fire.insert(root.id().to_string(), now);
                false
            }
        }
    }

    fn interval_hint(&self) -> Option<Duration> {
        Some(self.every)
    }
}

/// Fires whenever the aggregate's version is a multiple of `every`.
pub struct VersionInterval {
    every: u64,
}

impl VersionInterval {
    pub fn new(every: u64) -> Self {
        VersionInterval {
            every: every.max(1),
        }
    }
}

impl SnapshotPolicy for VersionInterval {
    fn should_snapshot(&self, root: &Root, _events_applied: u64) -> bool {
        root.current_version() > 0 && root.current_version() % self.every == 0
    }
}

/// How a composite combines its children.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositeMode {
    /// Every child must agree.
    All,
    /// Any child suffices.
    Any,
}

/// AND/OR combination of child policies.
pub struct CompositePolicy {
    mode: CompositeMode,
    children: Vec<Box<dyn SnapshotPolicy>>,
}

impl CompositePolicy {
    pub fn all(children: Vec<Box<dyn SnapshotPolicy>>) -> Self {
        CompositePolicy {
            mode: CompositeMode::All,
            children,
        }
    }

    pub fn any(children: Vec<Box<dyn SnapshotPolicy>>) -> Self {
        CompositePolicy {
            mode: CompositeMode::Any,
            children,
        }
    }
}

impl SnapshotPolicy for CompositePolicy {
    fn should_snapshot(&self, root: &Root, events_applied: u64) -> bool {
        // Every child observes every check; no short-circuiting, or
        // stateful children would miss event counts.
        let votes: Vec<bool> = self
            .children
            .iter()
            .map(|child| child.should_snapshot(root, events_applied))
            .collect();
        match self.mode {
            CompositeMode::All => !votes.is_empty() && votes.iter().all(|v| *v),
            CompositeMode::Any => votes.iter().any(|v| *v),
        }
    }

    fn interval_hint(&self) -> Option<Duration> {
        let hints = self.children.iter().filter_map(|child| child.interval_hint());
        match self.mode {
            CompositeMode::All => hints.max(),
            CompositeMode::Any => hints.min(),
        }
    }

    fn record_restore(&self, aggregate_id: &str, elapsed: Duration) {
        for child in &self.children {
            child.record_restore(aggregate_id, elapsed);
        }
    }
}

/// Event-count policy whose threshold halves while restores for the
/// aggregate run slower than `latency_bound`.
pub struct AdaptivePolicy {
    base_threshold: u64,
    latency_bound: Duration,
    accumulated: RwLock<HashMap<String, u64>>,
    slow: RwLock<HashMap<String, bool>>,
}

impl AdaptivePolicy {
    pub fn new(base_threshold: u64, latency_bound: Duration) -> Self {
        AdaptivePolicy {
            base_threshold: base_threshold.max(1),
            latency_bound,
            accumulated: RwLock::new(HashMap::new()),
            slow: RwLock::new(HashMap::new()),
        }
    }

    fn effective_threshold(&self, aggregate_id: &str) -> u64 {
        let is_slow = self
            .slow
            .read()
            .map(|slow| slow.get(aggregate_id).copied().unwrap_or(false))
            .unwrap_or(false);
        if is_slow {
            (self.base_threshold / 2).max(1)
        } else {
            self.base_threshold
        }
    }
}

impl SnapshotPolicy for AdaptivePolicy {
    fn should_snapshot(&self, root: &Root, events_applied: u64) -> bool {
        let threshold = self.effective_threshold(root.id());
        let Ok(mut accumulated) = self.accumulated.write() else {
            return false;
        };
        let count = accumulated.entry(root.id().to_string()).or_insert(0);
        *count += events_applied;
        if *count >= threshold {
            *count = 0;
            true
        } else {
            false
        }
    }

    fn record_restore(&self, aggregate_id: &str, elapsed: Duration) {
        if let Ok(mut slow) = self.slow.write() {
            slow.insert(aggregate_id.to_string(), elapsed > self.latency_bound);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_at(id: &str, version: u64) -> Root {
        let mut root = Root::with_id(id);
        root.mark_restored(id, version);
        root
    }

    #[test]
    fn every_n_events_fires_on_threshold() {
        let policy = EveryNEvents::new(3);
        let root = root_at("g-1", 1);
        assert!(!policy.should_snapshot(&root, 1));
        assert!(!policy.should_snapshot(&root, 1));
        assert!(policy.should_snapshot(&root, 1));
        // Counter reset after firing.
        assert!(!policy.should_snapshot(&root, 2));
        assert!(policy.should_snapshot(&root, 1));
    }

    #[test]
    fn every_n_events_counts_per_aggregate() {
        let policy = EveryNEvents::new(2);
        let a = root_at("a", 1);
        let b = root_at("b", 1);
        assert!(!policy.should_snapshot(&a, 1));
        assert!(!policy.should_snapshot(&b, 1));
        assert!(policy.should_snapshot(&a, 1));
        assert!(policy.should_snapshot(&b, 1));
    }

    #[test]
    fn time_interval_seeds_then_fires() {
        let policy = TimeInterval::new(Duration::from_millis(0));
        let root = root_at("g-1", 1);
        // First check seeds the clock.
        assert!(!policy.should_snapshot(&root, 1));
        // Zero interval: any later check fires.
        assert!(policy.should_snapshot(&root, 1));
        assert_eq!(policy.interval_hint(), Some(Duration::from_millis(0)));
    }

    #[test]
    fn time_interval_respects_gap() {
        let policy = TimeInterval::new(Duration::from_secs(3600));
        let root = root_at("g-1", 1);
        assert!(!policy.should_snapshot(&root, 1));
        assert!(!policy.should_snapshot(&root, 1));
    }

    #[test]
    fn version_interval_fires_on_multiples() {
        let policy = VersionInterval::new(5);
        assert!(!policy.should_snapshot(&root_at("g", 4), 1));
        assert!(policy.should_snapshot(&root_at("g", 5), 1));
        assert!(!policy.should_snapshot(&root_at("g", 6), 1));
        assert!(policy.should_snapshot(&root_at("g", 10), 1));
        assert!(!policy.should_snapshot(&root_at("g", 0), 1));
    }

    #[test]
    fn composite_all_requires_every_child() {
        let policy = CompositePolicy::all(vec![
            Box::new(VersionInterval::new(2)),
            Box::new(VersionInterval::new(3)),
        ]);
        assert!(!policy.should_snapshot(&root_at("g", 2), 1));
        assert!(!policy.should_snapshot(&root_at("g", 3), 1));
        assert!(policy.should_snapshot(&root_at("g", 6), 1));
    }

    #[test]
    fn composite_any_takes_first_agreement() {
        let policy = CompositePolicy::any(vec![
            Box::new(VersionInterval::new(2)),
            Box::new(VersionInterval::new(3)),
        ]);
        assert!(policy.should_snapshot(&root_at("g", 2), 1));
        assert!(policy.should_snapshot(&root_at("g", 3), 1));
        assert!(!policy.should_snapshot(&root_at("g", 5), 1));
    }

    #[test]
    fn composite_interval_hint_max_for_all_min_for_any() {
        let slow = Duration::from_secs(60);
        let fast = Duration::from_secs(10);
        let all = CompositePolicy::all(vec![
            Box::new(TimeInterval::new(slow)),
            Box::new(TimeInterval::new(fast)),
        ]);
        let any = CompositePolicy::any(vec![
            Box::new(TimeInterval::new(slow)),
            Box::new(TimeInterval::new(fast)),
        ]);
        assert_eq!(all.interval_hint(), Some(slow));
        assert_eq!(any.interval_hint(), Some(fast));
    }

    #[test]
    fn composite_children_observe_every_check() {
        // Any-mode with two counting children. If evaluation
        // short-circuited once the first child fires, the second child
        // would miss event counts and fall behind.
        let policy = CompositePolicy::any(vec![
            Box::new(EveryNEvents::new(2)),
            Box::new(EveryNEvents::new(3)),
        ]);
        let root = root_at("g", 1);
        assert!(!policy.should_snapshot(&root, 1)); // counts: 1/2, 1/3
        assert!(policy.should_snapshot(&root, 1)); // first fires at 2/2; second at 2/3
        assert!(policy.should_snapshot(&root, 1)); // second fires at 3/3
    }

    #[test]
    fn adaptive_lowers_threshold_after_slow_restore() {
        let policy = AdaptivePolicy::new(4, Duration::from_millis(50));
        let root = root_at("g-1", 1);

        assert!(!policy.should_snapshot(&root, 2));
        assert!(policy.should_snapshot(&root, 2)); // 4 >= 4

        policy.record_restore("g-1", Duration::from_millis(200));
        // Threshold is now 2.
        assert!(policy.should_snapshot(&root, 2));

        policy.record_restore("g-1", Duration::from_millis(10));
        // Back to 4.
        assert!(!policy.should_snapshot(&root, 2));
        assert!(policy.should_snapshot(&root, 2));
    }
}
