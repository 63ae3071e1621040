//! Pluggable rules the link cache uses to weigh links and update their stability.
use crate::config::StabilityPolicyKind;
use chrono::Duration;

pub trait StabilityPolicy: std::fmt::Debug + Send + Sync {
    /// Cost of crossing a link whose remaining stability is `stability`.
    fn link_cost(&self, stability: Duration) -> u64;

    /// Whether a path reaching a node through a link of stability `candidate` should replace the
    /// current path, reaching it at the same cost through a link of stability `current`.
    fn prefer(&self, candidate: Duration, current: Duration) -> bool;

    /// New stability of a node that was used successfully.
    fn increase(&self, stability: Duration) -> Duration;

    /// New stability of a node involved in a link failure.
    fn decrease(&self, stability: Duration) -> Duration;
}

#[derive(Debug)]
pub struct StabilityWeighted {
    pub incr_factor: u32,
    pub decr_factor: u32,
}

#[derive(Debug)]
pub struct ShortestHop {
    pub incr_factor: u32,
    pub decr_factor: u32,
}

impl StabilityPolicy for StabilityWeighted {
    fn link_cost(&self, _stability: Duration) -> u64 {
        1
    }

    fn prefer(&self, candidate: Duration, current: Duration) -> bool {
        candidate > current
    }

    fn increase(&self, stability: Duration) -> Duration {
        stability * self.incr_factor as i32
    }

    fn decrease(&self, stability: Duration) -> Duration {
        stability / self.decr_factor.max(1) as i32
    }
}

impl StabilityPolicy for ShortestHop {
    fn link_cost(&self, _stability: Duration) -> u64 {
        1
    }

    fn prefer(&self, _candidate: Duration, _current: Duration) -> bool {
        false
    }

    fn increase(&self, stability: Duration) -> Duration {
        stability * self.incr_factor as i32
    }

    fn decrease(&self, stability: Duration) -> Duration {
        stability / self.decr_factor.max(1) as i32
    }
}

/// Builds the policy selected in the configuration.
pub fn build_policy(
    kind: StabilityPolicyKind,
    incr_factor: u32,
    decr_factor: u32,
) -> Box<dyn StabilityPolicy> {
    match kind {
        StabilityPolicyKind::StabilityWeighted => Box::new(StabilityWeighted {
            incr_factor,
            decr_factor,
        }),
        StabilityPolicyKind::ShortestHop => Box::new(ShortestHop {
            incr_factor,
            decr_factor,
        }),
    }
}
