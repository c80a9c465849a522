//! Server selection policy
//!
//! Picks one server among the candidates a routing table offers for a mode.

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

/// Server selection policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RoutingPolicy {
    /// Fewest leased connections, ties broken at random (default)
    #[default]
    LeastConnected,
    /// Rotate through the candidates
    RoundRobin,
    /// Uniformly random
    Random,
}

/// Server selector
#[derive(Debug, Default)]
pub struct ServerSelector {
    policy: RoutingPolicy,
    round_robin_index: AtomicUsize,
}

impl ServerSelector {
    pub fn new(policy: RoutingPolicy) -> Self {
        Self {
            policy,
            round_robin_index: AtomicUsize::new(0),
        }
    }

    /// Select one of `candidates`.
    ///
    /// `load` reports how busy a candidate is; only the least-connected
    /// policy looks at it.
    pub fn select<'a, T>(&self, candidates: &'a [T], load: impl Fn(&T) -> usize) -> Option<&'a T> {
        if candidates.is_empty() {
            return None;
        }

        match self.policy {
            RoutingPolicy::RoundRobin => {
                let index = self.round_robin_index.fetch_add(1, Ordering::Relaxed);
                Some(&candidates[index % candidates.len()])
            }
            RoutingPolicy::Random => {
                let index = rand::thread_rng().gen_range(0..candidates.len());
                Some(&candidates[index])
            }
            RoutingPolicy::LeastConnected => {
                let loads: Vec<usize> = candidates.iter().map(&load).collect();
                let least = loads.iter().copied().min()?;
                let idle: Vec<usize> = (0..candidates.len()).filter(|&i| loads[i] == least).collect();
                let pick = idle[rand::thread_rng().gen_range(0..idle.len())];
                Some(&candidates[pick])
            }
        }
    }

    pub fn policy(&self) -> RoutingPolicy {
        self.policy
    }
}
