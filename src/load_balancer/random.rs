//! Uniform random selection.

use rand::Rng;

use crate::load_balancer::LoadBalancer;
use crate::registry::Endpoint;

/// Picks every candidate with equal probability.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelector;

impl RandomSelector {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for RandomSelector {
    fn next_index(&self, endpoints: &[Endpoint]) -> Option<usize> {
        if endpoints.is_empty() {
            return None;
        }
        Some(rand::thread_rng().gen_range(0..endpoints.len()))
    }
}
