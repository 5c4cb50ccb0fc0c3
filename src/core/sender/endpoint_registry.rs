// SPDX-License-Identifier: MIT OR Apache-2.0

//! Region Endpoint Registry
//!
//! Per-region endpoint health plus the adaptive concurrency cap. A single
//! probe actor owns recovery: it tests unavailable endpoints and re-permits
//! a region the moment one of them answers again.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

#[derive(Clone, Debug)]
pub struct EndpointInfo {
    pub valid: bool,
    pub latency_ms: u32,
}

struct RegionState {
    endpoints: BTreeMap<String, EndpointInfo>,
    default_endpoint: String,
    concurrency: usize,
    unlimited: bool,
    in_flight: usize,
    continuous_errors: u32,
}

impl RegionState {
    fn new() -> Self {
        Self {
            endpoints: BTreeMap::new(),
            default_endpoint: String::new(),
            concurrency: 1,
            unlimited: false,
            in_flight: 0,
            continuous_errors: 0,
        }
    }

    fn available(&self) -> bool {
        self.endpoints.values().any(|e| e.valid)
    }

    fn effective_concurrency(&self, total: usize) -> usize {
        if self.unlimited {
            total
        } else {
            self.concurrency
        }
    }
}

/// Probe seam; the wire-level check (a lightweight GET in production)
/// lives with the destination plugin.
pub trait NetworkProber: Send + Sync {
    fn probe(&self, region: &str, endpoint: &str) -> bool;
}

pub struct RegionEndpointRegistry {
    regions: RwLock<HashMap<String, RegionState>>,
    total_concurrency: usize,
    reset_error_count: u32,
}

impl RegionEndpointRegistry {
    pub fn new(total_concurrency: usize, reset_error_count: u32) -> Self {
        Self {
            regions: RwLock::new(HashMap::new()),
            total_concurrency: total_concurrency.max(1),
            reset_error_count: reset_error_count.max(1),
        }
    }

    pub fn register_endpoint(&self, region: &str, endpoint: &str, is_default: bool) {
        if endpoint.is_empty() {
            return;
        }
        let mut regions = self.regions.write().expect("region registry lock");
        let state = regions
            .entry(region.to_string())
            .or_insert_with(RegionState::new);
        state.endpoints.entry(endpoint.to_string()).or_insert(EndpointInfo {
            valid: true,
            latency_ms: 0,
        });
        if is_default || state.default_endpoint.is_empty() {
            state.default_endpoint = endpoint.to_string();
        }
    }

    /// The endpoint the next request should use: the default while healthy,
    /// otherwise any healthy endpoint of the region.
    pub fn pick_endpoint(&self, region: &str) -> Option<String> {
        let regions = self.regions.read().expect("region registry lock");
        let state = regions.get(region)?;
        if let Some(info) = state.endpoints.get(&state.default_endpoint) {
            if info.valid {
                return Some(state.default_endpoint.clone());
            }
        }
        state
            .endpoints
            .iter()
            .find(|(_, info)| info.valid)
            .map(|(ep, _)| ep.clone())
    }

    pub fn set_endpoint_status(&self, region: &str, endpoint: &str, valid: bool, latency_ms: u32) {
        let mut regions = self.regions.write().expect("region registry lock");
        if let Some(state) = regions.get_mut(region) {
            if let Some(info) = state.endpoints.get_mut(endpoint) {
                info.valid = valid;
                info.latency_ms = latency_ms;
            }
        }
    }

    pub fn region_available(&self, region: &str) -> bool {
        let regions = self.regions.read().expect("region registry lock");
        regions.get(region).map(|s| s.available()).unwrap_or(true)
    }

    /// Whether any registered region can currently be reached. An empty
    /// registry counts as available so boot does not stall.
    pub fn has_network_available(&self) -> bool {
        let regions = self.regions.read().expect("region registry lock");
        regions.is_empty() || regions.values().any(|s| s.available())
    }

    /// Reserves one request slot against the region's concurrency cap.
    pub fn try_acquire_slot(&self, region: &str) -> bool {
        let mut regions = self.regions.write().expect("region registry lock");
        let Some(state) = regions.get_mut(region) else {
            // Unregistered regions are not throttled.
            return true;
        };
        if !state.available() {
            return false;
        }
        if state.in_flight >= state.effective_concurrency(self.total_concurrency) {
            return false;
        }
        state.in_flight += 1;
        true
    }

    pub fn release_slot(&self, region: &str) {
        let mut regions = self.regions.write().expect("region registry lock");
        if let Some(state) = regions.get_mut(region) {
            state.in_flight = state.in_flight.saturating_sub(1);
        }
    }

    /// A success grows the region toward the global cap and clears its
    /// continuous-error count; at the cap the region goes unlimited.
    pub fn on_send_success(&self, region: &str) {
        let mut regions = self.regions.write().expect("region registry lock");
        if let Some(state) = regions.get_mut(region) {
            state.continuous_errors = 0;
            if !state.unlimited {
                state.concurrency += 1;
                if state.concurrency >= self.total_concurrency {
                    state.unlimited = true;
                }
            }
        }
    }

    /// Enough continuous errors shrink the region to its fair share of the
    /// global budget.
    pub fn on_send_error(&self, region: &str) {
        let mut regions = self.regions.write().expect("region registry lock");
        let region_count = regions.len().max(1);
        if let Some(state) = regions.get_mut(region) {
            state.continuous_errors += 1;
            if state.continuous_errors >= self.reset_error_count {
                state.concurrency = (self.total_concurrency / region_count).max(1);
                state.unlimited = false;
                state.continuous_errors = 0;
            }
        }
    }

    /// One probe pass over every unavailable endpoint. Returns the regions
    /// that recovered so the caller can re-permit them and signal the
    /// sender.
    pub fn probe_unavailable(&self, prober: &dyn NetworkProber) -> Vec<String> {
        let targets: Vec<(String, String)> = {
            let regions = self.regions.read().expect("region registry lock");
            regions
                .iter()
                .flat_map(|(region, state)| {
                    state
                        .endpoints
                        .iter()
                        .filter(|(_, info)| !info.valid)
                        .map(|(ep, _)| (region.clone(), ep.clone()))
                        .collect::<Vec<_>>()
                })
                .collect()
        };

        let mut recovered = Vec::new();
        for (region, endpoint) in targets {
            let was_available = self.region_available(&region);
            if prober.probe(&region, &endpoint) {
                self.set_endpoint_status(&region, &endpoint, true, 0);
                if !was_available {
                    tracing::info!(region = %region, endpoint = %endpoint, "region endpoint recovered");
                    recovered.push(region);
                }
            }
        }
        recovered
    }

    pub fn concurrency(&self, region: &str) -> Option<usize> {
        let regions = self.regions.read().expect("region registry lock");
        regions
            .get(region)
            .map(|s| s.effective_concurrency(self.total_concurrency))
    }
}
