use chrono::{DateTime, Duration, Utc};
use rand::{rng, Rng};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub const DEFAULT_ROTATE_EVERY: u32 = 10;
pub const DEFAULT_COOLDOWN_MINUTES: i64 = 30;

/// An outbound egress path and its health
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyEndpoint {
    pub address: String,
    pub last_failure: Option<DateTime<Utc>>,
}

impl ProxyEndpoint {
    fn new(address: String) -> Self {
        Self {
            address,
            last_failure: None,
        }
    }

    fn is_eligible(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        match self.last_failure {
            Some(failed_at) => now - failed_at > cooldown,
            None => true,
        }
    }
}

#[derive(Debug)]
struct PoolState {
    endpoints: Vec<ProxyEndpoint>,
    active: Option<usize>,
    uses: u32,
}

/// Owns the proxy pool and its failure ledger.
///
/// Shared between fetch workers behind `Arc`; every operation is one short
/// critical section with no I/O.
#[derive(Debug)]
pub struct ProxyHealthTracker {
    state: Mutex<PoolState>,
    rotate_every: u32,
    cooldown: Duration,
}

impl ProxyHealthTracker {
    pub fn new(addresses: Vec<String>, rotate_every: u32, cooldown: Duration) -> Self {
        let endpoints: Vec<ProxyEndpoint> = addresses
            .into_iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .map(ProxyEndpoint::new)
            .collect();

        if endpoints.is_empty() {
            warn!("No proxies configured. Fetching without proxy rotation may lead to IP blocking.");
        } else {
            info!("Loaded {} proxies", endpoints.len());
        }

        Self {
            state: Mutex::new(PoolState {
                endpoints,
                active: None,
                uses: 0,
            }),
            rotate_every: rotate_every.max(1),
            cooldown,
        }
    }

    pub fn with_defaults(addresses: Vec<String>) -> Self {
        Self::new(
            addresses,
            DEFAULT_ROTATE_EVERY,
            Duration::minutes(DEFAULT_COOLDOWN_MINUTES),
        )
    }

    pub fn select(&self) -> Option<String> {
        self.select_at(Utc::now())
    }

    /// Pick the endpoint for the next fetch, rotating every `rotate_every` uses
    pub fn select_at(&self, now: DateTime<Utc>) -> Option<String> {
        let mut state = self.lock();
        if state.endpoints.is_empty() {
            return None;
        }

        if state.active.is_none() || state.uses >= self.rotate_every {
            let next = Self::next_endpoint(&state.endpoints, now, self.cooldown);
            state.active = next;
            state.uses = 0;
        }

        let idx = state.active?;
        state.uses += 1;
        Some(state.endpoints[idx].address.clone())
    }

    fn next_endpoint(
        endpoints: &[ProxyEndpoint],
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Option<usize> {
        let eligible: Vec<usize> = endpoints
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_eligible(now, cooldown))
            .map(|(i, _)| i)
            .collect();

        if eligible.is_empty() {
            // Everything failed recently: take the least recently failed one
            let fallback = endpoints
                .iter()
                .enumerate()
                .filter_map(|(i, e)| e.last_failure.map(|t| (i, t)))
                .min_by_key(|(_, t)| *t)
                .map(|(i, _)| i);
            if let Some(i) = fallback {
                warn!(
                    "All proxies have failed recently. Using least recently failed: {}",
                    endpoints[i].address
                );
            }
            return fallback;
        }

        let pick = eligible[rng().random_range(0..eligible.len())];
        debug!("Selected proxy: {}", endpoints[pick].address);
        Some(pick)
    }

    pub fn report_failure(&self, address: &str) {
        self.report_failure_at(address, Utc::now());
    }

    pub fn report_failure_at(&self, address: &str, now: DateTime<Utc>) {
        let mut state = self.lock();
        let Some(idx) = state.endpoints.iter().position(|e| e.address == address) else {
            debug!("Ignoring failure for unknown proxy {}", address);
            return;
        };

        state.endpoints[idx].last_failure = Some(now);
        if state.active == Some(idx) {
            state.active = None;
            state.uses = 0;
        }
        warn!("Marked proxy as failed: {}", address);
    }

    /// Current pool health, for logging and probes
    pub fn snapshot(&self) -> Vec<ProxyEndpoint> {
        self.lock().endpoints.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().endpoints.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
