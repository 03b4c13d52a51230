use crate::fetch::block::{BlockDetector, BlockReason, BlockVerdict};
use crate::fetch::proxy::ProxyHealthTracker;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rand::{rng, Rng};
use reqwest::header::USER_AGENT;
use reqwest::{Client, Proxy};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

/// Browser-like headers sent with every request
const DEFAULT_HEADERS: &[(&str, &str)] = &[
    ("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    ("Accept-Language", "sv,en-US;q=0.9,en;q=0.8"),
    ("DNT", "1"),
    ("Upgrade-Insecure-Requests", "1"),
    ("Cache-Control", "max-age=0"),
];

/// One page to fetch
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    /// Added on top of the random pacing delay; set by the caller to back off
    pub extra_delay: Duration,
    /// Upper bound on the network exchange, pacing excluded
    pub timeout: Option<Duration>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            extra_delay: Duration::ZERO,
            timeout: None,
        }
    }

    pub fn with_extra_delay(mut self, delay: Duration) -> Self {
        self.extra_delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A completed, non-blocked response
#[derive(Debug, Clone)]
pub struct Page {
    pub url: String,
    pub status: u16,
    pub body: String,
    pub endpoint: Option<String>,
}

impl Page {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Ok(Page),
    Blocked {
        reason: BlockReason,
        endpoint: Option<String>,
    },
    TransportError {
        cause: String,
        endpoint: Option<String>,
    },
}

impl FetchOutcome {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchOutcome::Ok(_))
    }
}

/// Request as it goes on the wire
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: String,
    pub user_agent: String,
    pub proxy: Option<String>,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Performs a single HTTP exchange. No retries, no classification.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &OutboundRequest) -> Result<RawResponse>;
}

/// reqwest-backed transport with one cached client per egress path
pub struct ReqwestTransport {
    timeout: Duration,
    clients: Mutex<HashMap<Option<String>, Client>>,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<Client> {
        let mut clients = self.clients.lock().unwrap_or_else(|p| p.into_inner());
        let key = proxy.map(str::to_string);
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder().timeout(self.timeout);
        if let Some(address) = proxy {
            builder = builder.proxy(Proxy::all(address).context("Invalid proxy address")?);
        }
        let client = builder.build().context("Failed to create HTTP client")?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<RawResponse> {
        let client = self.client_for(request.proxy.as_deref())?;

        let mut builder = client
            .get(&request.url)
            .header(USER_AGENT, &request.user_agent);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.context("Failed to fetch page")?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        Ok(RawResponse { status, body })
    }
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub user_agents: Vec<String>,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(2000),
        }
    }
}

impl FetchSettings {
    fn random_user_agent(&self) -> String {
        if self.user_agents.is_empty() {
            return DEFAULT_USER_AGENTS[0].to_string();
        }
        let i = rng().random_range(0..self.user_agents.len());
        self.user_agents[i].clone()
    }

    fn random_delay(&self) -> Duration {
        let min = self.min_delay.as_millis() as u64;
        let max = (self.max_delay.as_millis() as u64).max(min);
        Duration::from_millis(rng().random_range(min..=max))
    }
}

/// Wraps one outbound fetch with proxy selection, user-agent rotation,
/// pacing and block classification.
pub struct FetchGate {
    transport: Arc<dyn Transport>,
    proxies: Arc<ProxyHealthTracker>,
    detector: BlockDetector,
    settings: FetchSettings,
}

impl FetchGate {
    pub fn new(
        transport: Arc<dyn Transport>,
        proxies: Arc<ProxyHealthTracker>,
        detector: BlockDetector,
        settings: FetchSettings,
    ) -> Self {
        Self {
            transport,
            proxies,
            detector,
            settings,
        }
    }

    pub fn proxies(&self) -> &Arc<ProxyHealthTracker> {
        &self.proxies
    }

    pub async fn fetch(&self, request: FetchRequest) -> FetchOutcome {
        let delay = self.settings.random_delay() + request.extra_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let endpoint = self.proxies.select();
        let outbound = self.outbound(&request.url, endpoint.clone());
        debug!(
            "Fetching {} via {} as {}",
            request.url,
            endpoint.as_deref().unwrap_or("direct"),
            outbound.user_agent
        );

        let sent = match request.timeout {
            Some(limit) => tokio::time::timeout(limit, self.transport.send(&outbound))
                .await
                .unwrap_or_else(|_| Err(anyhow!("timed out after {:?}", limit))),
            None => self.transport.send(&outbound).await,
        };

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                if let Some(address) = &endpoint {
                    self.proxies.report_failure(address);
                }
                warn!("Transport error for {}: {:#}", request.url, e);
                return FetchOutcome::TransportError {
                    cause: format!("{:#}", e),
                    endpoint,
                };
            }
        };

        match self.detector.classify(response.status, &response.body) {
            BlockVerdict::Blocked(reason) => {
                if let Some(address) = &endpoint {
                    self.proxies.report_failure(address);
                }
                warn!("Detected blocking behavior from {} ({})", request.url, reason);
                FetchOutcome::Blocked { reason, endpoint }
            }
            BlockVerdict::Ok => {
                debug!("Downloaded {} bytes from {}", response.body.len(), request.url);
                FetchOutcome::Ok(Page {
                    url: request.url,
                    status: response.status,
                    body: response.body,
                    endpoint,
                })
            }
        }
    }

    /// Send one request through every configured proxy and mark the ones
    /// that fail or get blocked. Returns the number of working proxies.
    pub async fn probe_endpoints(&self, test_url: &str) -> usize {
        let mut working = 0;
        for endpoint in self.proxies.snapshot() {
            let outbound = self.outbound(test_url, Some(endpoint.address.clone()));
            let healthy = match self.transport.send(&outbound).await {
                Ok(response) => {
                    (200..300).contains(&response.status)
                        && self.detector.classify(response.status, &response.body)
                            == BlockVerdict::Ok
                }
                Err(e) => {
                    debug!("Proxy {} probe failed: {:#}", endpoint.address, e);
                    false
                }
            };

            if healthy {
                working += 1;
            } else {
                self.proxies.report_failure(&endpoint.address);
            }
        }
        info!("{} working proxies available", working);
        working
    }

    fn outbound(&self, url: &str, proxy: Option<String>) -> OutboundRequest {
        OutboundRequest {
            url: url.to_string(),
            user_agent: self.settings.random_user_agent(),
            proxy,
            headers: DEFAULT_HEADERS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_delay_stays_in_range() {
        let settings = FetchSettings {
            user_agents: vec![],
            min_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
        };
        for _ in 0..100 {
            let d = settings.random_delay();
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(20));
        }
    }

    #[test]
    fn test_inverted_delay_range_does_not_panic() {
        let settings = FetchSettings {
            user_agents: vec![],
            min_delay: Duration::from_millis(30),
            max_delay: Duration::from_millis(5),
        };
        assert_eq!(settings.random_delay(), Duration::from_millis(30));
    }

    #[test]
    fn test_user_agent_comes_from_pool() {
        let settings = FetchSettings {
            user_agents: vec!["ua-1".to_string(), "ua-2".to_string()],
            ..Default::default()
        };
        for _ in 0..20 {
            let ua = settings.random_user_agent();
            assert!(ua == "ua-1" || ua == "ua-2");
        }
        let empty = FetchSettings {
            user_agents: vec![],
            ..Default::default()
        };
        assert_eq!(empty.random_user_agent(), DEFAULT_USER_AGENTS[0]);
    }
}
