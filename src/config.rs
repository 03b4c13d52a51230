use crate::fetch::block::DEFAULT_BLOCK_KEYWORDS;
use crate::fetch::gate::DEFAULT_USER_AGENTS;
use crate::fetch::FetchSettings;
use anyhow::Result;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub proxy: ProxyConfig,
    pub fetch: FetchConfig,
    pub scheduler: SchedulerConfig,
    pub store: StoreConfig,
    pub sites: SitesConfig,
    pub event_bus_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub endpoints: Vec<String>,
    pub rotate_every: u32,
    pub cooldown_minutes: i64,
    /// Probe every proxy against this URL on startup
    pub probe_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agents: Vec<String>,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub timeout: Duration,
    pub block_keywords: Vec<String>,
}

impl FetchConfig {
    pub fn settings(&self) -> FetchSettings {
        FetchSettings {
            user_agents: self.user_agents.clone(),
            min_delay: self.min_delay,
            max_delay: self.max_delay,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub fetch_timeout: Duration,
    /// UTC hour of the daily run
    pub daily_hour: u32,
    pub run_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_retries: 3,
            backoff_base: Duration::from_secs(5),
            backoff_cap: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(45),
            daily_hour: 1,
            run_on_start: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct SitesConfig {
    pub booli_urls: Vec<String>,
}

fn var_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn list_var(name: &str, separator: char) -> Vec<String> {
    env::var(name)
        .unwrap_or_default()
        .split(separator)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn list_or(name: &str, separator: char, default: &[&str]) -> Vec<String> {
    let values = list_var(name, separator);
    if values.is_empty() {
        default.iter().map(|s| s.to_string()).collect()
    } else {
        values
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let defaults = SchedulerConfig::default();
        let mut min_delay: u64 = var_or("FETCH_MIN_DELAY_MS", 500);
        let mut max_delay: u64 = var_or("FETCH_MAX_DELAY_MS", 2000);
        if min_delay > max_delay {
            std::mem::swap(&mut min_delay, &mut max_delay);
        }

        Ok(AppConfig {
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            proxy: ProxyConfig {
                endpoints: list_var("PROXY_LIST", ','),
                rotate_every: var_or("PROXY_ROTATE_EVERY", 10),
                cooldown_minutes: var_or("PROXY_COOLDOWN_MINUTES", 30),
                probe_url: env::var("PROXY_PROBE_URL").ok().filter(|u| !u.trim().is_empty()),
            },
            fetch: FetchConfig {
                user_agents: list_or("USER_AGENTS", '|', DEFAULT_USER_AGENTS),
                min_delay: Duration::from_millis(min_delay),
                max_delay: Duration::from_millis(max_delay),
                timeout: Duration::from_secs(var_or("FETCH_TIMEOUT_SECS", 30)),
                block_keywords: list_or("BLOCK_KEYWORDS", ',', DEFAULT_BLOCK_KEYWORDS),
            },
            scheduler: SchedulerConfig {
                workers: var_or("SCHEDULER_WORKERS", defaults.workers).max(1),
                max_retries: var_or("SCHEDULER_MAX_RETRIES", defaults.max_retries),
                fetch_timeout: Duration::from_secs(var_or("SCHEDULER_FETCH_TIMEOUT_SECS", 45)),
                daily_hour: var_or("SCHEDULER_DAILY_HOUR", defaults.daily_hour).min(23),
                run_on_start: var_or("SCHEDULER_RUN_ON_START", defaults.run_on_start),
                ..defaults
            },
            store: StoreConfig {
                path: PathBuf::from(
                    env::var("STORE_PATH").unwrap_or_else(|_| "data/listings.json".to_string()),
                ),
            },
            sites: SitesConfig {
                booli_urls: list_var("BOOLI_URLS", ','),
            },
            event_bus_capacity: var_or("EVENT_BUS_CAPACITY", 256),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_or_falls_back_on_garbage() {
        env::set_var("HOUSING_INGEST_TEST_NUM", "not-a-number");
        assert_eq!(var_or("HOUSING_INGEST_TEST_NUM", 7u32), 7);
        env::set_var("HOUSING_INGEST_TEST_NUM", " 12 ");
        assert_eq!(var_or("HOUSING_INGEST_TEST_NUM", 7u32), 12);
    }

    #[test]
    fn test_list_var_splits_and_trims() {
        env::set_var("HOUSING_INGEST_TEST_LIST", "http://a:1, ,http://b:2 ");
        assert_eq!(
            list_var("HOUSING_INGEST_TEST_LIST", ','),
            vec!["http://a:1".to_string(), "http://b:2".to_string()]
        );
        assert!(list_var("HOUSING_INGEST_TEST_MISSING", ',').is_empty());
    }

    #[test]
    fn test_list_or_uses_defaults_when_unset() {
        let agents = list_or("HOUSING_INGEST_TEST_NO_AGENTS", '|', DEFAULT_USER_AGENTS);
        assert_eq!(agents.len(), DEFAULT_USER_AGENTS.len());
    }
}
