use crate::config::SchedulerConfig;
use crate::fetch::{FetchGate, FetchOutcome, FetchRequest};
use crate::pipeline::{IngestionPipeline, ModelRegistry, Trainer};
use crate::scrapers::SiteSource;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Counters for one site in one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteReport {
    pub source: String,
    pub targets: usize,
    pub ingested: usize,
    pub skipped: usize,
    pub blocked: usize,
    pub transport_errors: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sites: Vec<SiteReport>,
}

impl CycleReport {
    pub fn ingested(&self) -> usize {
        self.sites.iter().map(|s| s.ingested).sum()
    }
}

enum TargetResult {
    Ingested,
    Skipped,
    Blocked,
    TransportError,
    Failed,
}

/// Drives crawl-and-ingest cycles over the configured sites
pub struct Scheduler {
    gate: Arc<FetchGate>,
    pipeline: Arc<IngestionPipeline>,
    sites: Vec<Arc<dyn SiteSource>>,
    config: SchedulerConfig,
    retraining: Option<(Arc<ModelRegistry>, Arc<dyn Trainer>)>,
}

impl Scheduler {
    pub fn new(
        gate: Arc<FetchGate>,
        pipeline: Arc<IngestionPipeline>,
        sites: Vec<Arc<dyn SiteSource>>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            gate,
            pipeline,
            sites,
            config,
            retraining: None,
        }
    }

    /// Retrain the scoring model in the background after every cycle
    pub fn with_trainer(mut self, models: Arc<ModelRegistry>, trainer: Arc<dyn Trainer>) -> Self {
        self.retraining = Some((models, trainer));
        self
    }

    /// Run once now (if configured), then daily at the configured UTC hour,
    /// until `shutdown` completes. A cycle in progress is abandoned.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        tokio::select! {
            _ = &mut shutdown => info!("Shutting down scheduler"),
            _ = self.run_forever() => {}
        }
    }

    async fn run_forever(&self) {
        if self.config.run_on_start {
            info!("Initial scraping on startup");
            self.run_cycle().await;
            self.spawn_retrain();
        }

        loop {
            let wait = until_next_run(Utc::now(), self.config.daily_hour);
            info!("Next scheduled cycle in {} minutes", wait.as_secs() / 60);
            tokio::time::sleep(wait).await;
            self.run_cycle().await;
            self.spawn_retrain();
        }
    }

    pub async fn run_cycle(&self) -> CycleReport {
        let started_at = Utc::now();
        info!("Starting all sites");

        let mut sites = Vec::with_capacity(self.sites.len());
        for site in &self.sites {
            sites.push(self.run_site(Arc::clone(site)).await);
        }

        let finished_at = Utc::now();
        let minutes = (finished_at - started_at).num_milliseconds() as f64 / 60_000.0;
        info!("All sites completed in {:.2} minutes", minutes);

        CycleReport {
            started_at,
            finished_at,
            sites,
        }
    }

    async fn run_site(&self, site: Arc<dyn SiteSource>) -> SiteReport {
        let mut report = SiteReport {
            source: site.source_name().to_string(),
            ..Default::default()
        };

        let targets = match site.targets().await {
            Ok(targets) => targets,
            Err(e) => {
                error!("Error listing targets for {}: {:#}", report.source, e);
                return report;
            }
        };
        report.targets = targets.len();
        info!("Starting site {} with {} pages", report.source, targets.len());

        let permits = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut tasks = JoinSet::new();

        for url in targets {
            let permits = Arc::clone(&permits);
            let gate = Arc::clone(&self.gate);
            let pipeline = Arc::clone(&self.pipeline);
            let site = Arc::clone(&site);
            let config = self.config.clone();

            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return TargetResult::Failed;
                };
                process_target(&gate, &pipeline, site.as_ref(), url, &config).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(TargetResult::Ingested) => report.ingested += 1,
                Ok(TargetResult::Skipped) => report.skipped += 1,
                Ok(TargetResult::Blocked) => report.blocked += 1,
                Ok(TargetResult::TransportError) => report.transport_errors += 1,
                Ok(TargetResult::Failed) => report.failed += 1,
                Err(e) => {
                    error!("Fetch worker for {} panicked: {}", report.source, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Finished site {}: {} ingested, {} skipped, {} blocked, {} transport errors, {} failed",
            report.source,
            report.ingested,
            report.skipped,
            report.blocked,
            report.transport_errors,
            report.failed
        );
        report
    }

    /// Start a background retrain if a trainer is installed
    pub fn spawn_retrain(&self) -> Option<JoinHandle<()>> {
        let (models, trainer) = self.retraining.as_ref()?;
        let models = Arc::clone(models);
        let trainer = Arc::clone(trainer);
        let store = Arc::clone(self.pipeline.store());

        Some(tokio::spawn(async move {
            match models.retrain(store.as_ref(), trainer).await {
                Ok(outcome) => debug!("Retrain finished: {:?}", outcome),
                Err(e) => error!("Error retraining investment model: {:#}", e),
            }
        }))
    }
}

async fn process_target(
    gate: &FetchGate,
    pipeline: &IngestionPipeline,
    site: &dyn SiteSource,
    url: String,
    config: &SchedulerConfig,
) -> TargetResult {
    let page = match fetch_with_retries(gate, &url, config).await {
        FetchOutcome::Ok(page) => page,
        FetchOutcome::Blocked { reason, .. } => {
            warn!("Giving up on {} after blocks ({})", url, reason);
            return TargetResult::Blocked;
        }
        FetchOutcome::TransportError { cause, .. } => {
            warn!("Giving up on {}: {}", url, cause);
            return TargetResult::TransportError;
        }
    };

    if !page.is_success() {
        warn!("{} returned status: {}", url, page.status);
        return TargetResult::Skipped;
    }

    let raw = match site.extract(&page) {
        Ok(Some(raw)) => raw,
        Ok(None) => return TargetResult::Skipped,
        Err(e) => {
            warn!("Failed to extract listing from {}: {:#}", url, e);
            return TargetResult::Failed;
        }
    };

    match pipeline.ingest(raw).await {
        Ok(listing) => {
            debug!("Ingested {} (score {:?})", listing.key(), listing.investment_score);
            TargetResult::Ingested
        }
        Err(e) => {
            error!("Error processing listing from {}: {}", url, e);
            TargetResult::Failed
        }
    }
}

/// Re-issue failed fetches up to `max_retries` times. Blocks back off
/// exponentially; transport errors retry without extra delay.
async fn fetch_with_retries(gate: &FetchGate, url: &str, config: &SchedulerConfig) -> FetchOutcome {
    let mut attempt: u32 = 0;
    let mut extra_delay = Duration::ZERO;

    loop {
        let request = FetchRequest::new(url)
            .with_extra_delay(extra_delay)
            .with_timeout(config.fetch_timeout);
        let outcome = gate.fetch(request).await;

        if !outcome.is_retryable() || attempt >= config.max_retries {
            return outcome;
        }

        attempt += 1;
        extra_delay = match outcome {
            FetchOutcome::Blocked { .. } => backoff(attempt, config.backoff_base, config.backoff_cap),
            _ => Duration::ZERO,
        };
        debug!("Retrying {} (attempt {}, backoff {:?})", url, attempt, extra_delay);
    }
}

/// `base * 2^(attempt - 1)`, capped
pub fn backoff(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(cap)
}

/// Time until the next `hour:00` UTC strictly after `now`
pub fn until_next_run(now: DateTime<Utc>, hour: u32) -> Duration {
    let today = now
        .date_naive()
        .and_hms_opt(hour.min(23), 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive));

    let next = match today {
        Some(at) if at > now => at,
        Some(at) => at + ChronoDuration::days(1),
        None => now + ChronoDuration::days(1),
    };
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let base = Duration::from_secs(5);
        let cap = Duration::from_secs(60);
        assert_eq!(backoff(1, base, cap), Duration::from_secs(5));
        assert_eq!(backoff(2, base, cap), Duration::from_secs(10));
        assert_eq!(backoff(4, base, cap), Duration::from_secs(40));
        assert_eq!(backoff(5, base, cap), Duration::from_secs(60));
        assert_eq!(backoff(40, base, cap), Duration::from_secs(60));
    }

    #[test]
    fn test_next_run_later_today() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 0, 30, 0).unwrap();
        assert_eq!(until_next_run(now, 1), Duration::from_secs(30 * 60));
    }

    #[test]
    fn test_next_run_rolls_to_tomorrow() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 1, 0, 0).unwrap();
        assert_eq!(until_next_run(now, 1), Duration::from_secs(24 * 3600));
        let evening = Utc.with_ymd_and_hms(2024, 3, 10, 22, 0, 0).unwrap();
        assert_eq!(until_next_run(evening, 1), Duration::from_secs(3 * 3600));
    }
}
