use anyhow::Context;
use chrono::Duration as ChronoDuration;
use housing_ingest::analysis::{BargainThresholds, BargainWatcher};
use housing_ingest::fetch::{BlockDetector, FetchGate, ProxyHealthTracker, ReqwestTransport};
use housing_ingest::pipeline::{EventBus, IngestionPipeline, InvestmentScorer, ModelRegistry};
use housing_ingest::scrapers::{BooliSource, SiteSource};
use housing_ingest::store::{JsonFileStore, ListingStore};
use housing_ingest::{logging, AppConfig, Scheduler};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    logging::init_logging(&config.log_level);

    info!("🏠 Housing Scout - Listing Ingestion");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn ListingStore> = Arc::new(
        JsonFileStore::open(&config.store.path)
            .await
            .with_context(|| format!("Failed to open store at {}", config.store.path.display()))?,
    );

    let proxies = Arc::new(ProxyHealthTracker::new(
        config.proxy.endpoints.clone(),
        config.proxy.rotate_every,
        ChronoDuration::minutes(config.proxy.cooldown_minutes),
    ));
    let gate = Arc::new(FetchGate::new(
        Arc::new(ReqwestTransport::new(config.fetch.timeout)),
        proxies,
        BlockDetector::new(config.fetch.block_keywords.clone()),
        config.fetch.settings(),
    ));

    if let Some(probe_url) = &config.proxy.probe_url {
        if !gate.proxies().is_empty() {
            let working = gate.probe_endpoints(probe_url).await;
            if working == 0 {
                warn!("No working proxies found; requests will use the least recently failed one");
            }
        }
    }

    let models = Arc::new(ModelRegistry::default());
    let scorer = InvestmentScorer::new(Arc::clone(&store), Arc::clone(&models));
    let events = Arc::new(EventBus::new(config.event_bus_capacity));
    let pipeline = Arc::new(IngestionPipeline::new(Arc::clone(&store), scorer, Arc::clone(&events)));

    let watcher = BargainWatcher::new(Arc::clone(&store), BargainThresholds::default());
    tokio::spawn(watcher.run(events.subscribe()));

    let mut sites: Vec<Arc<dyn SiteSource>> = Vec::new();
    if config.sites.booli_urls.is_empty() {
        warn!("No Booli URLs configured (BOOLI_URLS); nothing to crawl");
    } else {
        sites.push(Arc::new(BooliSource::new(config.sites.booli_urls.clone())?));
    }

    let scheduler = Scheduler::new(gate, pipeline, sites, config.scheduler.clone());

    scheduler
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl-c: {}", e);
            }
        })
        .await;

    Ok(())
}
