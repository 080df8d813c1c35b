use chrono::Utc;
use dam_ranker::{MarketDataSource, RankingConfig, RankingEngine, StaticSource, YahooClient};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Logs go to stderr so stdout carries only the picks
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let config = RankingConfig::from_env()?;
    info!(
        "Starting DAM ranking: benchmark {}, {} tickers",
        config.benchmark_symbol,
        config.universe.len()
    );

    // DAM_FIXTURE points at a JSON price fixture for offline runs
    let source: Arc<dyn MarketDataSource> = match std::env::var("DAM_FIXTURE") {
        Ok(path) => {
            let fixture = StaticSource::from_json_file(Path::new(&path))?;
            info!("Using fixture {} ({} symbols)", path, fixture.symbols().count());
            Arc::new(fixture)
        }
        Err(_) => Arc::new(YahooClient::new()?),
    };

    let engine = RankingEngine::new(source, config)?;

    let today = Utc::now().date_naive();
    match engine.benchmark_status(today).await {
        Ok(status) if status.using_current_month => warn!(
            "{} latest close is {} (current month, still forming)",
            status.symbol, status.latest_period
        ),
        Ok(status) => info!("{} latest close is {}", status.symbol, status.latest_period),
        Err(e) => warn!("Benchmark status check failed: {}", e),
    }

    let report = engine.run().await?;
    for exclusion in &report.exclusions {
        info!("Excluded {}: {:?}", exclusion.ticker, exclusion.reason);
    }
    if !report.complete {
        warn!("Run deadline reached; ranking is partial");
    }

    println!("{}", serde_json::to_string_pretty(&report.rankings.picks())?);
    Ok(())
}
