//! Process entry point: wires configuration, logging, the database pool,
//! and a bootstrap step. The HTTP framework and routing that drive the
//! external interfaces in `spec.md` §6 are out of scope for this crate; the
//! `handlers` module exposes plain functions a framework calls into. This
//! binary's job ends at "the daemon is ready," mirroring the config/
//! logging/db/bootstrap portion of `gurtd`'s `main.rs`/`startup.rs` split.
use std::sync::Arc;

use anyhow::Context;
use scan_db::{Db, DbConfig};

use scand::config::Config;
use scand::llm::GeminiClient;
use scand::search::BraveSearchClient;
use scand::throttle::DomainThrottle;
use scand::{services, startup};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();

    let mut db_config = DbConfig::from_env();
    db_config.eager_init = true;
    let db = Db::new(db_config);
    db.init().await.context("failed to initialize database pool")?;
    let pool = db
        .get_pool()
        .await
        .context("database pool unavailable after init")?
        .clone();

    let llm_key = config.llm_api_key.clone().context("LLM_API_KEY must be set")?;
    let search_key = config.search_api_key.clone().context("SEARCH_API_KEY must be set")?;

    let gemini = Arc::new(GeminiClient::new(llm_key));
    let search = Arc::new(BraveSearchClient::new(search_key));
    let throttle = Arc::new(match &config.kv_url {
        Some(url) => DomainThrottle::redis(url).context("failed to construct redis-backed throttle")?,
        None => DomainThrottle::in_process(),
    });

    services::init(pool.clone(), throttle, gemini.clone(), gemini.clone(), gemini, search);

    startup::bootstrap_resume(services::db())
        .await
        .context("bootstrap_resume failed")?;

    tracing::info!(target: "scand::main", "scand ready; waiting for shutdown signal");
    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    tracing::info!(target: "scand::main", "shutting down");
    Ok(())
}
