//! Entrypoint for the upload service "U" (spec.md §2). Parses configuration,
//! wires a [`Deps`] of real collaborators, spawns the eleven stage workers
//! (§4.8) alongside the planner/cleanup-warm schedulers, and serves the HTTP
//! API until a shutdown signal is received, draining in-flight work per §5.

use std::collections::HashMap;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use clap::Parser;
use log::info;
use metrics_exporter_prometheus::PrometheusBuilder;

use gateway_common::circuit_breaker::CircuitBreaker;
use gateway_common::config::SHUTDOWN_HTTP_DRAIN_SECONDS;
use gateway_common::http_client::{ClientConfig, InterServiceClient};
use gateway_common::logging::{self, LoggingConfig};

use gateway_upload::bundle_plan::postgres::PgBundlePlanStore;
use gateway_upload::config::Config;
use gateway_upload::cursor::postgres::PgCursorStore;
use gateway_upload::dedup::DedupSet;
use gateway_upload::deps::Deps;
use gateway_upload::gasless_client::HttpGaslessClient;
use gateway_upload::gateway_client::HttpChainGateway;
use gateway_upload::ingest::IngestPolicy;
use gateway_upload::items::postgres::PgItemStore;
use gateway_upload::multipart::postgres::PgMultipartSessionStore;
use gateway_upload::offset_index::postgres::PgOffsetIndexStore;
use gateway_upload::payment_client::HttpPaymentClient;
use gateway_upload::queue::postgres::PgJobQueue;
use gateway_upload::store::cold::FsColdStore;
use gateway_upload::store::hot::InMemoryHotCache;
use gateway_upload::store::warm::FsWarmStore;
use gateway_upload::store::TripleStore;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    logging::init(LoggingConfig {
        level: config.log_level.parse().unwrap_or(log::LevelFilter::Info),
        file_level: config.log_dir.as_ref().map(|_| log::LevelFilter::Info),
        log_dir: config.log_dir.clone(),
        service_name: "gateway-upload",
    })?;

    let (shared_secret, bundler_signing_key) = config.validate()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let payment_client =
        InterServiceClient::new(config.payment_service_url.clone(), shared_secret.clone(), ClientConfig::default())?;
    let gasless_client = InterServiceClient::new(config.payment_service_url.clone(), shared_secret.clone(), ClientConfig::default())?;

    let downstream_gateway_urls: Vec<String> =
        std::iter::once(config.downstream_gateway_url.clone()).chain(config.downstream_gateway_secondary_urls.clone()).collect();
    let downstream_breakers: Vec<CircuitBreaker> = downstream_gateway_urls.iter().map(|_| CircuitBreaker::new()).collect();

    let premium_downstream_urls = config.premium_downstream_urls();
    let premium_downstream_breakers: HashMap<String, Vec<CircuitBreaker>> =
        premium_downstream_urls.iter().map(|(tag, urls)| (tag.clone(), urls.iter().map(|_| CircuitBreaker::new()).collect())).collect();

    let (prometheus_recorder, prometheus_handle) = PrometheusBuilder::new().build()?;
    metrics::set_global_recorder(Box::new(prometheus_recorder))
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {e}"))?;

    let triple_store = TripleStore::new(
        Arc::new(FsColdStore::new(config.cold_store_root.clone())),
        Arc::new(FsWarmStore::new(config.warm_store_root.clone())),
        Arc::new(InMemoryHotCache::new()),
    );

    let deps = Arc::new(Deps {
        item_store: Arc::new(PgItemStore::new(pool.clone())),
        bundle_plan_store: Arc::new(PgBundlePlanStore::new(pool.clone())),
        offset_index_store: Arc::new(PgOffsetIndexStore::new(pool.clone())),
        multipart_store: Arc::new(PgMultipartSessionStore::new(pool.clone())),
        triple_store: Arc::new(triple_store),
        job_queue: Arc::new(PgJobQueue::new(pool.clone())),
        chain_gateway: Arc::new(HttpChainGateway::new(config.chain_gateway_url.clone())),
        payment_client: Arc::new(HttpPaymentClient::new(payment_client)),
        gasless_client: Arc::new(HttpGaslessClient::new(gasless_client)),
        dedup: Arc::new(DedupSet::new()),
        cursor_store: Arc::new(PgCursorStore::new(pool.clone())),
        shared_secret,
        bundler_signing_key,
        signer_key_id: "bundler".to_string(),
        downstream_breakers,
        downstream_gateway_urls,
        downstream_gateway_canary_url: config.downstream_gateway_canary_url.clone(),
        canary_sample_fraction_bps: config.canary_sample_fraction_bps,
        downstream_gateway_admin_key: config.downstream_gateway_admin_key.clone(),
        premium_downstream_urls,
        premium_downstream_breakers,
        policy: IngestPolicy {
            blocklist: config.blocklist.iter().cloned().collect(),
            free_allowlist: config.free_allowlist.iter().cloned().collect(),
        },
        premium_tags: config.premium_tags.clone(),
        protocol_version: config.protocol_version.clone(),
        deadline_blocks_ahead: gateway_common::config::BUNDLE_OVERDUE_BLOCKS,
        payment_scheme: config.gasless_payment_scheme.clone(),
        payee_address: config.gasless_payee_address.clone(),
        free_upload_limit_bytes: config.free_upload_limit_bytes(),
        prometheus_handle: Some(prometheus_handle),
    });

    gateway_upload::workers::spawn_all(deps.clone());

    info!("gateway-upload listening on {}", config.bind_address);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::from(deps.clone()))
            .wrap(Cors::permissive())
            .configure(gateway_upload::api::configure)
    })
    .shutdown_timeout(SHUTDOWN_HTTP_DRAIN_SECONDS)
    .bind(&config.bind_address)?
    .run();

    server.await?;
    Ok(())
}
