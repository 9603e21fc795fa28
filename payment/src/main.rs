//! Entrypoint for the payment service "P" (spec.md §2). Parses configuration,
//! wires a [`Deps`] of real collaborators, and serves the HTTP API until a
//! shutdown signal is received, draining in-flight requests per §5.

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use clap::Parser;
use log::{info, warn};
use metrics_exporter_prometheus::PrometheusBuilder;

use gateway_common::config::{DEFAULT_INFRA_FEE_BPS, SHUTDOWN_HTTP_DRAIN_SECONDS};
use gateway_common::http_client::{ClientConfig, InterServiceClient};
use gateway_common::logging::{self, LoggingConfig};

use gateway_payment::config::Config;
use gateway_payment::crypto_topup::postgres::PgCryptoDepositStore;
use gateway_payment::crypto_topup::HttpChainTxVerifier;
use gateway_payment::deps::Deps;
use gateway_payment::fiat::postgres::PgFiatQuoteStore;
use gateway_payment::gasless::postgres::PgGaslessPaymentStore;
use gateway_payment::gasless::{ChainConfig, FakeFacilitator, HttpFacilitator};
use gateway_payment::ledger::postgres::PgLedgerStore;
use gateway_payment::name_system::HttpNameRegistry;
use gateway_payment::pricing::oracle::HttpPriceOracle;
use gateway_payment::pricing::OracleCache;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    logging::init(LoggingConfig {
        level: config.log_level.parse().unwrap_or(log::LevelFilter::Info),
        file_level: config.log_dir.as_ref().map(|_| log::LevelFilter::Info),
        log_dir: config.log_dir.clone(),
        service_name: "gateway-payment",
    })?;

    let shared_secret = config.validate()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let chains: Vec<ChainConfig> = serde_json::from_str(&config.chains_json)?;
    if chains.is_empty() {
        warn!("no stablecoin chains configured; /x402/* will reject every request");
    }

    let facilitator: Arc<dyn gateway_payment::gasless::Facilitator> = match &config.facilitator_url {
        Some(url) => Arc::new(HttpFacilitator::new(url.clone())),
        None => {
            warn!("FACILITATOR_URL not set; settling gasless payments against a fake facilitator");
            Arc::new(FakeFacilitator)
        }
    };

    let oracle = OracleCache::new(HttpPriceOracle::new(config.oracle_url.clone()));

    let (prometheus_recorder, prometheus_handle) = PrometheusBuilder::new().build()?;
    metrics::set_global_recorder(Box::new(prometheus_recorder))
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {e}"))?;

    let deps = Arc::new(Deps {
        ledger: Arc::new(PgLedgerStore::new(pool.clone())),
        gasless_store: Arc::new(PgGaslessPaymentStore::new(pool.clone())),
        fiat_quote_store: Arc::new(PgFiatQuoteStore::new(pool.clone())),
        name_system_store: Arc::new(gateway_payment::name_system::postgres::PgNameSystemPurchaseStore::new(pool.clone())),
        crypto_deposit_store: Arc::new(PgCryptoDepositStore::new(pool.clone())),
        chain_tx_verifier: Arc::new(HttpChainTxVerifier::new(config.chain_gateway_url.clone())),
        facilitator,
        name_registry: Arc::new(HttpNameRegistry::new(config.name_registry_url.clone())),
        oracle: Arc::new(oracle),
        chains,
        shared_secret: shared_secret.clone(),
        upload_client: InterServiceClient::new(config.upload_service_url.clone(), shared_secret, ClientConfig::default())?,
        infra_fee_bps: config.infra_fee_bps.unwrap_or(DEFAULT_INFRA_FEE_BPS),
        gasless_mode_one_shot: config.gasless_mode_one_shot.parse().unwrap_or(gateway_payment::gasless::GaslessMode::Hybrid),
        gasless_mode_raw: config.gasless_mode_raw.parse().unwrap_or(gateway_payment::gasless::GaslessMode::ExactOnly),
        fiat_webhook_secret: config.fiat_webhook_secret.clone(),
        prometheus_handle: Some(prometheus_handle),
    });

    info!("gateway-payment listening on {}", config.bind_address);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::from(deps.clone()))
            .app_data(web::JsonConfig::default().limit(1024 * 1024))
            .wrap(Cors::permissive())
            .configure(gateway_payment::api::configure)
    })
    .shutdown_timeout(SHUTDOWN_HTTP_DRAIN_SECONDS)
    .bind(&config.bind_address)?
    .run();

    server.await?;
    Ok(())
}
