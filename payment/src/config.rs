//! Payment-service configuration (§2.3, §6 "Environment configuration").

use clap::Parser;
use gateway_common::secret::SharedSecret;

#[derive(Debug, Parser, Clone)]
#[command(name = "gateway-payment", version, about = "Bundling gateway payment service")]
pub struct Config {
    /// Address to bind the HTTP server to.
    #[arg(long, env = "PAYMENT_BIND_ADDRESS", default_value = "0.0.0.0:8081")]
    pub bind_address: String,

    /// Postgres connection string for the payment service's own database.
    #[arg(long, env = "PAYMENT_DATABASE_URL")]
    pub database_url: String,

    /// Log level (`error`, `warn`, `info`, `debug`, `trace`).
    #[arg(long, env = "PAYMENT_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Optional directory for a daily-rotated log file sink.
    #[arg(long, env = "PAYMENT_LOG_DIR")]
    pub log_dir: Option<String>,

    /// 32-byte hex secret shared with the upload service (§6).
    #[arg(long, env = "GATEWAY_SHARED_SECRET")]
    pub shared_secret: String,

    /// Upload service base URL, for calls this service makes back to U (§4.2).
    #[arg(long, env = "UPLOAD_SERVICE_URL")]
    pub upload_service_url: String,

    /// Override of the inclusive infra fee, in basis points (§4.1). Falls back to
    /// [`gateway_common::config::DEFAULT_INFRA_FEE_BPS`] when unset.
    #[arg(long, env = "INFRA_FEE_BPS")]
    pub infra_fee_bps: Option<u32>,

    /// Base URL of the stablecoin-settlement facilitator RPC (§4.3).
    #[arg(long, env = "FACILITATOR_URL")]
    pub facilitator_url: Option<String>,

    /// JSON array of accepted stablecoin chain deployments (§4.3 `ChainConfig`),
    /// e.g. `[{"network":"base","chain_id":8453,"stablecoin_address":"0x...","eip712_name":"USDC","eip712_version":"2"}]`.
    #[arg(long, env = "GASLESS_CHAINS_JSON")]
    pub chains_json: String,

    /// Base URL of the price-feed oracle service (§4.1).
    #[arg(long, env = "ORACLE_URL")]
    pub oracle_url: String,

    /// Base URL of the name-registry bridge service (§4.10).
    #[arg(long, env = "NAME_REGISTRY_URL")]
    pub name_registry_url: String,

    /// Base URL of the chain node/indexer used to confirm crypto top-up transactions (§4.1).
    #[arg(long, env = "CHAIN_GATEWAY_URL")]
    pub chain_gateway_url: String,

    /// Fiat processor webhook-signing secret (§6).
    #[arg(long, env = "FIAT_WEBHOOK_SECRET")]
    pub fiat_webhook_secret: Option<String>,

    /// Default gasless mode for the one-shot upload path (DESIGN.md Open Question #2).
    #[arg(long, env = "GASLESS_MODE_ONE_SHOT", default_value = "hybrid")]
    pub gasless_mode_one_shot: String,

    /// Default gasless mode for the raw-blob upload path.
    #[arg(long, env = "GASLESS_MODE_RAW", default_value = "exact-only")]
    pub gasless_mode_raw: String,

    /// Address the `/metrics` Prometheus exporter binds to (§2.5).
    #[arg(long, env = "PAYMENT_METRICS_BIND_ADDRESS", default_value = "0.0.0.0:9091")]
    pub metrics_bind_address: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid GATEWAY_SHARED_SECRET: {0}")]
    InvalidSharedSecret(#[from] gateway_common::secret::SharedSecretError),
}

impl Config {
    /// Validates fatal startup conditions (§7 "Fatal conditions") before a listener
    /// is bound. Parses the shared secret eagerly so a malformed value fails fast
    /// with a clear message rather than on the first inter-service request.
    pub fn validate(&self) -> Result<SharedSecret, ConfigError> {
        Ok(SharedSecret::from_hex(&self.shared_secret)?)
    }
}
