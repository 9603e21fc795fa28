//! Upload-service configuration (§2.2, §6 "Environment configuration").

use clap::Parser;
use gateway_common::secret::SharedSecret;

#[derive(Debug, Parser, Clone)]
#[command(name = "gateway-upload", version, about = "Bundling gateway upload/ingestion service")]
pub struct Config {
    /// Address to bind the HTTP server to.
    #[arg(long, env = "UPLOAD_BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    pub bind_address: String,

    /// Postgres connection string for the upload service's own database.
    #[arg(long, env = "UPLOAD_DATABASE_URL")]
    pub database_url: String,

    /// Log level (`error`, `warn`, `info`, `debug`, `trace`).
    #[arg(long, env = "UPLOAD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Optional directory for a daily-rotated log file sink.
    #[arg(long, env = "UPLOAD_LOG_DIR")]
    pub log_dir: Option<String>,

    /// 32-byte hex secret shared with the payment service (§6).
    #[arg(long, env = "GATEWAY_SHARED_SECRET")]
    pub shared_secret: String,

    /// Payment service base URL, for the reserve/refund/check/finalize and
    /// `/x402/*` calls upload makes during ingestion (§4.2, §4.3).
    #[arg(long, env = "PAYMENT_SERVICE_URL")]
    pub payment_service_url: String,

    /// Absolute path to the bundler's signing key file (§6).
    #[arg(long, env = "BUNDLER_SIGNING_KEY_PATH")]
    pub bundler_signing_key_path: String,

    /// Base URL of the underlying chain's gateway/indexer (§1, §4.8).
    #[arg(long, env = "CHAIN_GATEWAY_URL")]
    pub chain_gateway_url: String,

    /// Primary downstream-cache URL for optical-post (§4.8).
    #[arg(long, env = "DOWNSTREAM_GATEWAY_URL")]
    pub downstream_gateway_url: String,

    /// Optional secondary downstream-cache URLs, comma-separated.
    #[arg(long, env = "DOWNSTREAM_GATEWAY_SECONDARY_URLS", value_delimiter = ',')]
    pub downstream_gateway_secondary_urls: Vec<String>,

    /// Optional canary downstream-cache URL, sampled at `canary_sample_fraction_bps`.
    #[arg(long, env = "DOWNSTREAM_GATEWAY_CANARY_URL")]
    pub downstream_gateway_canary_url: Option<String>,

    /// Canary sampling fraction, basis points out of 10 000 (0-10000).
    #[arg(long, env = "CANARY_SAMPLE_FRACTION_BPS", default_value_t = 0)]
    pub canary_sample_fraction_bps: u32,

    /// Admin key for authenticated calls to downstream-cache endpoints.
    #[arg(long, env = "DOWNSTREAM_GATEWAY_ADMIN_KEY")]
    pub downstream_gateway_admin_key: String,

    /// Dedicated secondaries for a premium tag's own ecosystem (§4.8 optical-post
    /// "items tagged for a specific premium ecosystem are routed only to that
    /// ecosystem's dedicated secondaries"). Format: `tag:url1|url2,tag2:url3`.
    #[arg(long, env = "PREMIUM_DOWNSTREAM_URLS", default_value = "")]
    pub premium_downstream_urls: String,

    /// Premium tags that force their own segregated bundle plan, comma-separated.
    #[arg(long, env = "PREMIUM_TAGS", value_delimiter = ',')]
    pub premium_tags: Vec<String>,

    /// Addresses exempt from downstream fan-out and, below the free-upload limit,
    /// from balance checks (§4.8 optical-post filter, §6 info endpoint).
    #[arg(long, env = "FREE_ALLOWLIST", value_delimiter = ',')]
    pub free_allowlist: Vec<String>,

    /// Addresses whose uploads are rejected outright (§4.5 step 5).
    #[arg(long, env = "BLOCKLIST", value_delimiter = ',')]
    pub blocklist: Vec<String>,

    /// Override of the free-upload byte limit. Falls back to
    /// [`gateway_common::config::DEFAULT_FREE_UPLOAD_LIMIT_BYTES`] when unset.
    #[arg(long, env = "FREE_UPLOAD_LIMIT_BYTES")]
    pub free_upload_limit_bytes: Option<u64>,

    /// Filesystem root for the warm store's sharded directory tree (§4.6).
    #[arg(long, env = "WARM_STORE_ROOT", default_value = "./data/warm")]
    pub warm_store_root: String,

    /// Filesystem root standing in for the cold object store (§4.6, DESIGN.md).
    #[arg(long, env = "COLD_STORE_ROOT", default_value = "./data/cold")]
    pub cold_store_root: String,

    /// Network key used for the gasless-payment path's `/x402/*` calls (§4.3).
    #[arg(long, env = "GASLESS_PAYMENT_SCHEME", default_value = "base")]
    pub gasless_payment_scheme: String,

    /// Payee address credited by gasless-stablecoin settlements (§4.3).
    #[arg(long, env = "GASLESS_PAYEE_ADDRESS")]
    pub gasless_payee_address: String,

    /// Protocol version reported in upload receipts and `/info` (§3, §6).
    #[arg(long, env = "PROTOCOL_VERSION", default_value = "2.0.0")]
    pub protocol_version: String,

    /// Address the `/metrics` Prometheus exporter binds to (§2.5).
    #[arg(long, env = "UPLOAD_METRICS_BIND_ADDRESS", default_value = "0.0.0.0:9090")]
    pub metrics_bind_address: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid GATEWAY_SHARED_SECRET: {0}")]
    InvalidSharedSecret(#[from] gateway_common::secret::SharedSecretError),
    #[error("failed to read bundler signing key at {path}: {source}")]
    SigningKey { path: String, #[source] source: std::io::Error },
    #[error("bundler signing key at {0} is not 32 bytes")]
    MalformedSigningKey(String),
}

impl Config {
    /// Validates fatal startup conditions (§7 "Fatal conditions") before a listener
    /// is bound: the shared secret and the bundler signing key must both parse.
    pub fn validate(&self) -> Result<(SharedSecret, ed25519_dalek::SigningKey), ConfigError> {
        let shared_secret = SharedSecret::from_hex(&self.shared_secret)?;
        let key_bytes = std::fs::read(&self.bundler_signing_key_path)
            .map_err(|source| ConfigError::SigningKey { path: self.bundler_signing_key_path.clone(), source })?;
        let key_bytes: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| ConfigError::MalformedSigningKey(self.bundler_signing_key_path.clone()))?;
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&key_bytes);
        Ok((shared_secret, signing_key))
    }

    pub fn free_upload_limit_bytes(&self) -> u64 {
        self.free_upload_limit_bytes.unwrap_or(gateway_common::config::DEFAULT_FREE_UPLOAD_LIMIT_BYTES)
    }

    /// Parses `PREMIUM_DOWNSTREAM_URLS` (`tag:url1|url2,tag2:url3`) into a map.
    /// Malformed entries (missing `:`) are skipped rather than treated as fatal,
    /// since a misconfigured premium route should degrade to the general fan-out
    /// rather than block startup.
    pub fn premium_downstream_urls(&self) -> std::collections::HashMap<String, Vec<String>> {
        self.premium_downstream_urls
            .split(',')
            .filter(|entry| !entry.is_empty())
            .filter_map(|entry| entry.split_once(':'))
            .map(|(tag, urls)| (tag.to_string(), urls.split('|').filter(|u| !u.is_empty()).map(str::to_string).collect()))
            .collect()
    }
}
