//! Explicit dependency-injection object (§9 design note: "Replace [a global service
//! locator] with explicit constructor wiring: each service has a `Deps` struct
//! passed into handlers; tests supply fakes. Do not globalize."). `main.rs` builds
//! one real `Deps` at startup; `#[cfg(test)]` call sites build one with in-memory
//! fakes instead.

use std::sync::Arc;

use gateway_common::http_client::InterServiceClient;
use gateway_common::secret::SharedSecret;

use crate::crypto_topup::{ChainTxVerifier, CryptoDepositStore};
use crate::fiat::FiatQuoteStore;
use crate::gasless::{ChainConfig, Facilitator, GaslessMode, GaslessPaymentStore};
use crate::ledger::LedgerStore;
use crate::name_system::{NameRegistry, NameSystemPurchaseStore};
use crate::pricing::PriceOracle;

pub struct Deps {
    pub ledger: Arc<dyn LedgerStore>,
    pub gasless_store: Arc<dyn GaslessPaymentStore>,
    pub fiat_quote_store: Arc<dyn FiatQuoteStore>,
    pub name_system_store: Arc<dyn NameSystemPurchaseStore>,
    pub crypto_deposit_store: Arc<dyn CryptoDepositStore>,
    pub chain_tx_verifier: Arc<dyn ChainTxVerifier>,
    pub facilitator: Arc<dyn Facilitator>,
    pub name_registry: Arc<dyn NameRegistry>,
    pub oracle: Arc<dyn PriceOracle>,
    pub chains: Vec<ChainConfig>,
    pub shared_secret: SharedSecret,
    pub upload_client: InterServiceClient,
    pub infra_fee_bps: u32,
    /// DESIGN.md Open Question #2: per-endpoint gasless-mode defaults.
    pub gasless_mode_one_shot: GaslessMode,
    pub gasless_mode_raw: GaslessMode,
    pub fiat_webhook_secret: Option<String>,
    pub prometheus_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl Deps {
    pub fn chain_by_network(&self, network: &str) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.network == network)
    }
}
