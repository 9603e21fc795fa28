//! Explicit dependency-injection object, mirroring `gateway_payment::deps::Deps`:
//! one real `Deps` built at startup in `main.rs`, one built with in-memory fakes
//! at each `#[cfg(test)]` call site.

use std::sync::Arc;

use gateway_common::circuit_breaker::CircuitBreaker;
use gateway_common::secret::SharedSecret;

use std::collections::HashMap;

use crate::bundle_plan::BundlePlanStore;
use crate::cursor::CursorStore;
use crate::dedup::DedupSet;
use crate::gasless_client::GaslessClient;
use crate::gateway_client::ChainGateway;
use crate::ingest::{IngestDeps, IngestPolicy};
use crate::items::ItemStore;
use crate::multipart::MultipartSessionStore;
use crate::offset_index::OffsetIndexStore;
use crate::payment_client::PaymentClient;
use crate::queue::JobQueue;
use crate::store::TripleStore;

pub struct Deps {
    pub item_store: Arc<dyn ItemStore>,
    pub bundle_plan_store: Arc<dyn BundlePlanStore>,
    pub offset_index_store: Arc<dyn OffsetIndexStore>,
    pub multipart_store: Arc<dyn MultipartSessionStore>,
    pub triple_store: Arc<TripleStore>,
    pub job_queue: Arc<dyn JobQueue>,
    pub chain_gateway: Arc<dyn ChainGateway>,
    pub payment_client: Arc<dyn PaymentClient>,
    pub gasless_client: Arc<dyn GaslessClient>,
    pub dedup: Arc<DedupSet>,
    pub cursor_store: Arc<dyn CursorStore>,
    pub shared_secret: SharedSecret,

    /// The bundler's own signing key (§6 "bundler signing key file"), used both to
    /// build raw-blob envelopes (`ingest::build_raw_envelope`) and to sign bundle
    /// transactions at prepare time (`workers::preparer`).
    pub bundler_signing_key: ed25519_dalek::SigningKey,
    pub signer_key_id: String,

    /// One breaker per downstream cache destination (§4.8 optical-post), keyed by
    /// the same index as `downstream_gateway_urls` (primary first, then secondaries,
    /// then the canary if configured).
    pub downstream_breakers: Vec<CircuitBreaker>,
    pub downstream_gateway_urls: Vec<String>,
    pub downstream_gateway_canary_url: Option<String>,
    pub canary_sample_fraction_bps: u32,
    pub downstream_gateway_admin_key: String,

    /// Dedicated secondaries for items tagged with a given premium ecosystem
    /// (§4.8 optical-post "items tagged for a specific premium ecosystem are routed
    /// only to that ecosystem's dedicated secondaries"), each with its own breaker
    /// at the same index as its URL. A tag absent from this map falls back to the
    /// general `downstream_gateway_urls` fan-out.
    pub premium_downstream_urls: HashMap<String, Vec<String>>,
    pub premium_downstream_breakers: HashMap<String, Vec<CircuitBreaker>>,

    pub policy: IngestPolicy,
    pub premium_tags: Vec<String>,
    pub protocol_version: String,
    pub deadline_blocks_ahead: u64,
    pub payment_scheme: String,
    pub payee_address: String,
    pub free_upload_limit_bytes: u64,

    pub prometheus_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl Deps {
    /// Narrows this `Deps` down to the subset `ingest::ingest_one_shot` needs,
    /// borrowing `current_chain_height` from the chain gateway so ingestion always
    /// reasons about the freshest height it has observed.
    pub fn ingest_deps(&self, current_chain_height: Arc<dyn Fn() -> u64 + Send + Sync>) -> IngestDeps {
        IngestDeps {
            item_store: self.item_store.clone(),
            triple_store: self.triple_store.clone(),
            job_queue: self.job_queue.clone(),
            payment_client: self.payment_client.clone(),
            gasless_client: self.gasless_client.clone(),
            dedup: self.dedup.clone(),
            policy: self.policy.clone(),
            protocol_version: self.protocol_version.clone(),
            downstream_gateway_urls: self.downstream_gateway_urls.clone(),
            current_chain_height,
            deadline_blocks_ahead: self.deadline_blocks_ahead,
            payment_scheme: self.payment_scheme.clone(),
            payee_address: self.payee_address.clone(),
            free_upload_limit_bytes: self.free_upload_limit_bytes,
            premium_tags: self.premium_tags.clone(),
            bundler_signing_key: self.bundler_signing_key.clone(),
        }
    }
}

/// Fixed in-memory `Deps` for worker unit tests, mirroring `ingest::tests::test_deps`
/// but assembled once here so every stage handler's tests share one fake-wiring
/// recipe instead of each reinventing it.
#[cfg(test)]
pub mod test_support {
    use super::*;

    pub fn fake_deps() -> Deps {
        fake_deps_with(Arc::new(crate::items::InMemoryItemStore::new()))
    }

    pub fn fake_deps_with(item_store: Arc<dyn ItemStore>) -> Deps {
        Deps {
            item_store,
            bundle_plan_store: Arc::new(crate::bundle_plan::InMemoryBundlePlanStore::new()),
            offset_index_store: Arc::new(crate::offset_index::InMemoryOffsetIndexStore::new()),
            multipart_store: Arc::new(crate::multipart::InMemoryMultipartSessionStore::new()),
            triple_store: Arc::new(crate::store::fake_triple_store()),
            job_queue: Arc::new(crate::queue::InMemoryJobQueue::new()),
            chain_gateway: Arc::new(crate::gateway_client::FakeChainGateway::new()),
            payment_client: Arc::new(crate::payment_client::FakePaymentClient::new()),
            gasless_client: Arc::new(crate::gasless_client::FakeGaslessClient),
            dedup: Arc::new(DedupSet::new()),
            cursor_store: Arc::new(crate::cursor::InMemoryCursorStore::new()),
            shared_secret: SharedSecret::from_hex(&"a".repeat(64)).expect("64 hex chars is a valid shared secret"),
            bundler_signing_key: ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng),
            signer_key_id: "bundler".to_string(),
            downstream_breakers: vec![CircuitBreaker::new()],
            downstream_gateway_urls: vec!["https://downstream.example".to_string()],
            downstream_gateway_canary_url: None,
            canary_sample_fraction_bps: 0,
            downstream_gateway_admin_key: "test-admin-key".to_string(),
            premium_downstream_urls: HashMap::new(),
            premium_downstream_breakers: HashMap::new(),
            policy: IngestPolicy::default(),
            premium_tags: Vec::new(),
            protocol_version: "2.0.0".to_string(),
            deadline_blocks_ahead: 1_000,
            payment_scheme: "base".to_string(),
            payee_address: "payee".to_string(),
            free_upload_limit_bytes: 517_120,
            prometheus_handle: None,
        }
    }
}
