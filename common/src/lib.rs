//! Shared types, wire codecs, and cross-cutting infrastructure for the
//! bundling gateway's two services (`gateway-payment`, `gateway-upload`).

pub mod bundle;
pub mod circuit_breaker;
pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod ids;
pub mod logging;
pub mod money;
pub mod request_context;
pub mod secret;
pub mod tags;
pub mod time;

#[cfg(feature = "rpc-client")]
pub mod http_client;

pub use error::{GatewayError, GatewayResult};
pub use ids::{Address, ContentId};
pub use money::{AtomicUnits, Credits};
