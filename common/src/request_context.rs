//! Typed per-request context, replacing the teacher's dynamic `Context` type-map
//! (`common/src/context.rs` in the teacher, a Koa-style "bag of `Any`"). Per
//! spec.md §9's design note, handlers here take an explicit struct instead.

use std::net::IpAddr;

use uuid::Uuid;

/// Carried through a single HTTP request: used for log correlation (§2.1) and to
/// decide loopback-only access the way the teacher's `ClientAddr` did for admin RPCs.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: Uuid,
    pub client_addr: Option<IpAddr>,
    pub started_at: std::time::Instant,
}

impl RequestContext {
    pub fn new(client_addr: Option<IpAddr>) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            client_addr,
            started_at: std::time::Instant::now(),
        }
    }

    pub fn is_loopback(&self) -> bool {
        self.client_addr.is_some_and(|ip| ip.is_loopback())
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}
