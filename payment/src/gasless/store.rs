//! Storage seam for gasless-payment records, mirroring [`crate::ledger::LedgerStore`]'s
//! trait-plus-fake split so the state machine in [`super::flow`] is exercised without
//! Postgres.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use super::types::{GaslessPaymentError, GaslessPaymentRecord};

#[async_trait]
pub trait GaslessPaymentStore: Send + Sync {
    async fn insert(&self, record: GaslessPaymentRecord) -> Result<(), GaslessPaymentError>;
    async fn get(&self, id: Uuid) -> Result<Option<GaslessPaymentRecord>, GaslessPaymentError>;
    async fn by_item(&self, item_id: &str) -> Result<Option<GaslessPaymentRecord>, GaslessPaymentError>;
    async fn update(&self, record: GaslessPaymentRecord) -> Result<(), GaslessPaymentError>;
}

#[derive(Default)]
pub struct InMemoryGaslessPaymentStore {
    inner: Mutex<HashMap<Uuid, GaslessPaymentRecord>>,
}

impl InMemoryGaslessPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GaslessPaymentStore for InMemoryGaslessPaymentStore {
    async fn insert(&self, record: GaslessPaymentRecord) -> Result<(), GaslessPaymentError> {
        self.inner.lock().unwrap().insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<GaslessPaymentRecord>, GaslessPaymentError> {
        Ok(self.inner.lock().unwrap().get(&id).cloned())
    }

    async fn by_item(&self, item_id: &str) -> Result<Option<GaslessPaymentRecord>, GaslessPaymentError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .values()
            .find(|r| r.item_id.as_deref() == Some(item_id))
            .cloned())
    }

    async fn update(&self, record: GaslessPaymentRecord) -> Result<(), GaslessPaymentError> {
        self.inner.lock().unwrap().insert(record.id, record);
        Ok(())
    }
}
