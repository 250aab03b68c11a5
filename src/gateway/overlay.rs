//! Local status overlay for gateways whose table has no status column.
//!
//! Status writes are kept in the libSQL `record_status` table and merged
//! back into records that carry no status of their own.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use super::{GatewayRecord, PersistenceGateway, fields};
use crate::error::GatewayError;
use crate::store::Database;

pub struct StatusOverlayGateway {
    inner: Arc<dyn PersistenceGateway>,
    db: Arc<dyn Database>,
}

impl StatusOverlayGateway {
    pub fn new(inner: Arc<dyn PersistenceGateway>, db: Arc<dyn Database>) -> Self {
        Self { inner, db }
    }
}

#[async_trait]
impl PersistenceGateway for StatusOverlayGateway {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get_all_records(&self) -> Result<Vec<GatewayRecord>, GatewayError> {
        let mut records = self.inner.get_all_records().await?;
        let statuses = self.db.list_record_statuses().await?;

        for record in &mut records {
            if record.fields.contains_key(fields::STATUS) {
                continue;
            }
            if let Some(status) = statuses.get(&record.id) {
                record
                    .fields
                    .insert(fields::STATUS.into(), Value::from(status.as_str()));
            }
        }
        Ok(records)
    }

    async fn update_record(
        &self,
        id: &str,
        partial: &Map<String, Value>,
    ) -> Result<bool, GatewayError> {
        if !self.inner.update_record(id, partial).await? {
            return Ok(false);
        }
        if let Some(status) = partial.get(fields::STATUS).and_then(Value::as_str) {
            self.db.set_record_status(id, status).await?;
            debug!(record_id = %id, status, "Status kept in local overlay");
        }
        Ok(true)
    }
}
