//! Gateway over the local libSQL `records` table.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};

use super::{GatewayRecord, PersistenceGateway, fields};
use crate::error::GatewayError;
use crate::store::Database;

pub struct LocalGateway {
    db: Arc<dyn Database>,
}

impl LocalGateway {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Store a freshly generated post awaiting feedback. Returns the record id.
    pub async fn create_record(&self, topic: &str, content: &str) -> Result<String, GatewayError> {
        let mut map = Map::new();
        map.insert(fields::TOPIC.into(), Value::from(topic));
        map.insert(fields::CONTENT.into(), Value::from(content));
        map.insert(fields::FEEDBACK.into(), Value::from(""));
        map.insert(fields::TIMESTAMP.into(), Value::from(Utc::now().to_rfc3339()));
        map.insert(fields::REGENERATION_COUNT.into(), Value::from(0));
        Ok(self.db.insert_record(&map).await?)
    }

    /// Attach client feedback to a record.
    pub async fn set_feedback(&self, id: &str, feedback: &str) -> Result<(), GatewayError> {
        let mut map = Map::new();
        map.insert(fields::FEEDBACK.into(), Value::from(feedback));
        map.insert(fields::TIMESTAMP.into(), Value::from(Utc::now().to_rfc3339()));
        if !self.db.merge_record_fields(id, &map).await? {
            return Err(GatewayError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for LocalGateway {
    fn name(&self) -> &str {
        "local"
    }

    async fn get_all_records(&self) -> Result<Vec<GatewayRecord>, GatewayError> {
        let records = self.db.list_records().await?;
        Ok(records
            .into_iter()
            .map(|r| {
                let mut map = r.fields;
                map.entry(fields::TIMESTAMP)
                    .or_insert_with(|| Value::from(r.created_at.to_rfc3339()));
                GatewayRecord { id: r.id, fields: map }
            })
            .collect())
    }

    async fn update_record(
        &self,
        id: &str,
        partial: &Map<String, Value>,
    ) -> Result<bool, GatewayError> {
        Ok(self.db.merge_record_fields(id, partial).await?)
    }
}
