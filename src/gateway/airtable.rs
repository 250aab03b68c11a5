//! Airtable-backed gateway.
//!
//! Reads page through `GET /v0/{base}/{table}`; writes are
//! `PATCH /v0/{base}/{table}/{id}` with a partial `fields` object, which
//! Airtable merges server-side.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::{GatewayRecord, PersistenceGateway, fields};
use crate::config::AirtableConfig;
use crate::error::GatewayError;

const API_BASE: &str = "https://api.airtable.com/v0";

/// Canonical name → Airtable column.
const COLUMN_MAP: &[(&str, &str)] = &[
    (fields::TOPIC, "Topic"),
    (fields::CONTENT, "Post"),
    (fields::FEEDBACK, "Feedback"),
    (fields::TIMESTAMP, "Timestamp"),
    (fields::VOICE_SCORE, "voice score"),
    (fields::QUALITY_SCORE, "quality score"),
    (fields::REGENERATION_COUNT, "regeneration_count"),
];

#[derive(Deserialize)]
struct ListResponse {
    records: Vec<AirtableRecord>,
    #[serde(default)]
    offset: Option<String>,
}

#[derive(Deserialize)]
struct AirtableRecord {
    id: String,
    #[serde(default, rename = "createdTime")]
    created_time: Option<String>,
    #[serde(default)]
    fields: Map<String, Value>,
}

pub struct AirtableGateway {
    client: reqwest::Client,
    config: AirtableConfig,
    api_base: String,
}

impl AirtableGateway {
    pub fn new(config: AirtableConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            api_base: API_BASE.to_string(),
        }
    }

    /// Point at a different API host.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn table_url(&self, record_id: Option<&str>) -> Result<reqwest::Url, GatewayError> {
        let mut url = reqwest::Url::parse(&self.api_base)
            .map_err(|e| GatewayError::Request(format!("invalid Airtable URL: {e}")))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| GatewayError::Request("Airtable URL cannot be a base".into()))?;
            segments.pop_if_empty();
            segments.push(&self.config.base_id);
            segments.push(&self.config.table_name);
            if let Some(id) = record_id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    /// Airtable columns → canonical names. Unknown columns pass through.
    fn to_canonical(&self, record: AirtableRecord) -> GatewayRecord {
        let mut out = Map::new();
        for (column, value) in record.fields {
            let key = COLUMN_MAP
                .iter()
                .find(|(_, col)| *col == column)
                .map(|(canon, _)| canon.to_string())
                .or_else(|| {
                    (self.config.status_field.as_deref() == Some(column.as_str()))
                        .then(|| fields::STATUS.to_string())
                })
                .unwrap_or(column);
            out.insert(key, value);
        }
        if !out.contains_key(fields::TIMESTAMP) {
            if let Some(created) = record.created_time {
                out.insert(fields::TIMESTAMP.into(), Value::from(created));
            }
        }
        GatewayRecord {
            id: record.id,
            fields: out,
        }
    }

    /// Canonical names → Airtable columns. `status` is dropped when the table
    /// has no status column.
    fn to_columns(&self, partial: &Map<String, Value>) -> Map<String, Value> {
        let mut out = Map::new();
        for (key, value) in partial {
            let column = if key == fields::STATUS {
                match &self.config.status_field {
                    Some(col) => col.clone(),
                    None => continue,
                }
            } else {
                COLUMN_MAP
                    .iter()
                    .find(|(canon, _)| *canon == key.as_str())
                    .map(|(_, col)| col.to_string())
                    .unwrap_or_else(|| key.clone())
            };
            out.insert(column, value.clone());
        }
        out
    }
}

#[async_trait]
impl PersistenceGateway for AirtableGateway {
    fn name(&self) -> &str {
        "airtable"
    }

    async fn get_all_records(&self) -> Result<Vec<GatewayRecord>, GatewayError> {
        let mut records = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut url = self.table_url(None)?;
            if let Some(off) = &offset {
                url.query_pairs_mut().append_pair("offset", off);
            }

            let resp = self
                .client
                .get(url)
                .bearer_auth(self.config.api_key.expose_secret())
                .send()
                .await
                .map_err(|e| GatewayError::Request(format!("list records: {e}")))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(GatewayError::Request(format!(
                    "list records: HTTP {status}: {body}"
                )));
            }

            let page: ListResponse = resp
                .json()
                .await
                .map_err(|e| GatewayError::Request(format!("list records decode: {e}")))?;

            records.extend(page.records.into_iter().map(|r| self.to_canonical(r)));
            match page.offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        debug!(count = records.len(), "Fetched Airtable records");
        Ok(records)
    }

    async fn update_record(
        &self,
        id: &str,
        partial: &Map<String, Value>,
    ) -> Result<bool, GatewayError> {
        let columns = self.to_columns(partial);
        if columns.is_empty() {
            return Ok(true);
        }

        let resp = self
            .client
            .patch(self.table_url(Some(id))?)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&json!({ "fields": columns }))
            .send()
            .await
            .map_err(|e| GatewayError::Request(format!("update {id}: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Request(format!(
                "update {id}: HTTP {status}: {body}"
            )));
        }

        debug!(record_id = %id, fields = columns.len(), "Airtable record updated");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, StatusCode, header};
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, patch};
    use secrecy::SecretString;

    use super::*;

    fn gateway(status_field: Option<&str>) -> AirtableGateway {
        AirtableGateway::new(AirtableConfig {
            api_key: SecretString::from("key"),
            base_id: "appBase".into(),
            table_name: "Generated Posts".into(),
            status_field: status_field.map(str::to_string),
        })
    }

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn table_url_encodes_name() {
        let gw = gateway(None);
        assert_eq!(
            gw.table_url(Some("rec1")).unwrap().as_str(),
            "https://api.airtable.com/v0/appBase/Generated%20Posts/rec1"
        );
    }

    #[test]
    fn columns_map_to_canonical_names() {
        let gw = gateway(Some("Status"));
        let record = gw.to_canonical(AirtableRecord {
            id: "rec1".into(),
            created_time: Some("2026-05-01T10:00:00.000Z".into()),
            fields: object(json!({
                "Topic": "pricing",
                "Post": "body",
                "Feedback": "no",
                "voice score": 7,
                "Status": "approved",
                "Extra": true
            })),
        });
        assert_eq!(record.str_field(fields::TOPIC), Some("pricing"));
        assert_eq!(record.str_field(fields::CONTENT), Some("body"));
        assert_eq!(record.str_field(fields::STATUS), Some("approved"));
        assert_eq!(record.f64_field(fields::VOICE_SCORE), Some(7.0));
        assert_eq!(record.str_field(fields::TIMESTAMP), Some("2026-05-01T10:00:00.000Z"));
        assert_eq!(record.fields["Extra"], true);
    }

    #[test]
    fn status_dropped_without_status_column() {
        let partial = object(json!({"content": "new", "feedback": "", "status": "approved"}));

        let without = gateway(None).to_columns(&partial);
        assert_eq!(without.len(), 2);
        assert_eq!(without["Post"], "new");
        assert_eq!(without["Feedback"], "");

        let with = gateway(Some("Loop Status")).to_columns(&partial);
        assert_eq!(with["Loop Status"], "approved");
    }

    type Patches = Arc<Mutex<Vec<(String, Value)>>>;

    #[derive(Deserialize)]
    struct PageQuery {
        offset: Option<String>,
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            == Some("Bearer key")
    }

    async fn list_page(
        Path((base, table)): Path<(String, String)>,
        Query(page): Query<PageQuery>,
        headers: HeaderMap,
    ) -> Response {
        if !authorized(&headers) || base != "appBase" || table != "Generated Posts" {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        let body = match page.offset.as_deref() {
            None => json!({
                "records": [{
                    "id": "rec1",
                    "createdTime": "2026-05-01T10:00:00.000Z",
                    "fields": {"Topic": "pricing", "Post": "first page"}
                }],
                "offset": "itrPage2"
            }),
            Some("itrPage2") => json!({
                "records": [{
                    "id": "rec2",
                    "fields": {"Topic": "hiring", "Post": "second page", "Feedback": "no"}
                }]
            }),
            Some(_) => return StatusCode::UNPROCESSABLE_ENTITY.into_response(),
        };
        axum::Json(body).into_response()
    }

    async fn patch_record(
        State(patches): State<Patches>,
        Path((_base, _table, id)): Path<(String, String, String)>,
        axum::Json(body): axum::Json<Value>,
    ) -> Response {
        match id.as_str() {
            "rec1" => {
                patches.lock().unwrap().push((id.clone(), body));
                axum::Json(json!({"id": id, "fields": {}})).into_response()
            }
            "recGone" => StatusCode::NOT_FOUND.into_response(),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").into_response(),
        }
    }

    /// Serve a fake Airtable API on a random local port.
    async fn local_airtable() -> (AirtableGateway, Patches) {
        let patches: Patches = Arc::default();
        let app = Router::new()
            .route("/v0/{base}/{table}", get(list_page))
            .route("/v0/{base}/{table}/{id}", patch(patch_record))
            .with_state(patches.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let gw = gateway(None).with_api_base(format!("http://{addr}/v0"));
        (gw, patches)
    }

    #[tokio::test]
    async fn list_follows_offset_pages() {
        let (gw, _) = local_airtable().await;
        let records = gw.get_all_records().await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "rec1");
        assert_eq!(records[0].str_field(fields::CONTENT), Some("first page"));
        assert_eq!(records[0].str_field(fields::TIMESTAMP), Some("2026-05-01T10:00:00.000Z"));
        assert_eq!(records[1].id, "rec2");
        assert_eq!(records[1].str_field(fields::TOPIC), Some("hiring"));
        assert_eq!(records[1].str_field(fields::FEEDBACK), Some("no"));
    }

    #[tokio::test]
    async fn update_sends_mapped_columns() {
        let (gw, patches) = local_airtable().await;
        let partial = object(json!({"content": "rewritten", "feedback": "", "status": "pending_feedback"}));

        assert!(gw.update_record("rec1", &partial).await.unwrap());

        let sent = patches.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "rec1");
        assert_eq!(sent[0].1, json!({"fields": {"Post": "rewritten", "Feedback": ""}}));
    }

    #[tokio::test]
    async fn update_missing_record_is_false() {
        let (gw, patches) = local_airtable().await;
        let partial = object(json!({"feedback": ""}));

        assert!(!gw.update_record("recGone", &partial).await.unwrap());
        assert!(patches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_server_error_is_an_error() {
        let (gw, _) = local_airtable().await;
        let partial = object(json!({"feedback": ""}));

        let err = gw.update_record("recBroken", &partial).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("500"), "{message}");
        assert!(message.contains("upstream exploded"), "{message}");
    }
}
