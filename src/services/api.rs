//! Transport for the crosstab intersect endpoints
//!
//! `IntersectApi` is the seam the cell loader talks through. The production
//! implementation posts JSON to the analytics API with reqwest; tests plug in
//! in-memory implementations.

use crate::core::{AudienceItem, BaseAudience, CellKey, IntersectResult, LoadContext};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub const INTERSECT_PATH: &str = "/api/v1/crosstabs/intersect";
pub const BULK_INTERSECT_PATH: &str = "/api/v1/crosstabs/bulk-intersect";

/// Identity and endpoints supplied by the host. Read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub api_base: String,
}

impl Session {
    pub fn new(token: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_base: api_base.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    #[error("{context}: {reason}")]
    Status {
        context: &'static str,
        status: u16,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRef {
    pub id: String,
}

/// Body of a single-cell intersect request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntersectRequest {
    pub row: ItemRef,
    pub col: ItemRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
}

/// The base is normalized the way the cache is keyed, so the default base
/// and an empty one are sent as no base at all.
impl From<&CellKey> for IntersectRequest {
    fn from(key: &CellKey) -> Self {
        let key = key.cache_key().to_cell_key();
        Self {
            row: ItemRef { id: key.row_id },
            col: ItemRef { id: key.column_id },
            base: key.base_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkItem {
    pub id: String,
    pub expression: Value,
}

impl From<&AudienceItem> for BulkItem {
    fn from(item: &AudienceItem) -> Self {
        Self {
            id: item.id.clone(),
            expression: item.definition.to_expression(),
        }
    }
}

/// Body of a bulk intersect request covering a full rows x columns product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkCellRequest {
    pub rows: Vec<BulkItem>,
    pub columns: Vec<BulkItem>,
    pub locations: Vec<String>,
    pub waves: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_audience: Option<BaseAudience>,
}

impl BulkCellRequest {
    pub fn new(rows: &[AudienceItem], columns: &[AudienceItem], context: &LoadContext) -> Self {
        Self {
            rows: rows.iter().map(BulkItem::from).collect(),
            columns: columns.iter().map(BulkItem::from).collect(),
            locations: context.locations.clone(),
            waves: context.waves.clone(),
            base_audience: context.base_audience.clone(),
        }
    }

    pub fn base_id(&self) -> Option<&str> {
        self.base_audience.as_ref().map(|b| b.id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkCell {
    pub row_id: String,
    pub column_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_id: Option<String>,
    pub data: IntersectResult,
}

impl BulkCell {
    pub fn cell_key(&self) -> CellKey {
        CellKey::new(&self.row_id, &self.column_id).with_base(self.base_id.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkIntersectResponse {
    #[serde(default)]
    pub cells: Vec<BulkCell>,
}

#[async_trait]
pub trait IntersectApi: Send + Sync {
    async fn intersect(&self, request: &IntersectRequest) -> Result<IntersectResult, ApiError>;

    async fn bulk_intersect(
        &self,
        request: &BulkCellRequest,
    ) -> Result<BulkIntersectResponse, ApiError>;
}

/// reqwest-backed client for the analytics API
#[derive(Debug, Clone)]
pub struct HttpIntersectApi {
    client: reqwest::Client,
    session: Session,
}

impl HttpIntersectApi {
    pub fn new(session: Session, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("crosstab-builder/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, session })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    async fn post<B, R>(&self, path: &str, body: &B, context: &'static str) -> Result<R, ApiError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.session.url(path))
            .bearer_auth(&self.session.token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                context,
                status: status.as_u16(),
                reason: status
                    .canonical_reason()
                    .unwrap_or("unknown status")
                    .to_string(),
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl IntersectApi for HttpIntersectApi {
    async fn intersect(&self, request: &IntersectRequest) -> Result<IntersectResult, ApiError> {
        self.post(INTERSECT_PATH, request, "Failed to load cell")
            .await
    }

    async fn bulk_intersect(
        &self,
        request: &BulkCellRequest,
    ) -> Result<BulkIntersectResponse, ApiError> {
        self.post(BULK_INTERSECT_PATH, request, "Failed to load cells")
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AudienceDefinition;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_intersect_request_wire_shape() {
        let plain = IntersectRequest::from(&CellKey::new("r1", "c1"));
        assert_eq!(
            serde_json::to_value(&plain).unwrap(),
            json!({"row": {"id": "r1"}, "col": {"id": "c1"}})
        );

        let based = IntersectRequest::from(&CellKey::new("r1", "c1").with_base(Some("b1")));
        assert_eq!(serde_json::to_value(&based).unwrap()["base"], "b1");
    }

    #[test]
    fn test_intersect_request_omits_default_and_empty_base() {
        let expected = json!({"row": {"id": "r1"}, "col": {"id": "c1"}});
        for base in ["default", ""] {
            let key = CellKey::new("r1", "c1").with_base(Some(base));
            let request = IntersectRequest::from(&key);
            assert_eq!(request.base, None);
            assert_eq!(serde_json::to_value(&request).unwrap(), expected);
            assert_eq!(request, IntersectRequest::from(&CellKey::new("r1", "c1")));
        }
    }

    #[test]
    fn test_bulk_request_wire_shape() {
        let row = AudienceItem::with_id(
            "r1",
            AudienceDefinition::Expression {
                expression: json!({"operator": "And", "expressions": []}),
            },
            "Row",
        );
        let context = LoadContext {
            locations: vec!["s2_1".into()],
            waves: vec!["q1".into()],
            base_audience: Some(BaseAudience::new("b1")),
        };
        let request = BulkCellRequest::new(&[row], &[], &context);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["rows"][0]["id"], "r1");
        assert_eq!(value["rows"][0]["expression"]["type"], "Expression");
        assert_eq!(value["baseAudience"]["id"], "b1");
        assert_eq!(value["locations"], json!(["s2_1"]));
        assert_eq!(request.base_id(), Some("b1"));
    }

    #[test]
    fn test_bulk_response_tolerates_missing_base() {
        let response: BulkIntersectResponse = serde_json::from_value(json!({
            "cells": [{
                "rowId": "r1",
                "columnId": "c1",
                "data": {"sample": 10, "size": 1000, "rowPercentage": 12.5, "columnPercentage": 40, "index": 98}
            }]
        }))
        .unwrap();
        assert_eq!(response.cells[0].cell_key(), CellKey::new("r1", "c1"));
        assert_eq!(response.cells[0].data.row_percentage, 12.5);
    }

    #[test]
    fn test_session_url_joins_without_double_slash() {
        let session = Session::new("t", "http://api.test/");
        assert_eq!(
            session.url(INTERSECT_PATH),
            "http://api.test/api/v1/crosstabs/intersect"
        );
    }
}
