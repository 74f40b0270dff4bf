//! In-memory analytics API for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use crosstab_builder::core::{AudienceDefinition, AudienceItem, IntersectResult};
use crosstab_builder::services::api::{
    ApiError, BulkCell, BulkCellRequest, BulkIntersectResponse, IntersectApi, IntersectRequest,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Notify;

pub fn result(size: f64) -> IntersectResult {
    IntersectResult {
        sample: size / 10.0,
        size,
        row_percentage: 50.0,
        column_percentage: 25.0,
        index: 100.0,
    }
}

pub fn item(id: &str) -> AudienceItem {
    AudienceItem::with_id(
        id,
        AudienceDefinition::Expression {
            expression: json!({"question": id}),
        },
        id.to_uppercase(),
    )
}

pub fn items(ids: &[&str]) -> Vec<AudienceItem> {
    ids.iter().map(|id| item(id)).collect()
}

/// Answers every intersection with a size equal to the call number.
///
/// When a gate is set, calls park until the test releases them.
#[derive(Default)]
pub struct MockApi {
    pub calls: AtomicUsize,
    pub bulk_calls: AtomicUsize,
    pub fail: AtomicBool,
    pub gate: Option<Arc<Notify>>,
    pub bulk_gate: Option<Arc<Notify>>,
}

impl MockApi {
    pub fn gated() -> (Arc<Self>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let api = Self {
            gate: Some(gate.clone()),
            ..Default::default()
        };
        (Arc::new(api), gate)
    }

    pub fn bulk_gated() -> (Arc<Self>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let api = Self {
            bulk_gate: Some(gate.clone()),
            ..Default::default()
        };
        (Arc::new(api), gate)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn bulk_calls(&self) -> usize {
        self.bulk_calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn server_error(context: &'static str) -> ApiError {
        ApiError::Status {
            context,
            status: 500,
            reason: "Internal Server Error".to_string(),
        }
    }
}

#[async_trait]
impl IntersectApi for MockApi {
    async fn intersect(&self, _request: &IntersectRequest) -> Result<IntersectResult, ApiError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Self::server_error("Failed to load cell"));
        }
        Ok(result(call as f64))
    }

    async fn bulk_intersect(
        &self,
        request: &BulkCellRequest,
    ) -> Result<BulkIntersectResponse, ApiError> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.bulk_gate {
            gate.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Self::server_error("Failed to load cells"));
        }
        let base_id = request.base_id().map(str::to_string);
        let mut cells = Vec::new();
        for (r, row) in request.rows.iter().enumerate() {
            for (c, column) in request.columns.iter().enumerate() {
                cells.push(BulkCell {
                    row_id: row.id.clone(),
                    column_id: column.id.clone(),
                    base_id: base_id.clone(),
                    data: result((r * 10 + c) as f64),
                });
            }
        }
        Ok(BulkIntersectResponse { cells })
    }
}

/// Let spawned tasks run until `done` holds
pub async fn settle(mut done: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if done() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}
