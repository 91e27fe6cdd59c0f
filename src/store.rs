//! persistence collaborator for enriched alert records
//!
//! The pipeline and the decision engine only ever talk to [`AlertStore`].
//! [`MemoryStore`] is the built-in implementation; a database-backed store
//! can be dropped in behind the same trait.

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::alert::{AlertId, AlertRecord, AlertStatus, Feedback};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("alert {0} not found")]
    NotFound(AlertId),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Persists a record, assigning its id and `created_at`.
    async fn insert(&self, record: AlertRecord) -> Result<AlertId, StoreError>;

    async fn get(&self, id: AlertId) -> Result<AlertRecord, StoreError>;

    /// Up to `limit` most recent resolved records matching the
    /// `(alert_name, pod_name, namespace)` triple, newest first.
    async fn recent_resolved(
        &self,
        alert_name: &str,
        pod_name: &str,
        namespace: &str,
        limit: usize,
    ) -> Result<Vec<AlertRecord>, StoreError>;

    /// Attaches reviewer feedback to a persisted record and returns the
    /// updated record.
    async fn attach_feedback(
        &self,
        id: AlertId,
        feedback: Feedback,
    ) -> Result<AlertRecord, StoreError>;
}

/// in-memory [`AlertStore`], append-only apart from feedback updates
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: AlertId,
    alerts: Vec<AlertRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn insert(&self, mut record: AlertRecord) -> Result<AlertId, StoreError> {
        let mut inner = self.inner.write().await;

        let id = inner.next_id;
        inner.next_id += 1;

        record.id = Some(id);
        record.created_at = Some(Utc::now());
        inner.alerts.push(record);

        Ok(id)
    }

    async fn get(&self, id: AlertId) -> Result<AlertRecord, StoreError> {
        let inner = self.inner.read().await;

        inner
            .alerts
            .iter()
            .find(|record| record.id == Some(id))
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn recent_resolved(
        &self,
        alert_name: &str,
        pod_name: &str,
        namespace: &str,
        limit: usize,
    ) -> Result<Vec<AlertRecord>, StoreError> {
        let inner = self.inner.read().await;

        // records are appended in insertion order, so iterating from the back
        // yields newest first
        Ok(inner
            .alerts
            .iter()
            .rev()
            .filter(|record| {
                record.status == AlertStatus::Resolved
                    && record.alert_name == alert_name
                    && record.pod_name == pod_name
                    && record.namespace == namespace
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn attach_feedback(
        &self,
        id: AlertId,
        feedback: Feedback,
    ) -> Result<AlertRecord, StoreError> {
        let mut inner = self.inner.write().await;

        let record = inner
            .alerts
            .iter_mut()
            .find(|record| record.id == Some(id))
            .ok_or(StoreError::NotFound(id))?;

        record.feedback = Some(feedback);

        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::TimeZone;

    use super::*;

    fn record(alert_name: &str, pod_name: &str, status: AlertStatus) -> AlertRecord {
        AlertRecord {
            id: None,
            alert_name: alert_name.to_string(),
            status,
            severity: String::from("warning"),
            labels: HashMap::new(),
            annotations: HashMap::new(),
            starts_at: Utc.with_ymd_and_hms(2024, 4, 2, 10, 0, 0).unwrap(),
            ends_at: None,
            duration_secs: None,
            pod_name: pod_name.to_string(),
            namespace: String::from("prod"),
            cluster: String::from("unknown"),
            silenced: false,
            silence_reason: String::new(),
            llm_analysis: String::new(),
            debug_steps: Vec::new(),
            feedback: None,
            created_at: None,
        }
    }

    #[tokio::test]
    async fn insert_assigns_id_and_created_at() {
        let store = MemoryStore::new();

        let id = store
            .insert(record("HighCPU", "api-0", AlertStatus::Firing))
            .await
            .unwrap();

        let stored = store.get(id).await.unwrap();
        assert_eq!(stored.id, Some(id));
        assert!(stored.created_at.is_some());
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let store = MemoryStore::new();

        assert!(matches!(store.get(7).await, Err(StoreError::NotFound(7))));
    }

    #[tokio::test]
    async fn recent_resolved_filters_and_orders() {
        let store = MemoryStore::new();

        store
            .insert(record("HighCPU", "api-0", AlertStatus::Resolved))
            .await
            .unwrap();
        store
            .insert(record("HighCPU", "api-1", AlertStatus::Resolved))
            .await
            .unwrap();
        store
            .insert(record("HighCPU", "api-0", AlertStatus::Firing))
            .await
            .unwrap();
        let newest = store
            .insert(record("HighCPU", "api-0", AlertStatus::Resolved))
            .await
            .unwrap();

        let history = store
            .recent_resolved("HighCPU", "api-0", "prod", 20)
            .await
            .unwrap();

        assert_eq!(history.len(), 2);
        // newest first
        assert_eq!(history[0].id, Some(newest));
    }

    #[tokio::test]
    async fn recent_resolved_respects_limit() {
        let store = MemoryStore::new();

        for _ in 0..6 {
            store
                .insert(record("HighCPU", "api-0", AlertStatus::Resolved))
                .await
                .unwrap();
        }

        let history = store
            .recent_resolved("HighCPU", "api-0", "prod", 4)
            .await
            .unwrap();

        assert_eq!(history.len(), 4);
    }

    #[tokio::test]
    async fn feedback_is_attached() {
        let store = MemoryStore::new();

        let id = store
            .insert(record("HighCPU", "api-0", AlertStatus::Firing))
            .await
            .unwrap();

        let updated = store
            .attach_feedback(
                id,
                Feedback {
                    correct: true,
                    comments: String::from("good call"),
                },
            )
            .await
            .unwrap();

        assert!(updated.feedback.unwrap().correct);
        assert!(store.get(id).await.unwrap().feedback.is_some());
    }
}
