//! per-batch alert processing pipeline
//!
//! One webhook delivery is processed strictly sequentially. Every alert
//! runs through normalize -> silencing decision -> llm enrichment ->
//! persist -> notify inside its own error boundary: a failure is captured
//! as an [`AlertOutcome::Failed`] and the batch moves on. The batch itself
//! never fails once per-alert dispatch has begun.

use std::sync::Arc;

use once_cell::sync::Lazy;
use prometheus::IntCounterVec;
use thiserror::Error;

use crate::{
    alert::{AlertId, AlertRecord, WebhookAlert},
    decision::DecisionEngine,
    llm::LlmService,
    notify::{AlertNotification, Notifier},
    store::{AlertStore, StoreError},
};

#[allow(clippy::expect_used)]
static PROCESSED_ALERTS: Lazy<IntCounterVec> = Lazy::new(|| {
    use prometheus::{opts, register_int_counter_vec};
    register_int_counter_vec!(
        opts!("processed_alerts", "alerts processed per outcome")
            .namespace("muzzle")
            .subsystem("pipeline"),
        &["outcome"]
    )
    .expect("metric registration failed")
});

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("silencing decision failed: {0}")]
    Decision(#[source] StoreError),
    #[error("failed to persist alert: {0}")]
    Persist(#[source] StoreError),
}

/// result of one alert inside a batch
#[derive(Debug)]
pub enum AlertOutcome {
    Processed {
        id: AlertId,
        alert_name: String,
        silenced: bool,
    },
    Failed {
        alert_name: String,
        error: ProcessError,
    },
}

/// per-alert outcomes of one webhook delivery, in arrival order
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<AlertOutcome>,
}

impl BatchReport {
    pub fn processed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome, AlertOutcome::Processed { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.processed()
    }
}

pub struct AlertProcessor {
    store: Arc<dyn AlertStore>,
    decision: DecisionEngine,
    llm: LlmService,
    notifier: Arc<dyn Notifier>,
}

impl AlertProcessor {
    pub fn new(
        store: Arc<dyn AlertStore>,
        decision: DecisionEngine,
        llm: LlmService,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            decision,
            llm,
            notifier,
        }
    }

    /// Processes a webhook delivery alert by alert, preserving arrival
    /// order. Never fails; per-alert errors end up in the report.
    pub async fn process_batch(&self, alerts: Vec<WebhookAlert>) -> BatchReport {
        tracing::info!("processing {} alerts", alerts.len());

        let mut report = BatchReport::default();

        for raw in alerts {
            let alert_name = raw
                .labels
                .get("alertname")
                .cloned()
                .unwrap_or_else(|| String::from("unknown"));

            match self.process_alert(raw).await {
                Ok((id, silenced)) => {
                    PROCESSED_ALERTS.with_label_values(&["processed"]).inc();
                    if silenced {
                        PROCESSED_ALERTS.with_label_values(&["silenced"]).inc();
                    }

                    report.outcomes.push(AlertOutcome::Processed {
                        id,
                        alert_name,
                        silenced,
                    });
                }
                Err(error) => {
                    PROCESSED_ALERTS.with_label_values(&["failed"]).inc();
                    tracing::error!(
                        alert_name = alert_name.as_str(),
                        "alert processing failed: {error:#}"
                    );

                    report
                        .outcomes
                        .push(AlertOutcome::Failed { alert_name, error });
                }
            }
        }

        report
    }

    async fn process_alert(&self, raw: WebhookAlert) -> Result<(AlertId, bool), ProcessError> {
        let mut record = AlertRecord::from_webhook(raw);

        let decision = self
            .decision
            .evaluate(&record)
            .await
            .map_err(ProcessError::Decision)?;

        tracing::debug!(
            alert_name = record.alert_name.as_str(),
            silenced = decision.silenced,
            reason = decision.reason.as_str(),
            "silencing decision"
        );

        record.silenced = decision.silenced;
        record.silence_reason = decision.reason;

        // llm failures are absorbed inside the service, both calls always
        // return usable content
        record.llm_analysis = self.llm.analyze_alert(&record).await;
        record.debug_steps = if record.silenced {
            Vec::new()
        } else {
            self.llm.generate_debug_steps(&record).await
        };

        let id = self
            .store
            .insert(record.clone())
            .await
            .map_err(ProcessError::Persist)?;
        record.id = Some(id);

        if !record.silenced {
            let delivered = self
                .notifier
                .notify(&AlertNotification {
                    alert: &record,
                    analysis: &record.llm_analysis,
                    debug_steps: &record.debug_steps,
                })
                .await;

            if !delivered {
                tracing::warn!(
                    alert_name = record.alert_name.as_str(),
                    "notification was not delivered"
                );
            }
        }

        Ok((id, record.silenced))
    }
}
