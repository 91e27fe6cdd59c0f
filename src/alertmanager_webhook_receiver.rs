//! http surface: the alertmanager webhook plus the small alert api
//!
//! `POST /webhook` accepts an alertmanager delivery and answers `200` once
//! the batch has run, regardless of per-alert outcomes (those are visible
//! in logs and metrics only). `GET /alerts/:id` and
//! `POST /alerts/:id/feedback` expose persisted records to reviewers.

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, Extension, Json, Path},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use once_cell::sync::Lazy;
use prometheus::IntCounterVec;
use serde::Deserialize;

use crate::{
    alert::{self, AlertId, AlertRecord, Feedback},
    processor::AlertProcessor,
    settings::Settings,
    store::{AlertStore, StoreError},
};

#[derive(Debug, Deserialize, Clone)]
pub struct AlertReceiverSettings {
    pub bind_address: IpAddr,
    pub port: u16,
}

impl AlertReceiverSettings {
    pub fn global() -> &'static Self {
        &Settings::global().alert_webhook_receiver
    }

    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

#[allow(clippy::expect_used)]
static RECEIVED_ALERTS: Lazy<IntCounterVec> = Lazy::new(|| {
    use prometheus::{opts, register_int_counter_vec};
    register_int_counter_vec!(
        opts!("received_alerts", "total number of deserialized alerts")
            .namespace("muzzle")
            .subsystem("alertmanager_webhook"),
        &["outcome"]
    )
    .expect("metric registration failed")
});

struct State {
    processor: AlertProcessor,
    store: Arc<dyn AlertStore>,
}

async fn receive_webhook(
    Extension(state): Extension<Arc<State>>,
    payload: Result<Json<alert::Data>, JsonRejection>,
) -> StatusCode {
    let data = match payload {
        Ok(Json(data)) => data,
        Err(err) => {
            tracing::debug!("failed to deserialize webhook payload: {err:?}");
            RECEIVED_ALERTS.with_label_values(&["rejected"]).inc();
            return StatusCode::BAD_REQUEST;
        }
    };

    if data.alerts.is_empty() {
        tracing::debug!("webhook delivery contained no alerts");
        RECEIVED_ALERTS.with_label_values(&["rejected"]).inc();
        return StatusCode::BAD_REQUEST;
    }

    RECEIVED_ALERTS
        .with_label_values(&["accepted"])
        .inc_by(data.alerts.len() as u64);

    tracing::debug!(
        receiver = data.receiver.as_str(),
        group_key = data.group_key.as_str(),
        "webhook delivery accepted"
    );

    let report = state.processor.process_batch(data.alerts).await;

    tracing::info!(
        processed = report.processed(),
        failed = report.failed(),
        "webhook batch complete"
    );

    // per-alert failures are deliberately not reflected in the response
    StatusCode::OK
}

async fn get_alert(
    Extension(state): Extension<Arc<State>>,
    Path(id): Path<AlertId>,
) -> Result<Json<AlertRecord>, StatusCode> {
    match state.store.get(id).await {
        Ok(record) => Ok(Json(record)),
        Err(StoreError::NotFound(_)) => Err(StatusCode::NOT_FOUND),
        Err(err) => {
            tracing::error!("failed to load alert {id}: {err:#}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn attach_feedback(
    Extension(state): Extension<Arc<State>>,
    Path(id): Path<AlertId>,
    feedback: Result<Json<Feedback>, JsonRejection>,
) -> Result<Json<AlertRecord>, StatusCode> {
    let Ok(Json(feedback)) = feedback else {
        return Err(StatusCode::BAD_REQUEST);
    };

    match state.store.attach_feedback(id, feedback).await {
        Ok(record) => Ok(Json(record)),
        Err(StoreError::NotFound(_)) => Err(StatusCode::NOT_FOUND),
        Err(err) => {
            tracing::error!("failed to attach feedback to alert {id}: {err:#}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn app(state: Arc<State>) -> Router {
    Router::new()
        .route("/webhook", post(receive_webhook))
        .route("/alerts/:id", get(get_alert))
        .route("/alerts/:id/feedback", post(attach_feedback))
        .layer(Extension(state))
}

pub async fn run_webhook_receiver(
    processor: AlertProcessor,
    store: Arc<dyn AlertStore>,
) -> Result<()> {
    let state = Arc::new(State { processor, store });
    let addr = AlertReceiverSettings::global().to_socket_addr();

    tracing::info!("alertmanager webhook receiver listening on {addr}");

    axum::Server::bind(&addr)
        .serve(app(state).into_make_service())
        .await
        .context("alertmanager webhook receiver crashed")?;

    Ok(())
}
