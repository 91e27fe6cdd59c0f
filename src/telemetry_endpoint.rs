//! Here we expose prometheus metrics about muzzle
use std::net::{IpAddr, SocketAddr};

use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Response, StatusCode},
    routing::get,
    Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;

use crate::settings::Settings;

#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryEndpointSettings {
    pub bind_address: IpAddr,
    pub port: u16,
}

impl TelemetryEndpointSettings {
    pub fn global() -> &'static Self {
        &Settings::global().telemetry_endpoint
    }

    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

async fn metrics_handler() -> Response<Body> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, encoder.format_type())
            .body(Body::from(buffer))
            .unwrap_or_default(),
        Err(err) => {
            tracing::error!("failed to encode metrics: {err:#}");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::empty())
                .unwrap_or_default()
        }
    }
}

pub async fn run_telemetry_endpoint() {
    let app = Router::new().route("/metrics", get(metrics_handler));

    #[allow(clippy::expect_used)]
    axum::Server::bind(&TelemetryEndpointSettings::global().to_socket_addr())
        .serve(app.into_make_service())
        .await
        .expect("telemetry endpoint crashed");
}
