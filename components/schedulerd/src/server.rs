// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! HTTP surface: Prometheus metrics and a liveness probe.

use std::net::SocketAddr;
use std::time::Instant;

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub async fn start_http_server(
    addr: SocketAddr,
    registry: Registry,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let started = Instant::now();
    let app = Router::new()
        .route("/health", get(move || health_handler(started)))
        .route(
            "/metrics",
            get({
                let registry = registry.clone();
                move || metrics_handler(registry)
            }),
        );

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => {
            tracing::debug!(address = %addr, "HTTP server bound");
            listener
        }
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "failed to bind listen address");
            return Err(anyhow::anyhow!("failed to bind {addr}: {e}"));
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
    {
        tracing::error!(error = %e, "HTTP server error");
    }
    Ok(())
}

async fn health_handler(started: Instant) -> impl IntoResponse {
    let response = format!("OK\nUptime: {} seconds", started.elapsed().as_secs());
    (StatusCode::OK, response)
}

async fn metrics_handler(registry: Registry) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    match encoder.encode(&registry.gather(), &mut buffer) {
        Ok(()) => match String::from_utf8(buffer) {
            Ok(body) => (StatusCode::OK, body),
            Err(e) => {
                tracing::error!(error = %e, "metrics are not valid UTF-8");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "failed to encode metrics".to_string(),
                )
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to encode metrics".to_string(),
            )
        }
    }
}
