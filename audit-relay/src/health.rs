//! Health check handlers

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::state::AppState;

/// Liveness response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Readiness response
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub service: String,
    /// Keyed by dependency name: `store`, `queue`
    pub dependencies: HashMap<String, DependencyStatus>,
}

/// Status of one dependency
#[derive(Debug, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DependencyStatus {
    fn from_result<E: std::fmt::Display>(name: &str, result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self {
                healthy: true,
                message: Some("Connected".to_string()),
            },
            Err(e) => {
                tracing::error!("{} health check failed: {}", name, e);
                Self {
                    healthy: false,
                    message: Some(e.to_string()),
                }
            }
        }
    }
}

/// Liveness: the process is up and serving
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy".to_string(),
        service: state.config().service.name.clone(),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
    };

    (StatusCode::OK, Json(response))
}

/// Readiness: the store answers and the broker connection is up
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let (store, queue) = tokio::join!(state.store().ping(), state.queue().ping());

    let mut dependencies = HashMap::new();
    dependencies.insert("store".to_string(), DependencyStatus::from_result("Store", store));
    dependencies.insert("queue".to_string(), DependencyStatus::from_result("Queue", queue));

    let ready = dependencies.values().all(|d| d.healthy);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            service: state.config().service.name.clone(),
            dependencies,
        }),
    )
}
