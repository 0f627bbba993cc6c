//! Request and response bodies for the daemon's HTTP endpoints.
//!
//! Ids and enum values arrive as strings and are parsed in the handlers, so
//! a malformed value gets the same `invalid_input` body as any other bad
//! input instead of an extractor rejection.

use meal_delivery::ErrorKind;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /api/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
    /// Connected live-stream sessions.
    pub sessions: usize,
    pub store: &'static str,
}

// ---------------------------------------------------------------------------
// /api/deliveries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeliveryRequest {
    pub diet_chart_id: String,
    pub meal_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateDeliveryRequest {
    pub status: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeliveryListQuery {
    pub status: Option<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Body for 400 / 404 / 409 / 503.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// "not_found" | "conflict" | "invalid_input" | "unavailable"
    pub kind: String,
}

impl ErrorResponse {
    pub fn new(kind: ErrorKind, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            kind: kind.as_str().to_string(),
        }
    }
}

/// Body for 401 / 403: the caller's role is missing, unknown, or does not
/// cover the route's action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRefusedResponse {
    pub error: String,
    pub action: String,
}
