//! Inbound payment events. The external payment processor posts billable
//! events here; the body is authenticated with an HMAC-SHA256 signature
//! over the raw bytes, recorded idempotently, and a first payment for a
//! template provisions a default customization.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, warn};

use agora_core::domain::revenue::{RevenueKind, RevenueRecord};
use agora_core::domain::template::{TemplateId, UserId};
use agora_core::errors::DispatchError;
use agora_core::policy::CallerPlan;
use agora_db::NewCustomization;

use crate::routes::{error_response, AppState};

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

#[derive(Deserialize)]
struct PaymentEvent {
    user_id: String,
    template_id: String,
    kind: String,
    amount_cents: i64,
    external_txn: String,
}

pub async fn handle(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if !signature_valid(&state, &headers, &body) {
        warn!(event_name = "webhook_rejected", "invalid or missing signature");
        let envelope = serde_json::json!({
            "error": { "code": "invalid_signature", "message": "The request signature is missing or invalid." }
        });
        return (axum::http::StatusCode::UNAUTHORIZED, Json(envelope)).into_response();
    }

    let event: PaymentEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(error) => {
            return error_response(&DispatchError::InvalidRequest(format!(
                "malformed payment event: {error}"
            )))
        }
    };
    let kind: RevenueKind = match event.kind.parse() {
        Ok(kind) => kind,
        Err(message) => return error_response(&DispatchError::InvalidRequest(message)),
    };

    let user_id = UserId(event.user_id);
    let template_id = TemplateId(event.template_id);
    let record = RevenueRecord {
        user_id: user_id.clone(),
        template_id: template_id.clone(),
        kind,
        amount_cents: event.amount_cents,
        external_txn: event.external_txn.clone(),
        created_at: chrono::Utc::now(),
    };

    let recorded = match state.revenue.record(record).await {
        Ok(recorded) => recorded,
        Err(error) => {
            warn!(event_name = "webhook_storage_error", error = %error, "revenue write failed");
            return error_response(&DispatchError::Internal);
        }
    };
    info!(
        event_name = "payment_recorded",
        external_txn = %event.external_txn,
        kind = kind.as_str(),
        recorded,
    );

    let mut customization_id = None;
    if recorded {
        customization_id = provision_default(&state, user_id, template_id).await;
    }

    Json(serde_json::json!({
        "recorded": recorded,
        "customization_id": customization_id,
    }))
    .into_response()
}

/// First payment for a (user, template) pair provisions a default
/// customization so the buyer can chat immediately. A completed payment
/// is treated as entitlement, so the purchase check runs on the paid
/// plan. Failure here never fails the webhook; the revenue row stands.
async fn provision_default(
    state: &AppState,
    user_id: UserId,
    template_id: TemplateId,
) -> Option<String> {
    match state.customizations.exists_for(&user_id, &template_id).await {
        Ok(true) => return None,
        Ok(false) => {}
        Err(error) => {
            warn!(event_name = "webhook_storage_error", error = %error, "existence check failed");
            return None;
        }
    }

    let request = NewCustomization {
        template_id: template_id.clone(),
        user_id,
        display_name: None,
        instruction_override: None,
        model: None,
        overrides: Default::default(),
    };
    match state.catalog.create_customization(CallerPlan::Paid, request).await {
        Ok(created) => Some(created.customization.id.0),
        Err(error) => {
            warn!(
                event_name = "webhook_provision_failed",
                template_id = %template_id.0,
                error = %error,
                "default customization not created"
            );
            None
        }
    }
}

fn signature_valid(state: &AppState, headers: &HeaderMap, body: &[u8]) -> bool {
    let Some(secret) = &state.webhook_secret else {
        return false;
    };
    let Some(presented) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let Some(presented) = hex_decode(presented) else {
        return false;
    };

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.expose_secret().as_bytes())
        .expect("hmac accepts any key length");
    mac.update(body);
    mac.verify_slice(&presented).is_ok()
}

fn hex_decode(value: &str) -> Option<Vec<u8>> {
    if value.len() % 2 != 0 {
        return None;
    }
    (0..value.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(value.get(i..i + 2)?, 16).ok())
        .collect()
}
