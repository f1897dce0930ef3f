//! Gateway notification endpoint.
//!
//! Gateways retry on any non-2xx answer, so only rejections and failures
//! worth retrying produce an error status.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::Utc;
use service_core::error::AppError;

use crate::providers::WebhookNotification;
use crate::startup::AppState;

pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Result<impl IntoResponse, AppError> {
    let signature = state
        .webhooks
        .signature_header(&provider)?
        .and_then(|name| headers.get(name))
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let notification = WebhookNotification {
        body,
        signature,
        received_at: Utc::now(),
    };

    let ack = state.webhooks.receive(&provider, notification).await?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, ack.content_type)],
        ack.body,
    ))
}
