//! Provider webhook intake.
//!
//! Each provider posts (or, for VNPay's IPN, GETs) its own payload shape
//! and expects its own acknowledgement body; anything else makes the
//! provider retry. The handler normalizes the payload, hands it to the
//! orchestrator, and translates the settlement outcome into the exact
//! acknowledgement each provider documents.

use axum::{
    extract::{Path, RawQuery, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value as JsonValue};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::api::ApiState;
use crate::gateways::{CallbackPayload, GatewayName};
use crate::services::settlement::SettlementOutcome;

/// POST (or GET, for VNPay) /webhooks/{provider}
pub async fn handle_webhook(
    State(state): State<Arc<ApiState>>,
    Path(provider): Path<String>,
    RawQuery(query): RawQuery,
    body: String,
) -> Response {
    let Ok(provider) = GatewayName::from_str(&provider) else {
        warn!(provider, "webhook for unknown provider");
        return (StatusCode::NOT_FOUND, "unknown provider").into_response();
    };
    info!(provider = %provider, "received webhook");

    let fields = match provider {
        // VNPay's IPN delivers query parameters, not a JSON body.
        GatewayName::Vnpay => {
            let raw = if body.trim().is_empty() {
                query.unwrap_or_default()
            } else {
                body
            };
            parse_urlencoded(&raw)
        }
        _ => match serde_json::from_str::<JsonValue>(&body) {
            Ok(v) => v,
            Err(e) => {
                error!(provider = %provider, error = %e, "invalid JSON payload");
                return (StatusCode::BAD_REQUEST, "Invalid JSON").into_response();
            }
        },
    };

    match state
        .orchestrator
        .handle_callback(provider, CallbackPayload::new(fields))
        .await
    {
        Ok(outcome) => acknowledge(provider, &outcome),
        Err(e) => {
            // Infrastructure trouble: answer non-2xx so the provider
            // redelivers once the database is back.
            error!(provider = %provider, error = %e, "webhook processing failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "processing failed").into_response()
        }
    }
}

/// The acknowledgement bodies each provider requires for "received".
fn acknowledge(provider: GatewayName, outcome: &SettlementOutcome) -> Response {
    match provider {
        GatewayName::Vnpay => {
            let (code, message) = match outcome {
                SettlementOutcome::Applied { .. } => ("00", "Confirm Success"),
                SettlementOutcome::IgnoredDuplicate
                | SettlementOutcome::DiscardedTerminal
                | SettlementOutcome::DiscardedStale => ("02", "Order already confirmed"),
                SettlementOutcome::RejectedInvalidSignature => ("97", "Invalid signature"),
                SettlementOutcome::NeedsReconciliation { .. } => ("04", "Invalid amount"),
                SettlementOutcome::UnknownReference => ("01", "Order not found"),
            };
            Json(json!({ "RspCode": code, "Message": message })).into_response()
        }
        // Momo stops retrying on any 2xx; a rejection body would make it
        // redeliver a payload that can never verify.
        GatewayName::Momo => StatusCode::NO_CONTENT.into_response(),
        GatewayName::Zalopay => {
            let (code, message) = match outcome {
                SettlementOutcome::Applied { .. } => (1, "success"),
                SettlementOutcome::IgnoredDuplicate
                | SettlementOutcome::DiscardedTerminal
                | SettlementOutcome::DiscardedStale => (2, "already processed"),
                // Negative asks ZaloPay to retry later.
                SettlementOutcome::RejectedInvalidSignature => (-1, "mac not matched"),
                SettlementOutcome::NeedsReconciliation { .. } => (2, "amount mismatch recorded"),
                SettlementOutcome::UnknownReference => (-1, "order not found"),
            };
            Json(json!({ "return_code": code, "return_message": message })).into_response()
        }
        GatewayName::Cod => (StatusCode::BAD_REQUEST, "cash orders have no webhooks").into_response(),
    }
}

/// Decode an application/x-www-form-urlencoded query into a flat JSON
/// object. Keys keep their first occurrence.
fn parse_urlencoded(raw: &str) -> JsonValue {
    let mut fields = serde_json::Map::new();
    for pair in raw.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = percent_decode(key);
        if key.is_empty() || fields.contains_key(&key) {
            continue;
        }
        fields.insert(key, JsonValue::String(percent_decode(value)));
    }
    JsonValue::Object(fields)
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                if let (Some(hi), Some(lo)) = (
                    bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                    bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
                ) {
                    out.push((hi * 16 + lo) as u8);
                    i += 3;
                } else {
                    out.push(b'%');
                    i += 1;
                }
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencoded_payload_parses_to_flat_object() {
        let fields = parse_urlencoded(
            "vnp_Amount=10000000&vnp_TxnRef=ord-1&vnp_OrderInfo=Thanh+toan+don+hang",
        );
        assert_eq!(fields["vnp_Amount"], "10000000");
        assert_eq!(fields["vnp_TxnRef"], "ord-1");
        assert_eq!(fields["vnp_OrderInfo"], "Thanh toan don hang");
    }

    #[test]
    fn percent_decoding_handles_escapes() {
        assert_eq!(percent_decode("a%20b"), "a b");
        assert_eq!(percent_decode("a+b"), "a b");
        assert_eq!(percent_decode("100%25"), "100%");
        assert_eq!(percent_decode("plain"), "plain");
        // Truncated escape falls through literally.
        assert_eq!(percent_decode("bad%2"), "bad%2");
    }

    #[test]
    fn vnpay_ack_codes_match_outcomes() {
        let ack = acknowledge(
            GatewayName::Vnpay,
            &SettlementOutcome::RejectedInvalidSignature,
        );
        assert_eq!(ack.status(), StatusCode::OK);

        let ack = acknowledge(GatewayName::Momo, &SettlementOutcome::IgnoredDuplicate);
        assert_eq!(ack.status(), StatusCode::NO_CONTENT);
    }
}
