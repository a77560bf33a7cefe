//! ZaloPay adapter.
//!
//! ZaloPay callbacks wrap the transaction fields in a JSON-encoded `data`
//! string and sign that string with HMAC-SHA256 under key2; outbound
//! requests sign a pipe-joined field list under key1. The signature field
//! is `mac`.

use crate::gateways::adapter::PaymentGateway;
use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::signing::{hmac_sha256_hex, secure_eq, GatewayHttpClient};
use crate::gateways::types::{
    CallbackPayload, CallbackVerification, GatewayName, InitiateRequest, InitiatedPayment,
    InitiatedRefund, RefundRequest,
};
use crate::money::Money;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ZalopayConfig {
    pub app_id: String,
    /// Signs outbound requests.
    pub key1: String,
    /// Verifies inbound callbacks.
    pub key2: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for ZalopayConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            key1: String::new(),
            key2: String::new(),
            base_url: "https://sb-openapi.zalopay.vn".to_string(),
            timeout_secs: 10,
            max_retries: 3,
        }
    }
}

impl ZalopayConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let required = |name: &str| {
            std::env::var(name).map_err(|_| GatewayError::ValidationError {
                message: format!("{name} environment variable is required"),
                field: Some(name.to_string()),
            })
        };

        let defaults = Self::default();
        Ok(Self {
            app_id: required("ZALOPAY_APP_ID")?,
            key1: required("ZALOPAY_KEY1")?,
            key2: required("ZALOPAY_KEY2")?,
            base_url: std::env::var("ZALOPAY_BASE_URL").unwrap_or(defaults.base_url),
            timeout_secs: std::env::var("ZALOPAY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_secs),
            max_retries: std::env::var("ZALOPAY_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.max_retries),
        })
    }
}

pub struct ZalopayGateway {
    config: ZalopayConfig,
    http: GatewayHttpClient,
}

impl ZalopayGateway {
    pub fn new(config: ZalopayConfig) -> GatewayResult<Self> {
        let http =
            GatewayHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(ZalopayConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn verify(&self, payload: &CallbackPayload) -> CallbackVerification {
        let Some(data) = payload.str_field("data") else {
            return CallbackVerification::invalid("missing data field");
        };
        let Some(received) = payload.str_field("mac") else {
            return CallbackVerification::invalid("missing mac");
        };

        let computed = hmac_sha256_hex(&self.config.key2, data);
        if !secure_eq(computed.as_bytes(), received.trim().as_bytes()) {
            return CallbackVerification::invalid("invalid zalopay mac");
        }

        // The signed envelope is trusted now; pull the fields out of the
        // inner JSON.
        let inner: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                return CallbackVerification::invalid(format!("malformed data payload: {e}"));
            }
        };
        let inner = CallbackPayload::new(inner);

        // ZaloPay only posts a callback once the charge succeeded; `type`
        // distinguishes order (1) from agreement (2) notifications.
        let callback_type = payload.i64_field("type").unwrap_or(1);
        CallbackVerification {
            valid: true,
            provider_transaction_ref: inner.str_field("app_trans_id").map(str::to_string),
            amount: inner
                .i64_field("amount")
                .and_then(|minor| Money::from_minor(minor).ok()),
            success: callback_type == 1,
            result_code: Some(callback_type.to_string()),
            reason: None,
        }
    }
}

#[async_trait]
impl PaymentGateway for ZalopayGateway {
    async fn initiate(&self, request: InitiateRequest) -> GatewayResult<InitiatedPayment> {
        let now = chrono::Utc::now();
        // ZaloPay requires the yymmdd_ prefix on transaction ids.
        let app_trans_id = format!(
            "{}_{}",
            now.format("%y%m%d"),
            request.transaction_reference
        );
        let app_time = now.timestamp_millis();
        let app_user = request.order_id.to_string();
        let amount = request.amount.minor();
        let embed_data = serde_json::json!({ "redirecturl": request.return_url }).to_string();
        let item = "[]";

        let raw = format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.config.app_id, app_trans_id, app_user, amount, app_time, embed_data, item
        );
        let mac = hmac_sha256_hex(&self.config.key1, &raw);

        let body = serde_json::json!({
            "app_id": self.config.app_id.parse::<i64>().unwrap_or_default(),
            "app_user": app_user,
            "app_trans_id": app_trans_id,
            "app_time": app_time,
            "amount": amount,
            "description": request.order_info,
            "embed_data": embed_data,
            "item": item,
            "callback_url": request.ipn_url,
            "mac": mac,
        });

        let raw: ZalopayCreateResponse = self
            .http
            .post_json(&self.endpoint("/v2/create"), &body)
            .await?;
        if raw.return_code != 1 {
            return Err(GatewayError::ProviderError {
                provider: "zalopay".to_string(),
                message: raw.return_message,
                provider_code: Some(raw.return_code.to_string()),
                retryable: false,
            });
        }

        info!(
            order_id = %request.order_id,
            txn_ref = %app_trans_id,
            "zalopay payment initiated"
        );

        Ok(InitiatedPayment {
            redirect_url: raw.order_url,
            provider_transaction_ref: app_trans_id,
        })
    }

    async fn refund(&self, request: RefundRequest) -> GatewayResult<InitiatedRefund> {
        let now = chrono::Utc::now();
        let timestamp = now.timestamp_millis();
        let m_refund_id = format!(
            "{}_{}_rf{}",
            now.format("%y%m%d"),
            self.config.app_id,
            request.transaction_reference
        );
        let amount = request.amount.minor();

        let raw = format!(
            "{}|{}|{}|{}|{}",
            self.config.app_id,
            request.provider_transaction_ref,
            amount,
            request.reason,
            timestamp
        );
        let mac = hmac_sha256_hex(&self.config.key1, &raw);

        let body = serde_json::json!({
            "app_id": self.config.app_id.parse::<i64>().unwrap_or_default(),
            "m_refund_id": m_refund_id,
            "zp_trans_id": request.provider_transaction_ref,
            "amount": amount,
            "timestamp": timestamp,
            "description": request.reason,
            "mac": mac,
        });

        let raw: ZalopayRefundResponse = self
            .http
            .post_json(&self.endpoint("/v2/refund"), &body)
            .await?;
        // return_code 3 means the refund is processing, which is accepted.
        if raw.return_code != 1 && raw.return_code != 3 {
            return Err(GatewayError::RefundRejected {
                message: raw.return_message,
                provider_code: Some(raw.return_code.to_string()),
            });
        }

        info!(order_id = %request.order_id, "zalopay refund accepted");
        Ok(InitiatedRefund {
            provider_refund_ref: m_refund_id,
        })
    }

    fn verify_callback(&self, payload: &CallbackPayload) -> CallbackVerification {
        self.verify(payload)
    }

    fn verify_refund(&self, payload: &CallbackPayload) -> CallbackVerification {
        self.verify(payload)
    }

    fn name(&self) -> GatewayName {
        GatewayName::Zalopay
    }
}

#[derive(Debug, Deserialize)]
struct ZalopayCreateResponse {
    return_code: i64,
    return_message: String,
    order_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ZalopayRefundResponse {
    return_code: i64,
    return_message: String,
}
