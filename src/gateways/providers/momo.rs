//! Momo adapter.
//!
//! Momo signs an `&`-joined parameter string in a fixed, documented field
//! order (not sorted) with HMAC-SHA256; the callback carries the signature
//! in a `signature` field and reports the outcome in a numeric `resultCode`
//! where 0 means captured.

use crate::gateways::adapter::PaymentGateway;
use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::signing::{hmac_sha256_hex, secure_eq, GatewayHttpClient};
use crate::gateways::types::{
    CallbackPayload, CallbackVerification, GatewayName, InitiateRequest, InitiatedPayment,
    InitiatedRefund, RefundRequest,
};
use crate::money::Money;
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

const SUCCESS_CODE: i64 = 0;

#[derive(Debug, Clone)]
pub struct MomoConfig {
    pub partner_code: String,
    pub access_key: String,
    pub secret_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for MomoConfig {
    fn default() -> Self {
        Self {
            partner_code: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            base_url: "https://test-payment.momo.vn".to_string(),
            timeout_secs: 10,
            max_retries: 3,
        }
    }
}

impl MomoConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let required = |name: &str| {
            std::env::var(name).map_err(|_| GatewayError::ValidationError {
                message: format!("{name} environment variable is required"),
                field: Some(name.to_string()),
            })
        };

        let defaults = Self::default();
        Ok(Self {
            partner_code: required("MOMO_PARTNER_CODE")?,
            access_key: required("MOMO_ACCESS_KEY")?,
            secret_key: required("MOMO_SECRET_KEY")?,
            base_url: std::env::var("MOMO_BASE_URL").unwrap_or(defaults.base_url),
            timeout_secs: std::env::var("MOMO_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_secs),
            max_retries: std::env::var("MOMO_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.max_retries),
        })
    }
}

pub struct MomoGateway {
    config: MomoConfig,
    http: GatewayHttpClient,
}

impl MomoGateway {
    pub fn new(config: MomoConfig) -> GatewayResult<Self> {
        let http =
            GatewayHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(MomoConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// The callback signing string, in Momo's documented field order.
    fn callback_raw_signature(&self, payload: &CallbackPayload) -> String {
        let field = |name: &str| {
            payload
                .fields
                .get(name)
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_default()
        };
        format!(
            "accessKey={}&amount={}&extraData={}&message={}&orderId={}&orderInfo={}&orderType={}&partnerCode={}&payType={}&requestId={}&responseTime={}&resultCode={}&transId={}",
            self.config.access_key,
            field("amount"),
            field("extraData"),
            field("message"),
            field("orderId"),
            field("orderInfo"),
            field("orderType"),
            field("partnerCode"),
            field("payType"),
            field("requestId"),
            field("responseTime"),
            field("resultCode"),
            field("transId"),
        )
    }

    fn verify(&self, payload: &CallbackPayload) -> CallbackVerification {
        let Some(received) = payload.str_field("signature") else {
            return CallbackVerification::invalid("missing signature");
        };

        let computed = hmac_sha256_hex(&self.config.secret_key, &self.callback_raw_signature(payload));
        if !secure_eq(computed.as_bytes(), received.trim().as_bytes()) {
            return CallbackVerification::invalid("invalid momo signature");
        }

        let result_code = payload.i64_field("resultCode");
        CallbackVerification {
            valid: true,
            provider_transaction_ref: payload.str_field("orderId").map(str::to_string),
            amount: payload
                .i64_field("amount")
                .and_then(|minor| Money::from_minor(minor).ok()),
            success: result_code == Some(SUCCESS_CODE),
            result_code: result_code.map(|c| c.to_string()),
            reason: None,
        }
    }
}

#[async_trait]
impl PaymentGateway for MomoGateway {
    async fn initiate(&self, request: InitiateRequest) -> GatewayResult<InitiatedPayment> {
        let extra_data = base64::engine::general_purpose::STANDARD
            .encode(serde_json::json!({ "orderId": request.order_id }).to_string());
        let amount = request.amount.minor();
        let request_type = "captureWallet";

        let raw = format!(
            "accessKey={}&amount={}&extraData={}&ipnUrl={}&orderId={}&orderInfo={}&partnerCode={}&redirectUrl={}&requestId={}&requestType={}",
            self.config.access_key,
            amount,
            extra_data,
            request.ipn_url,
            request.transaction_reference,
            request.order_info,
            self.config.partner_code,
            request.return_url,
            request.transaction_reference,
            request_type,
        );
        let signature = hmac_sha256_hex(&self.config.secret_key, &raw);

        let body = serde_json::json!({
            "partnerCode": self.config.partner_code,
            "accessKey": self.config.access_key,
            "requestId": request.transaction_reference,
            "amount": amount,
            "orderId": request.transaction_reference,
            "orderInfo": request.order_info,
            "redirectUrl": request.return_url,
            "ipnUrl": request.ipn_url,
            "extraData": extra_data,
            "requestType": request_type,
            "lang": "vi",
            "signature": signature,
        });

        let raw: MomoCreateResponse = self
            .http
            .post_json(&self.endpoint("/v2/gateway/api/create"), &body)
            .await?;
        if raw.result_code != SUCCESS_CODE {
            return Err(GatewayError::ProviderError {
                provider: "momo".to_string(),
                message: raw.message,
                provider_code: Some(raw.result_code.to_string()),
                retryable: false,
            });
        }

        info!(
            order_id = %request.order_id,
            txn_ref = %request.transaction_reference,
            "momo payment initiated"
        );

        Ok(InitiatedPayment {
            redirect_url: Some(raw.pay_url),
            provider_transaction_ref: request.transaction_reference,
        })
    }

    async fn refund(&self, request: RefundRequest) -> GatewayResult<InitiatedRefund> {
        let refund_id = format!("rf-{}", request.transaction_reference);
        let amount = request.amount.minor();
        let trans_id = request
            .provider_transaction_ref
            .parse::<i64>()
            .unwrap_or_default();

        let raw = format!(
            "accessKey={}&amount={}&description={}&orderId={}&partnerCode={}&requestId={}&transId={}",
            self.config.access_key,
            amount,
            request.reason,
            refund_id,
            self.config.partner_code,
            refund_id,
            trans_id,
        );
        let signature = hmac_sha256_hex(&self.config.secret_key, &raw);

        let body = serde_json::json!({
            "partnerCode": self.config.partner_code,
            "orderId": refund_id,
            "requestId": refund_id,
            "amount": amount,
            "transId": trans_id,
            "lang": "vi",
            "description": request.reason,
            "signature": signature,
        });

        let raw: MomoRefundResponse = self
            .http
            .post_json(&self.endpoint("/v2/gateway/api/refund"), &body)
            .await?;
        if raw.result_code != SUCCESS_CODE {
            return Err(GatewayError::RefundRejected {
                message: raw.message,
                provider_code: Some(raw.result_code.to_string()),
            });
        }

        info!(order_id = %request.order_id, "momo refund accepted");
        Ok(InitiatedRefund {
            provider_refund_ref: refund_id,
        })
    }

    fn verify_callback(&self, payload: &CallbackPayload) -> CallbackVerification {
        self.verify(payload)
    }

    fn verify_refund(&self, payload: &CallbackPayload) -> CallbackVerification {
        self.verify(payload)
    }

    fn name(&self) -> GatewayName {
        GatewayName::Momo
    }
}

#[derive(Debug, Deserialize)]
struct MomoCreateResponse {
    #[serde(rename = "resultCode")]
    result_code: i64,
    message: String,
    #[serde(rename = "payUrl")]
    pay_url: String,
}

#[derive(Debug, Deserialize)]
struct MomoRefundResponse {
    #[serde(rename = "resultCode")]
    result_code: i64,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gateway() -> MomoGateway {
        MomoGateway::new(MomoConfig {
            partner_code: "MOMOTEST".to_string(),
            access_key: "accesskey".to_string(),
            secret_key: "secretkey".to_string(),
            ..MomoConfig::default()
        })
        .expect("gateway init should succeed")
    }

    fn signed_callback(amount: i64, result_code: i64) -> CallbackPayload {
        let gw = gateway();
        let mut fields = json!({
            "partnerCode": "MOMOTEST",
            "orderId": "ord-1",
            "requestId": "ord-1",
            "amount": amount,
            "orderInfo": "don hang 1",
            "orderType": "momo_wallet",
            "transId": 4088878653i64,
            "resultCode": result_code,
            "message": "Successful.",
            "payType": "qr",
            "responseTime": 1712214529000i64,
            "extraData": "",
        });
        let signature =
            hmac_sha256_hex("secretkey", &gw.callback_raw_signature(&CallbackPayload::new(fields.clone())));
        fields["signature"] = json!(signature);
        CallbackPayload::new(fields)
    }

    #[test]
    fn valid_callback_passes_and_extracts_fields() {
        let verification = gateway().verify_callback(&signed_callback(100_000, 0));
        assert!(verification.valid);
        assert!(verification.success);
        assert_eq!(
            verification.provider_transaction_ref.as_deref(),
            Some("ord-1")
        );
        assert_eq!(verification.amount.unwrap().minor(), 100_000);
        assert_eq!(verification.result_code.as_deref(), Some("0"));
    }

    #[test]
    fn nonzero_result_code_is_valid_but_unsuccessful() {
        let verification = gateway().verify_callback(&signed_callback(100_000, 1006));
        assert!(verification.valid);
        assert!(!verification.success);
    }

    #[test]
    fn single_byte_tamper_invalidates_signature() {
        let callback = signed_callback(100_000, 0);
        let mut fields = callback.fields.clone();
        fields["amount"] = json!(100_001);
        assert!(!gateway().verify_callback(&CallbackPayload::new(fields)).valid);
    }

    #[test]
    fn missing_signature_is_invalid() {
        let payload = CallbackPayload::new(json!({"orderId": "ord-1"}));
        assert!(!gateway().verify_callback(&payload).valid);
    }
}
