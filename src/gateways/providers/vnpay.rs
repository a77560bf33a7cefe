//! VNPay adapter.
//!
//! VNPay signs the alphabetically-sorted, form-urlencoded query string with
//! HMAC-SHA512 and carries the signature in `vnp_SecureHash`. Amounts on the
//! wire are multiplied by 100. The pay URL is built locally; only refunds go
//! through the merchant API.

use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::adapter::PaymentGateway;
use crate::gateways::signing::{
    canonical_query, hmac_sha512_hex, secure_eq, GatewayHttpClient,
};
use crate::gateways::types::{
    CallbackPayload, CallbackVerification, GatewayName, InitiateRequest, InitiatedPayment,
    InitiatedRefund, RefundRequest,
};
use crate::money::Money;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

const SIGNATURE_FIELD: &str = "vnp_SecureHash";
const SUCCESS_CODE: &str = "00";

#[derive(Debug, Clone)]
pub struct VnpayConfig {
    pub tmn_code: String,
    pub hash_secret: String,
    pub pay_url: String,
    pub api_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for VnpayConfig {
    fn default() -> Self {
        Self {
            tmn_code: String::new(),
            hash_secret: String::new(),
            pay_url: "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".to_string(),
            api_url: "https://sandbox.vnpayment.vn/merchant_webapi/api/transaction".to_string(),
            timeout_secs: 10,
            max_retries: 3,
        }
    }
}

impl VnpayConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let tmn_code =
            std::env::var("VNPAY_TMN_CODE").map_err(|_| GatewayError::ValidationError {
                message: "VNPAY_TMN_CODE environment variable is required".to_string(),
                field: Some("VNPAY_TMN_CODE".to_string()),
            })?;
        let hash_secret =
            std::env::var("VNPAY_HASH_SECRET").map_err(|_| GatewayError::ValidationError {
                message: "VNPAY_HASH_SECRET environment variable is required".to_string(),
                field: Some("VNPAY_HASH_SECRET".to_string()),
            })?;

        let defaults = Self::default();
        Ok(Self {
            tmn_code,
            hash_secret,
            pay_url: std::env::var("VNPAY_PAY_URL").unwrap_or(defaults.pay_url),
            api_url: std::env::var("VNPAY_API_URL").unwrap_or(defaults.api_url),
            timeout_secs: std::env::var("VNPAY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_secs),
            max_retries: std::env::var("VNPAY_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.max_retries),
        })
    }
}

pub struct VnpayGateway {
    config: VnpayConfig,
    http: GatewayHttpClient,
}

impl VnpayGateway {
    pub fn new(config: VnpayConfig) -> GatewayResult<Self> {
        let http =
            GatewayHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(VnpayConfig::from_env()?)
    }

    /// Signing string for a callback: every `vnp_` field except the
    /// signature itself, sorted and form-urlencoded.
    fn callback_hash_data(payload: &CallbackPayload) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(object) = payload.fields.as_object() {
            for (key, value) in object {
                if key == SIGNATURE_FIELD || key == "vnp_SecureHashType" {
                    continue;
                }
                let value = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if value.is_empty() {
                    continue;
                }
                pairs.push((key.clone(), value));
            }
        }
        pairs
    }

    fn verify(&self, payload: &CallbackPayload) -> CallbackVerification {
        let Some(received) = payload.str_field(SIGNATURE_FIELD) else {
            return CallbackVerification::invalid("missing vnp_SecureHash");
        };

        let hash_data = canonical_query(&Self::callback_hash_data(payload));
        let computed = hmac_sha512_hex(&self.config.hash_secret, &hash_data);
        if !secure_eq(computed.as_bytes(), received.trim().to_lowercase().as_bytes()) {
            return CallbackVerification::invalid("invalid vnpay signature");
        }

        let result_code = payload.str_field("vnp_ResponseCode").map(str::to_string);
        // Wire amount is x100.
        let amount = payload
            .i64_field("vnp_Amount")
            .filter(|raw| raw % 100 == 0)
            .and_then(|raw| Money::from_minor(raw / 100).ok());

        CallbackVerification {
            valid: true,
            provider_transaction_ref: payload.str_field("vnp_TxnRef").map(str::to_string),
            amount,
            success: result_code.as_deref() == Some(SUCCESS_CODE),
            result_code,
            reason: None,
        }
    }
}

#[async_trait]
impl PaymentGateway for VnpayGateway {
    async fn initiate(&self, request: InitiateRequest) -> GatewayResult<InitiatedPayment> {
        let now = chrono::Utc::now();
        let pairs = vec![
            ("vnp_Version".to_string(), "2.1.0".to_string()),
            ("vnp_Command".to_string(), "pay".to_string()),
            ("vnp_TmnCode".to_string(), self.config.tmn_code.clone()),
            (
                "vnp_Amount".to_string(),
                (request.amount.minor() * 100).to_string(),
            ),
            ("vnp_CurrCode".to_string(), "VND".to_string()),
            ("vnp_TxnRef".to_string(), request.transaction_reference.clone()),
            ("vnp_OrderInfo".to_string(), request.order_info.clone()),
            ("vnp_OrderType".to_string(), "other".to_string()),
            ("vnp_Locale".to_string(), "vn".to_string()),
            ("vnp_ReturnUrl".to_string(), request.return_url.clone()),
            ("vnp_IpAddr".to_string(), request.client_ip.clone()),
            (
                "vnp_CreateDate".to_string(),
                now.format("%Y%m%d%H%M%S").to_string(),
            ),
            (
                "vnp_ExpireDate".to_string(),
                (now + chrono::Duration::minutes(15))
                    .format("%Y%m%d%H%M%S")
                    .to_string(),
            ),
        ];

        let query = canonical_query(&pairs);
        let secure_hash = hmac_sha512_hex(&self.config.hash_secret, &query);
        let redirect_url = format!(
            "{}?{}&vnp_SecureHashType=HmacSHA512&{}={}",
            self.config.pay_url, query, SIGNATURE_FIELD, secure_hash
        );

        info!(
            order_id = %request.order_id,
            txn_ref = %request.transaction_reference,
            "vnpay payment url built"
        );

        Ok(InitiatedPayment {
            redirect_url: Some(redirect_url),
            provider_transaction_ref: request.transaction_reference,
        })
    }

    async fn refund(&self, request: RefundRequest) -> GatewayResult<InitiatedRefund> {
        let now = chrono::Utc::now();
        let request_id = format!("rf-{}", request.transaction_reference);
        let create_date = now.format("%Y%m%d%H%M%S").to_string();
        let amount = (request.amount.minor() * 100).to_string();

        // The refund API signs a pipe-joined field list, not the sorted
        // query string the pay flow uses.
        let raw = [
            request_id.as_str(),
            "2.1.0",
            "refund",
            self.config.tmn_code.as_str(),
            "02",
            request.transaction_reference.as_str(),
            amount.as_str(),
            request.provider_transaction_ref.as_str(),
            create_date.as_str(),
            "settlement-engine",
            request.reason.as_str(),
        ]
        .join("|");
        let secure_hash = hmac_sha512_hex(&self.config.hash_secret, &raw);

        let body = serde_json::json!({
            "vnp_RequestId": request_id,
            "vnp_Version": "2.1.0",
            "vnp_Command": "refund",
            "vnp_TmnCode": self.config.tmn_code,
            "vnp_TransactionType": "02",
            "vnp_TxnRef": request.transaction_reference,
            "vnp_Amount": amount,
            "vnp_TransactionNo": request.provider_transaction_ref,
            "vnp_CreateDate": create_date,
            "vnp_CreateBy": "settlement-engine",
            "vnp_OrderInfo": request.reason,
            "vnp_SecureHash": secure_hash,
        });

        let raw: VnpayRefundResponse = self.http.post_json(&self.config.api_url, &body).await?;
        if raw.vnp_response_code != SUCCESS_CODE {
            return Err(GatewayError::RefundRejected {
                message: raw.vnp_message.unwrap_or_else(|| "refund refused".to_string()),
                provider_code: Some(raw.vnp_response_code),
            });
        }

        info!(order_id = %request.order_id, "vnpay refund accepted");
        Ok(InitiatedRefund {
            provider_refund_ref: raw
                .vnp_transaction_no
                .unwrap_or(request.provider_transaction_ref),
        })
    }

    fn verify_callback(&self, payload: &CallbackPayload) -> CallbackVerification {
        self.verify(payload)
    }

    fn verify_refund(&self, payload: &CallbackPayload) -> CallbackVerification {
        self.verify(payload)
    }

    fn name(&self) -> GatewayName {
        GatewayName::Vnpay
    }
}

#[derive(Debug, Deserialize)]
struct VnpayRefundResponse {
    #[serde(rename = "vnp_ResponseCode")]
    vnp_response_code: String,
    #[serde(rename = "vnp_Message")]
    vnp_message: Option<String>,
    #[serde(rename = "vnp_TransactionNo")]
    vnp_transaction_no: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gateway() -> VnpayGateway {
        VnpayGateway::new(VnpayConfig {
            tmn_code: "TESTTMN".to_string(),
            hash_secret: "testsecret".to_string(),
            ..VnpayConfig::default()
        })
        .expect("gateway init should succeed")
    }

    fn signed_callback(amount_x100: i64, response_code: &str) -> CallbackPayload {
        let pairs = vec![
            ("vnp_Amount".to_string(), amount_x100.to_string()),
            ("vnp_BankCode".to_string(), "NCB".to_string()),
            ("vnp_ResponseCode".to_string(), response_code.to_string()),
            ("vnp_TmnCode".to_string(), "TESTTMN".to_string()),
            ("vnp_TransactionNo".to_string(), "14422574".to_string()),
            ("vnp_TxnRef".to_string(), "ord-1".to_string()),
        ];
        let hash = hmac_sha512_hex("testsecret", &canonical_query(&pairs));
        let mut fields = serde_json::Map::new();
        for (k, v) in pairs {
            fields.insert(k, json!(v));
        }
        fields.insert(SIGNATURE_FIELD.to_string(), json!(hash));
        CallbackPayload::new(json!(fields))
    }

    #[test]
    fn valid_callback_passes_and_extracts_fields() {
        let verification = gateway().verify_callback(&signed_callback(10_000_000, "00"));
        assert!(verification.valid);
        assert!(verification.success);
        assert_eq!(
            verification.provider_transaction_ref.as_deref(),
            Some("ord-1")
        );
        assert_eq!(verification.amount.unwrap().minor(), 100_000);
    }

    #[test]
    fn failed_result_code_is_valid_but_unsuccessful() {
        let verification = gateway().verify_callback(&signed_callback(10_000_000, "24"));
        assert!(verification.valid);
        assert!(!verification.success);
        assert_eq!(verification.result_code.as_deref(), Some("24"));
    }

    #[test]
    fn single_byte_tamper_invalidates_signature() {
        let callback = signed_callback(10_000_000, "00");
        let mut fields = callback.fields.clone();
        fields["vnp_Amount"] = json!("10000100");
        let verification = gateway().verify_callback(&CallbackPayload::new(fields));
        assert!(!verification.valid);
    }

    #[test]
    fn missing_signature_is_invalid() {
        let payload = CallbackPayload::new(json!({"vnp_TxnRef": "ord-1"}));
        assert!(!gateway().verify_callback(&payload).valid);
    }
}
