use crate::gateways::error::GatewayError;
use crate::money::Money;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GatewayName {
    Vnpay,
    Momo,
    Zalopay,
    Cod,
}

impl GatewayName {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayName::Vnpay => "vnpay",
            GatewayName::Momo => "momo",
            GatewayName::Zalopay => "zalopay",
            GatewayName::Cod => "cod",
        }
    }

    /// COD has no asynchronous provider leg; collection happens at the door.
    pub fn is_cash(&self) -> bool {
        matches!(self, GatewayName::Cod)
    }
}

impl std::fmt::Display for GatewayName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GatewayName {
    type Err = GatewayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "vnpay" => Ok(GatewayName::Vnpay),
            "momo" => Ok(GatewayName::Momo),
            "zalopay" => Ok(GatewayName::Zalopay),
            "cod" | "cash" | "cash_on_delivery" => Ok(GatewayName::Cod),
            _ => Err(GatewayError::ValidationError {
                message: format!("unsupported payment provider: {}", value),
                field: Some("provider".to_string()),
            }),
        }
    }
}

/// Everything an adapter needs to open a collection attempt.
#[derive(Debug, Clone)]
pub struct InitiateRequest {
    pub order_id: Uuid,
    /// Reference the provider will echo back in its callback; generated per
    /// intent so retries get fresh references.
    pub transaction_reference: String,
    pub amount: Money,
    pub order_info: String,
    pub return_url: String,
    pub ipn_url: String,
    pub client_ip: String,
}

#[derive(Debug, Clone)]
pub struct InitiatedPayment {
    /// Where to send the customer; `None` for cash on delivery.
    pub redirect_url: Option<String>,
    pub provider_transaction_ref: String,
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub order_id: Uuid,
    pub transaction_reference: String,
    pub provider_transaction_ref: String,
    pub amount: Money,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct InitiatedRefund {
    pub provider_refund_ref: String,
}

/// Verdict of a pure signature check over a callback payload.
///
/// `valid == false` is a result, not an error: the ledger records the
/// attempt either way, and a mismatch must not leak timing or detail.
#[derive(Debug, Clone)]
pub struct CallbackVerification {
    pub valid: bool,
    pub provider_transaction_ref: Option<String>,
    pub amount: Option<Money>,
    pub result_code: Option<String>,
    /// Whether `result_code` means the money actually moved.
    pub success: bool,
    pub reason: Option<String>,
}

impl CallbackVerification {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            provider_transaction_ref: None,
            amount: None,
            result_code: None,
            success: false,
            reason: Some(reason.into()),
        }
    }
}

/// A callback payload as received on the wire, normalized to a flat JSON
/// object (VNPay's query parameters and Momo/ZaloPay's JSON bodies all fit).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub fields: JsonValue,
}

impl CallbackPayload {
    pub fn new(fields: JsonValue) -> Self {
        Self { fields }
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_str())
    }

    /// Numeric fields arrive as strings from some providers and numbers
    /// from others.
    pub fn i64_field(&self, name: &str) -> Option<i64> {
        match self.fields.get(name)? {
            JsonValue::Number(n) => n.as_i64(),
            JsonValue::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn gateway_name_round_trips() {
        for name in ["vnpay", "momo", "zalopay", "cod"] {
            let parsed = GatewayName::from_str(name).unwrap();
            assert_eq!(parsed.as_str(), name);
        }
        assert!(matches!(
            GatewayName::from_str("cash_on_delivery"),
            Ok(GatewayName::Cod)
        ));
        assert!(GatewayName::from_str("stripe").is_err());
    }

    #[test]
    fn payload_reads_numbers_in_either_encoding() {
        let payload = CallbackPayload::new(json!({
            "amount": "100000",
            "transId": 4088878653i64,
        }));
        assert_eq!(payload.i64_field("amount"), Some(100_000));
        assert_eq!(payload.i64_field("transId"), Some(4_088_878_653));
        assert_eq!(payload.i64_field("missing"), None);
    }
}
