use crate::gateways::error::GatewayResult;
use crate::gateways::types::{
    CallbackPayload, CallbackVerification, GatewayName, InitiateRequest, InitiatedPayment,
    InitiatedRefund, RefundRequest,
};
use async_trait::async_trait;

/// Uniform capability surface over the payment providers.
///
/// `initiate` and `refund` are the only methods allowed to perform I/O.
/// `verify_callback` and `verify_refund` are pure functions over the payload
/// and the configured secret: a bad signature yields `valid = false`, never
/// an error, so the caller can record the attempt and answer the provider
/// without branching on exceptions.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate(&self, request: InitiateRequest) -> GatewayResult<InitiatedPayment>;

    async fn refund(&self, request: RefundRequest) -> GatewayResult<InitiatedRefund>;

    fn verify_callback(&self, payload: &CallbackPayload) -> CallbackVerification;

    fn verify_refund(&self, payload: &CallbackPayload) -> CallbackVerification;

    fn name(&self) -> GatewayName;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;
    use uuid::Uuid;

    struct MockGateway;

    #[async_trait]
    impl PaymentGateway for MockGateway {
        async fn initiate(&self, request: InitiateRequest) -> GatewayResult<InitiatedPayment> {
            Ok(InitiatedPayment {
                redirect_url: Some("https://pay.example.com/checkout".to_string()),
                provider_transaction_ref: request.transaction_reference,
            })
        }

        async fn refund(&self, request: RefundRequest) -> GatewayResult<InitiatedRefund> {
            Ok(InitiatedRefund {
                provider_refund_ref: format!("rf_{}", request.transaction_reference),
            })
        }

        fn verify_callback(&self, _payload: &CallbackPayload) -> CallbackVerification {
            CallbackVerification {
                valid: true,
                provider_transaction_ref: Some("txn_1".to_string()),
                amount: Some(Money::from_minor(1000).unwrap()),
                result_code: Some("0".to_string()),
                success: true,
                reason: None,
            }
        }

        fn verify_refund(&self, payload: &CallbackPayload) -> CallbackVerification {
            self.verify_callback(payload)
        }

        fn name(&self) -> GatewayName {
            GatewayName::Momo
        }
    }

    #[tokio::test]
    async fn trait_can_be_implemented_by_mock_gateway() {
        let gateway: Box<dyn PaymentGateway> = Box::new(MockGateway);
        let initiated = gateway
            .initiate(InitiateRequest {
                order_id: Uuid::new_v4(),
                transaction_reference: "txn_1".to_string(),
                amount: Money::from_minor(1000).unwrap(),
                order_info: "order".to_string(),
                return_url: "https://example.com/return".to_string(),
                ipn_url: "https://example.com/ipn".to_string(),
                client_ip: "127.0.0.1".to_string(),
            })
            .await
            .expect("initiate should succeed");
        assert_eq!(initiated.provider_transaction_ref, "txn_1");
        assert!(initiated.redirect_url.is_some());
    }
}
