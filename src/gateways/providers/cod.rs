//! Cash-on-delivery: the degenerate gateway.
//!
//! There is no provider leg. Collection is reported by the driver through
//! the fulfillment flow, so `initiate` returns no redirect and the verify
//! methods reject every payload (nothing external may confirm a cash
//! payment).

use crate::gateways::adapter::PaymentGateway;
use crate::gateways::error::GatewayResult;
use crate::gateways::types::{
    CallbackPayload, CallbackVerification, GatewayName, InitiateRequest, InitiatedPayment,
    InitiatedRefund, RefundRequest,
};
use async_trait::async_trait;
use tracing::info;

pub struct CodGateway;

impl CodGateway {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CodGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGateway for CodGateway {
    async fn initiate(&self, request: InitiateRequest) -> GatewayResult<InitiatedPayment> {
        info!(order_id = %request.order_id, "cash on delivery selected, no redirect");
        Ok(InitiatedPayment {
            redirect_url: None,
            provider_transaction_ref: request.transaction_reference,
        })
    }

    async fn refund(&self, request: RefundRequest) -> GatewayResult<InitiatedRefund> {
        // Cash refunds are settled out of band by support; the ledger entry
        // still tracks that one is owed.
        info!(order_id = %request.order_id, "cash refund recorded for manual settlement");
        Ok(InitiatedRefund {
            provider_refund_ref: format!("cod-manual-{}", request.transaction_reference),
        })
    }

    fn verify_callback(&self, _payload: &CallbackPayload) -> CallbackVerification {
        CallbackVerification::invalid("cash on delivery has no provider callbacks")
    }

    fn verify_refund(&self, _payload: &CallbackPayload) -> CallbackVerification {
        CallbackVerification::invalid("cash on delivery has no provider callbacks")
    }

    fn name(&self) -> GatewayName {
        GatewayName::Cod
    }
}
