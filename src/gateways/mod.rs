//! Payment gateway adapters.
//!
//! One implementation per provider behind the [`adapter::PaymentGateway`]
//! trait; signing schemes and field naming are fully encapsulated here so
//! the settlement layer never sees provider-specific payload shapes.

pub mod adapter;
pub mod error;
pub mod factory;
pub mod providers;
pub mod signing;
pub mod types;

pub use adapter::PaymentGateway;
pub use error::{GatewayError, GatewayResult};
pub use factory::{GatewayFactory, GatewayFactoryConfig};
pub use types::{
    CallbackPayload, CallbackVerification, GatewayName, InitiateRequest, InitiatedPayment,
    InitiatedRefund, RefundRequest,
};
