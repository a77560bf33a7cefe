pub mod intent_expiry;
pub mod refund_processor;

pub use intent_expiry::IntentExpiryConfig;
pub use refund_processor::{RefundProcessor, RefundProcessorConfig};
