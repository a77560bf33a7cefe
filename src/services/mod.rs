//! Services module for settlement business logic

pub mod notification;
pub mod rewards;
pub mod settlement;

pub use notification::{NotificationService, TransitionNotification};
pub use rewards::{
    LoyaltyAccrual, PromotionFinalization, RewardsConfig, RewardsCoordinator,
};
pub use settlement::{
    CancelActor, CheckoutItem, CheckoutReceipt, CheckoutRequest, SettlementConfig,
    SettlementOrchestrator, SettlementOutcome,
};
