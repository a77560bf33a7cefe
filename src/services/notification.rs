use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::orders::OrderStatus;

/// The envelope emitted to the notification collaborator on every order
/// transition. Delivery (email, push, SMS fan-out) is the collaborator's
/// problem; a transition is committed whether or not anyone listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionNotification {
    pub order_id: Uuid,
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
    pub timestamp: DateTime<Utc>,
}

pub struct NotificationService;

impl NotificationService {
    pub fn new() -> Self {
        Self
    }

    /// Fire-and-forget emit; the structured log line is the integration
    /// point until a real fan-out consumer exists.
    pub fn order_transitioned(&self, order_id: Uuid, old: OrderStatus, new: OrderStatus) {
        let notification = TransitionNotification {
            order_id,
            old_status: old,
            new_status: new,
            timestamp: Utc::now(),
        };
        info!(
            order_id = %notification.order_id,
            old_status = %notification.old_status,
            new_status = %notification.new_status,
            "🔔 NOTIFICATION: order transitioned"
        );
    }
}

impl Default for NotificationService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_with_snake_case_statuses() {
        let notification = TransitionNotification {
            order_id: Uuid::new_v4(),
            old_status: OrderStatus::Pending,
            new_status: OrderStatus::Confirmed,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["old_status"], "pending");
        assert_eq!(json["new_status"], "confirmed");
    }
}
