//! The authoritative order transition table.
//!
//! Fulfillment status and payment status are orthogonal axes. Every mutation
//! of an order flows through [`StateMachine::apply`]; handlers and workers
//! never compare status strings themselves, so there is exactly one place
//! where "legal transition" is defined.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Fulfillment status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Preparing,
    ReadyForPickup,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Preparing => "preparing",
            OrderStatus::ReadyForPickup => "ready_for_pickup",
            OrderStatus::OutForDelivery => "out_for_delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status {
            "pending" => Some(OrderStatus::Pending),
            "confirmed" => Some(OrderStatus::Confirmed),
            "preparing" => Some(OrderStatus::Preparing),
            "ready_for_pickup" => Some(OrderStatus::ReadyForPickup),
            "out_for_delivery" => Some(OrderStatus::OutForDelivery),
            "delivered" => Some(OrderStatus::Delivered),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payment status of an order, monotonic except `Completed -> Refunded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status {
            "pending" => Some(PaymentStatus::Pending),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// External triggers fed into the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEvent {
    PaymentConfirmed,
    PaymentFailed,
    UserCancel,
    RestaurantAccept,
    Ready,
    DriverPickup,
    DeliveredConfirm,
    AdminCancel,
    RestaurantReject,
}

impl OrderEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderEvent::PaymentConfirmed => "payment_confirmed",
            OrderEvent::PaymentFailed => "payment_failed",
            OrderEvent::UserCancel => "user_cancel",
            OrderEvent::RestaurantAccept => "restaurant_accept",
            OrderEvent::Ready => "ready",
            OrderEvent::DriverPickup => "driver_pickup",
            OrderEvent::DeliveredConfirm => "delivered_confirm",
            OrderEvent::AdminCancel => "admin_cancel",
            OrderEvent::RestaurantReject => "restaurant_reject",
        }
    }
}

impl fmt::Display for OrderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transactional side effects the orchestrator must run alongside a
/// transition, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    /// Consume the promotion slot and insert the usage row.
    FinalizePromotion,
    /// Mark the order eligible for loyalty accrual (committed at delivery).
    ScheduleLoyaltyAccrual,
    /// Write the earned `LoyaltyActivity` with its running balance.
    CommitLoyaltyAccrual,
    /// Return a consumed/held promotion slot.
    ReleasePromotion,
    /// Insert a pending refund for the refund processor.
    EnqueueRefund,
    /// Open a fresh payment intent for another collection attempt.
    SchedulePaymentRetry,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("event {event} is not applicable to order status {status}")]
    InvalidTransition {
        status: OrderStatus,
        event: OrderEvent,
    },
}

/// An accepted transition: the statuses to persist and the effects to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: OrderStatus,
    /// `None` leaves the payment axis untouched.
    pub payment_status: Option<PaymentStatus>,
    pub cancellation_reason: Option<&'static str>,
    pub effects: Vec<SideEffect>,
}

/// Result of feeding one event to the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied(Transition),
    /// The order is terminal and the event is an expected at-least-once
    /// duplicate; nothing changes and the caller acknowledges success.
    Discarded,
}

/// The slice of an order the table needs to decide a transition.
#[derive(Debug, Clone, Copy)]
pub struct OrderView {
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_retries: i32,
}

#[derive(Debug, Clone)]
pub struct StateMachine {
    max_payment_retries: i32,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self {
            max_payment_retries: 3,
        }
    }
}

impl StateMachine {
    pub fn new(max_payment_retries: i32) -> Self {
        Self {
            max_payment_retries,
        }
    }

    pub fn max_payment_retries(&self) -> i32 {
        self.max_payment_retries
    }

    /// Decide what `event` does to an order in state `view`.
    ///
    /// Terminal states absorb events instead of erroring: providers and
    /// drivers deliver at-least-once, so a late duplicate is routine. The
    /// one exception is a verified `PaymentConfirmed` landing on an already
    /// cancelled order — money was actually collected, so the payment axis
    /// records the completion and a refund is enqueued, but the order is
    /// never resurrected.
    pub fn apply(
        &self,
        view: &OrderView,
        event: OrderEvent,
    ) -> Result<TransitionOutcome, TransitionError> {
        use OrderEvent::*;
        use OrderStatus::*;

        if view.status.is_terminal() {
            if view.status == Cancelled
                && event == PaymentConfirmed
                && view.payment_status != PaymentStatus::Refunded
            {
                return Ok(TransitionOutcome::Applied(Transition {
                    next: Cancelled,
                    payment_status: Some(PaymentStatus::Completed),
                    cancellation_reason: None,
                    effects: vec![SideEffect::EnqueueRefund],
                }));
            }
            return Ok(TransitionOutcome::Discarded);
        }

        let transition = match (view.status, event) {
            (Pending, PaymentConfirmed) => Transition {
                next: Confirmed,
                payment_status: Some(PaymentStatus::Completed),
                cancellation_reason: None,
                effects: vec![
                    SideEffect::FinalizePromotion,
                    SideEffect::ScheduleLoyaltyAccrual,
                ],
            },
            (Pending, PaymentFailed) => {
                if view.payment_retries + 1 >= self.max_payment_retries {
                    Transition {
                        next: Cancelled,
                        payment_status: Some(PaymentStatus::Failed),
                        cancellation_reason: Some("payment_timeout"),
                        effects: vec![SideEffect::ReleasePromotion],
                    }
                } else {
                    Transition {
                        next: Pending,
                        payment_status: None,
                        cancellation_reason: None,
                        effects: vec![SideEffect::SchedulePaymentRetry],
                    }
                }
            }
            (Pending, UserCancel) => Transition {
                next: Cancelled,
                payment_status: None,
                cancellation_reason: Some("user_cancelled"),
                effects: vec![SideEffect::ReleasePromotion],
            },
            (Confirmed, RestaurantAccept) => Transition {
                next: Preparing,
                payment_status: None,
                cancellation_reason: None,
                effects: vec![],
            },
            (Preparing, Ready) => Transition {
                next: ReadyForPickup,
                payment_status: None,
                cancellation_reason: None,
                effects: vec![],
            },
            (ReadyForPickup, DriverPickup) => Transition {
                next: OutForDelivery,
                payment_status: None,
                cancellation_reason: None,
                effects: vec![],
            },
            (OutForDelivery, DeliveredConfirm) => Transition {
                next: Delivered,
                payment_status: None,
                cancellation_reason: None,
                effects: vec![SideEffect::CommitLoyaltyAccrual],
            },
            // Admin and restaurant cancellation apply from any non-terminal
            // status; a completed payment gets refunded.
            (_, AdminCancel) | (_, RestaurantReject) => {
                let mut effects = vec![SideEffect::ReleasePromotion];
                if view.payment_status == PaymentStatus::Completed {
                    effects.push(SideEffect::EnqueueRefund);
                }
                Transition {
                    next: Cancelled,
                    payment_status: None,
                    cancellation_reason: Some(if event == AdminCancel {
                        "admin_cancelled"
                    } else {
                        "restaurant_rejected"
                    }),
                    effects,
                }
            }
            (status, event) => {
                return Err(TransitionError::InvalidTransition { status, event });
            }
        };

        Ok(TransitionOutcome::Applied(transition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(status: OrderStatus, payment: PaymentStatus) -> OrderView {
        OrderView {
            status,
            payment_status: payment,
            payment_retries: 0,
        }
    }

    fn machine() -> StateMachine {
        StateMachine::new(3)
    }

    #[test]
    fn payment_confirmed_moves_pending_to_confirmed() {
        let outcome = machine()
            .apply(
                &view(OrderStatus::Pending, PaymentStatus::Pending),
                OrderEvent::PaymentConfirmed,
            )
            .unwrap();
        match outcome {
            TransitionOutcome::Applied(t) => {
                assert_eq!(t.next, OrderStatus::Confirmed);
                assert_eq!(t.payment_status, Some(PaymentStatus::Completed));
                assert_eq!(
                    t.effects,
                    vec![
                        SideEffect::FinalizePromotion,
                        SideEffect::ScheduleLoyaltyAccrual
                    ]
                );
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn payment_failure_requeues_until_budget_exhausted() {
        let sm = machine();
        let mut v = view(OrderStatus::Pending, PaymentStatus::Pending);

        let outcome = sm.apply(&v, OrderEvent::PaymentFailed).unwrap();
        match outcome {
            TransitionOutcome::Applied(t) => {
                assert_eq!(t.next, OrderStatus::Pending);
                assert_eq!(t.effects, vec![SideEffect::SchedulePaymentRetry]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        v.payment_retries = 2;
        let outcome = sm.apply(&v, OrderEvent::PaymentFailed).unwrap();
        match outcome {
            TransitionOutcome::Applied(t) => {
                assert_eq!(t.next, OrderStatus::Cancelled);
                assert_eq!(t.payment_status, Some(PaymentStatus::Failed));
                assert_eq!(t.cancellation_reason, Some("payment_timeout"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn fulfillment_chain_is_strictly_ordered() {
        let sm = machine();
        let steps = [
            (OrderStatus::Confirmed, OrderEvent::RestaurantAccept, OrderStatus::Preparing),
            (OrderStatus::Preparing, OrderEvent::Ready, OrderStatus::ReadyForPickup),
            (OrderStatus::ReadyForPickup, OrderEvent::DriverPickup, OrderStatus::OutForDelivery),
            (OrderStatus::OutForDelivery, OrderEvent::DeliveredConfirm, OrderStatus::Delivered),
        ];
        for (from, event, to) in steps {
            match sm.apply(&view(from, PaymentStatus::Completed), event).unwrap() {
                TransitionOutcome::Applied(t) => assert_eq!(t.next, to),
                other => panic!("unexpected outcome {other:?}"),
            }
        }
    }

    #[test]
    fn delivery_commits_loyalty_accrual() {
        match machine()
            .apply(
                &view(OrderStatus::OutForDelivery, PaymentStatus::Completed),
                OrderEvent::DeliveredConfirm,
            )
            .unwrap()
        {
            TransitionOutcome::Applied(t) => {
                assert_eq!(t.effects, vec![SideEffect::CommitLoyaltyAccrual]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn admin_cancel_of_paid_order_enqueues_refund() {
        match machine()
            .apply(
                &view(OrderStatus::Preparing, PaymentStatus::Completed),
                OrderEvent::AdminCancel,
            )
            .unwrap()
        {
            TransitionOutcome::Applied(t) => {
                assert_eq!(t.next, OrderStatus::Cancelled);
                assert!(t.effects.contains(&SideEffect::EnqueueRefund));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn admin_cancel_of_unpaid_order_skips_refund() {
        match machine()
            .apply(
                &view(OrderStatus::Pending, PaymentStatus::Pending),
                OrderEvent::AdminCancel,
            )
            .unwrap()
        {
            TransitionOutcome::Applied(t) => {
                assert!(!t.effects.contains(&SideEffect::EnqueueRefund));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn payment_confirmed_after_cancellation_refunds_instead_of_reviving() {
        match machine()
            .apply(
                &view(OrderStatus::Cancelled, PaymentStatus::Pending),
                OrderEvent::PaymentConfirmed,
            )
            .unwrap()
        {
            TransitionOutcome::Applied(t) => {
                assert_eq!(t.next, OrderStatus::Cancelled);
                assert_eq!(t.payment_status, Some(PaymentStatus::Completed));
                assert_eq!(t.effects, vec![SideEffect::EnqueueRefund]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn terminal_states_absorb_duplicate_events() {
        let sm = machine();
        for status in [OrderStatus::Delivered, OrderStatus::Cancelled] {
            let outcome = sm
                .apply(&view(status, PaymentStatus::Completed), OrderEvent::DeliveredConfirm)
                .unwrap();
            assert_eq!(outcome, TransitionOutcome::Discarded);
        }
    }

    #[test]
    fn unlisted_pairs_are_invalid_and_change_nothing() {
        let sm = machine();
        let illegal = [
            (OrderStatus::Pending, OrderEvent::DriverPickup),
            (OrderStatus::Pending, OrderEvent::DeliveredConfirm),
            (OrderStatus::Confirmed, OrderEvent::PaymentConfirmed),
            (OrderStatus::Confirmed, OrderEvent::UserCancel),
            (OrderStatus::Preparing, OrderEvent::RestaurantAccept),
            (OrderStatus::ReadyForPickup, OrderEvent::Ready),
            (OrderStatus::OutForDelivery, OrderEvent::DriverPickup),
        ];
        for (status, event) in illegal {
            let result = sm.apply(&view(status, PaymentStatus::Pending), event);
            assert!(
                matches!(result, Err(TransitionError::InvalidTransition { .. })),
                "{status}/{event} should be invalid"
            );
        }
    }

    #[test]
    fn exhaustive_sweep_matches_the_published_table() {
        // Every (status, event) pair resolves to exactly one of the three
        // behaviors; nothing panics and nothing falls through.
        let sm = machine();
        let statuses = [
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            OrderStatus::Preparing,
            OrderStatus::ReadyForPickup,
            OrderStatus::OutForDelivery,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
        ];
        let events = [
            OrderEvent::PaymentConfirmed,
            OrderEvent::PaymentFailed,
            OrderEvent::UserCancel,
            OrderEvent::RestaurantAccept,
            OrderEvent::Ready,
            OrderEvent::DriverPickup,
            OrderEvent::DeliveredConfirm,
            OrderEvent::AdminCancel,
            OrderEvent::RestaurantReject,
        ];
        let mut applied = 0;
        let mut discarded = 0;
        let mut invalid = 0;
        for status in statuses {
            for event in events {
                match sm.apply(&view(status, PaymentStatus::Pending), event) {
                    Ok(TransitionOutcome::Applied(_)) => applied += 1,
                    Ok(TransitionOutcome::Discarded) => discarded += 1,
                    Err(TransitionError::InvalidTransition { .. }) => invalid += 1,
                }
            }
        }
        // 5 non-terminal statuses x {admin_cancel, restaurant_reject} = 10,
        // plus the 7 listed single-row transitions = 17 applied; cancelled +
        // payment_confirmed adds 1 more. 2 terminal statuses x 9 events = 18
        // minus that special row = 17 discarded.
        assert_eq!(applied, 18);
        assert_eq!(discarded, 17);
        assert_eq!(invalid, 63 - 18 - 17);
    }
}
