//! Transition-table scenarios exercised end to end at the state machine
//! level: lifecycle ordering, retry budgets, the cancel/confirm race and
//! terminal absorption.

use Savora_backend::orders::{
    OrderEvent, OrderStatus, OrderView, PaymentStatus, SideEffect, StateMachine,
    TransitionError, TransitionOutcome,
};

fn view(status: OrderStatus, payment: PaymentStatus, retries: i32) -> OrderView {
    OrderView {
        status,
        payment_status: payment,
        payment_retries: retries,
    }
}

fn apply(sm: &StateMachine, view: &OrderView, event: OrderEvent) -> TransitionOutcome {
    sm.apply(view, event).expect("transition should be legal")
}

#[test]
fn full_happy_path_from_checkout_to_delivery() {
    let sm = StateMachine::new(3);
    let mut status = OrderStatus::Pending;
    let mut payment = PaymentStatus::Pending;

    let script = [
        OrderEvent::PaymentConfirmed,
        OrderEvent::RestaurantAccept,
        OrderEvent::Ready,
        OrderEvent::DriverPickup,
        OrderEvent::DeliveredConfirm,
    ];
    for event in script {
        match apply(&sm, &view(status, payment, 0), event) {
            TransitionOutcome::Applied(t) => {
                status = t.next;
                if let Some(p) = t.payment_status {
                    payment = p;
                }
            }
            other => panic!("expected applied transition, got {other:?}"),
        }
    }

    assert_eq!(status, OrderStatus::Delivered);
    assert_eq!(payment, PaymentStatus::Completed);
}

#[test]
fn delivery_is_the_only_transition_that_commits_loyalty() {
    let sm = StateMachine::new(3);
    let statuses = [
        (OrderStatus::Pending, OrderEvent::PaymentConfirmed),
        (OrderStatus::Confirmed, OrderEvent::RestaurantAccept),
        (OrderStatus::Preparing, OrderEvent::Ready),
        (OrderStatus::ReadyForPickup, OrderEvent::DriverPickup),
        (OrderStatus::OutForDelivery, OrderEvent::DeliveredConfirm),
    ];
    let mut commits = 0;
    for (status, event) in statuses {
        if let TransitionOutcome::Applied(t) =
            apply(&sm, &view(status, PaymentStatus::Completed, 0), event)
        {
            commits += t
                .effects
                .iter()
                .filter(|e| **e == SideEffect::CommitLoyaltyAccrual)
                .count();
        }
    }
    assert_eq!(commits, 1);
}

#[test]
fn expired_intent_path_reaches_payment_timeout_cancellation() {
    // Three expiry-driven failures exhaust the retry budget and cancel
    // the order with reason payment_timeout.
    let sm = StateMachine::new(3);
    let mut retries = 0;
    let mut status = OrderStatus::Pending;
    let mut reason = None;

    for _ in 0..3 {
        match apply(
            &sm,
            &view(status, PaymentStatus::Pending, retries),
            OrderEvent::PaymentFailed,
        ) {
            TransitionOutcome::Applied(t) => {
                status = t.next;
                reason = t.cancellation_reason;
                retries += 1;
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        if status == OrderStatus::Cancelled {
            break;
        }
    }

    assert_eq!(status, OrderStatus::Cancelled);
    assert_eq!(reason, Some("payment_timeout"));
    // The first two failures requeued a payment attempt.
    assert_eq!(retries, 3);
}

#[test]
fn cancel_confirm_race_refunds_instead_of_reviving() {
    // admin_cancel wins the per-order lock; the payment_confirmed loser
    // replays against the cancelled state and produces a refund, never a
    // confirmed order.
    let sm = StateMachine::new(3);

    // admin_cancel on the pending order wins first.
    let cancelled = match apply(
        &sm,
        &view(OrderStatus::Pending, PaymentStatus::Pending, 0),
        OrderEvent::AdminCancel,
    ) {
        TransitionOutcome::Applied(t) => t,
        other => panic!("unexpected outcome {other:?}"),
    };
    assert_eq!(cancelled.next, OrderStatus::Cancelled);
    // Payment had not completed yet, so no refund on this leg.
    assert!(!cancelled.effects.contains(&SideEffect::EnqueueRefund));

    // The delayed payment_confirmed now replays against cancelled.
    match apply(
        &sm,
        &view(OrderStatus::Cancelled, PaymentStatus::Pending, 0),
        OrderEvent::PaymentConfirmed,
    ) {
        TransitionOutcome::Applied(t) => {
            assert_eq!(t.next, OrderStatus::Cancelled);
            assert_eq!(t.payment_status, Some(PaymentStatus::Completed));
            assert_eq!(t.effects, vec![SideEffect::EnqueueRefund]);
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    // Replaying the same confirmation after the refund settled changes
    // nothing further.
    let after_refund = view(OrderStatus::Cancelled, PaymentStatus::Refunded, 0);
    assert_eq!(
        sm.apply(&after_refund, OrderEvent::PaymentConfirmed).unwrap(),
        TransitionOutcome::Discarded
    );
}

#[test]
fn every_unlisted_pair_is_rejected_without_state_change() {
    let sm = StateMachine::new(3);
    let statuses = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Preparing,
        OrderStatus::ReadyForPickup,
        OrderStatus::OutForDelivery,
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

    // The listed table rows, per non-terminal status.
    let legal: &[(OrderStatus, OrderEvent)] = &[
        (OrderStatus::Pending, OrderEvent::PaymentConfirmed),
        (OrderStatus::Pending, OrderEvent::PaymentFailed),
        (OrderStatus::Pending, OrderEvent::UserCancel),
        (OrderStatus::Confirmed, OrderEvent::RestaurantAccept),
        (OrderStatus::Preparing, OrderEvent::Ready),
        (OrderStatus::ReadyForPickup, OrderEvent::DriverPickup),
        (OrderStatus::OutForDelivery, OrderEvent::DeliveredConfirm),
    ];

    for status in statuses {
        for event in events {
            let always_legal = matches!(
                event,
                OrderEvent::AdminCancel | OrderEvent::RestaurantReject
            );
            let listed = legal.contains(&(status, event));
            let result = sm.apply(&view(status, PaymentStatus::Pending, 0), event);
            if listed || always_legal {
                assert!(result.is_ok(), "{status}/{event} should be legal");
            } else {
                assert!(
                    matches!(result, Err(TransitionError::InvalidTransition { .. })),
                    "{status}/{event} should be rejected"
                );
            }
        }
    }
}

#[test]
fn terminal_states_absorb_every_late_event() {
    let sm = StateMachine::new(3);
    let events = [
        OrderEvent::PaymentFailed,
        OrderEvent::UserCancel,
        OrderEvent::RestaurantAccept,
        OrderEvent::Ready,
        OrderEvent::DriverPickup,
        OrderEvent::DeliveredConfirm,
        OrderEvent::AdminCancel,
        OrderEvent::RestaurantReject,
    ];
    for event in events {
        assert_eq!(
            sm.apply(
                &view(OrderStatus::Delivered, PaymentStatus::Completed, 0),
                event
            )
            .unwrap(),
            TransitionOutcome::Discarded,
            "delivered order must absorb {event}"
        );
        assert_eq!(
            sm.apply(
                &view(OrderStatus::Cancelled, PaymentStatus::Failed, 0),
                event
            )
            .unwrap(),
            TransitionOutcome::Discarded,
            "cancelled order must absorb {event}"
        );
    }
}
