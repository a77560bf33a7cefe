//! Settlement Orchestrator
//!
//! The single entry point for every external trigger that can move an
//! order: checkout, gateway callbacks, user/admin/restaurant actions,
//! fulfillment progress and the intent-expiry sweep. Each invocation opens
//! one database transaction, takes the per-order row lock, consults the
//! idempotency ledger, applies the transition table and runs its side
//! effects — then commits and emits the transition notification. No
//! component below this one ever owns a transaction boundary.

use regex::Regex;
use sha2::{Digest, Sha256};
use sqlx::{PgConnection, PgPool};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::database::callback_repository::{callback_outcome, CallbackRepository};
use crate::database::intent_repository::{intent_status, IntentRepository, PaymentIntent};
use crate::database::order_repository::{NewOrder, Order, OrderRepository};
use crate::database::promotion_repository::PromotionRepository;
use crate::database::refund_repository::RefundRepository;
use crate::error::{
    AppError, AppErrorKind, AppResult, DomainError, InfrastructureError, ValidationError,
};
use crate::gateways::{
    CallbackPayload, GatewayFactory, GatewayName, InitiateRequest,
};
use crate::money::Money;
use crate::orders::{
    OrderEvent, OrderStatus, PaymentStatus, SideEffect, StateMachine, Transition,
    TransitionOutcome,
};
use crate::services::notification::NotificationService;
use crate::services::rewards::RewardsCoordinator;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// How long a payment intent may wait for its callback.
    pub intent_ttl_secs: i64,
    /// Where the customer lands after paying.
    pub return_url: String,
    /// Base URL the providers post callbacks to; `/webhooks/{provider}` is
    /// appended per intent.
    pub ipn_base_url: String,
    pub max_payment_retries: i32,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            intent_ttl_secs: 900,
            return_url: "http://localhost:8000/payment/return".to_string(),
            ipn_base_url: "http://localhost:8000".to_string(),
            max_payment_retries: 3,
        }
    }
}

impl SettlementConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            intent_ttl_secs: std::env::var("PAYMENT_INTENT_TTL_SECS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(defaults.intent_ttl_secs),
            return_url: std::env::var("PAYMENT_RETURN_URL").unwrap_or(defaults.return_url),
            ipn_base_url: std::env::var("PAYMENT_IPN_BASE_URL").unwrap_or(defaults.ipn_base_url),
            max_payment_retries: std::env::var("MAX_PAYMENT_RETRIES")
                .ok()
                .and_then(|v| v.parse::<i32>().ok())
                .unwrap_or(defaults.max_payment_retries),
        }
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CheckoutItem {
    pub name: String,
    /// Decimal string; parsed exactly into minor units.
    pub unit_price: String,
    pub quantity: u32,
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub user_id: Uuid,
    pub restaurant_id: Uuid,
    pub items: Vec<CheckoutItem>,
    pub payment_method: String,
    pub promotion_code: Option<String>,
    pub client_ip: String,
}

#[derive(Debug, Clone)]
pub struct CheckoutReceipt {
    pub order_id: Uuid,
    pub redirect_url: Option<String>,
    pub subtotal_amount: i64,
    pub discount_amount: i64,
    pub total_amount: i64,
}

/// Who asked for a cancellation; decides which table row applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelActor {
    User,
    Admin,
    Restaurant,
}

impl CancelActor {
    fn event(&self) -> OrderEvent {
        match self {
            CancelActor::User => OrderEvent::UserCancel,
            CancelActor::Admin => OrderEvent::AdminCancel,
            CancelActor::Restaurant => OrderEvent::RestaurantReject,
        }
    }
}

/// What a callback invocation did, relayed to the webhook handler so it can
/// produce the provider-specific acknowledgement.
#[derive(Debug, Clone)]
pub enum SettlementOutcome {
    Applied { order: Order },
    IgnoredDuplicate,
    RejectedInvalidSignature,
    NeedsReconciliation { expected: i64, received: i64 },
    DiscardedTerminal,
    /// Authentic event inapplicable to the order's current state (e.g. a
    /// stale intent failing after another intent already confirmed).
    /// Recorded and acknowledged so the provider stops retrying.
    DiscardedStale,
    UnknownReference,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct SettlementOrchestrator {
    pool: PgPool,
    gateways: Arc<GatewayFactory>,
    state_machine: StateMachine,
    rewards: RewardsCoordinator,
    notifier: NotificationService,
    orders: OrderRepository,
    intents: IntentRepository,
    promotions: PromotionRepository,
    refunds: RefundRepository,
    config: SettlementConfig,
    promo_code_format: Regex,
}

impl SettlementOrchestrator {
    pub fn new(
        pool: PgPool,
        gateways: Arc<GatewayFactory>,
        rewards: RewardsCoordinator,
        config: SettlementConfig,
    ) -> Self {
        Self {
            orders: OrderRepository::new(pool.clone()),
            intents: IntentRepository::new(pool.clone()),
            promotions: PromotionRepository::new(pool.clone()),
            refunds: RefundRepository::new(pool.clone()),
            state_machine: StateMachine::new(config.max_payment_retries),
            notifier: NotificationService::new(),
            pool,
            gateways,
            rewards,
            // Uppercase alphanumeric plus separators, 3..=32 chars.
            promo_code_format: Regex::new(r"^[A-Z0-9][A-Z0-9_-]{2,31}$")
                .expect("promo code pattern is valid"),
            config,
        }
    }

    pub fn refund_repository(&self) -> &RefundRepository {
        &self.refunds
    }

    pub fn order_repository(&self) -> &OrderRepository {
        &self.orders
    }

    // =======================================================================
    // Checkout
    // =======================================================================

    /// Create an order and its first payment intent, returning the redirect
    /// URL for online providers.
    ///
    /// The gateway `initiate` call runs after the creating transaction has
    /// committed so no outbound HTTP ever happens under a database lock. A
    /// failed initiate leaves the order `pending` with a failed intent; the
    /// customer can retry payment.
    pub async fn create_order(&self, request: CheckoutRequest) -> AppResult<CheckoutReceipt> {
        let provider = GatewayName::from_str(&request.payment_method).map_err(|_| {
            AppError::new(AppErrorKind::Validation(ValidationError::InvalidProvider {
                provider: request.payment_method.clone(),
            }))
        })?;

        if request.items.is_empty() {
            return Err(AppError::new(AppErrorKind::Validation(
                ValidationError::MissingField {
                    field: "items".to_string(),
                },
            )));
        }

        let mut subtotal = Money::ZERO;
        for item in &request.items {
            if item.quantity == 0 {
                return Err(AppError::new(AppErrorKind::Validation(
                    ValidationError::OutOfRange {
                        field: "quantity".to_string(),
                        reason: format!("item {:?} has zero quantity", item.name),
                    },
                )));
            }
            let line = Money::parse(&item.unit_price)?.multiply(item.quantity)?;
            subtotal = subtotal.checked_add(line)?;
        }
        if subtotal.is_zero() {
            return Err(AppError::new(AppErrorKind::Domain(
                DomainError::InvalidAmount {
                    reason: "order total must be positive".to_string(),
                },
            )));
        }

        // Cart-time promotion validation: limits are checked but nothing is
        // consumed until the payment actually settles.
        let discount = match request.promotion_code.as_deref() {
            Some(code) => self.cart_time_discount(code, subtotal).await?,
            None => Money::ZERO,
        };
        let total = subtotal.checked_sub(discount)?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let order = OrderRepository::create(
            tx.as_mut(),
            &NewOrder {
                user_id: request.user_id,
                restaurant_id: request.restaurant_id,
                payment_method: provider.as_str().to_string(),
                subtotal_amount: subtotal.minor(),
                discount_amount: discount.minor(),
                total_amount: total.minor(),
                promotion_code: request.promotion_code.clone(),
            },
        )
        .await?;
        let intent = IntentRepository::create(
            tx.as_mut(),
            order.id,
            provider.as_str(),
            total.minor(),
            self.config.intent_ttl_secs,
        )
        .await?;

        // Cash orders are accepted on the spot: the state machine runs its
        // payment_confirmed row now, with the payment axis held at pending
        // until the driver collects at the door.
        if provider.is_cash() {
            let (updated, transition) = self
                .apply_event(tx.as_mut(), &order, OrderEvent::PaymentConfirmed, None)
                .await?;
            let updated = match force_payment_pending(tx.as_mut(), &updated).await? {
                Some(o) => o,
                None => updated,
            };
            IntentRepository::mark_status(tx.as_mut(), intent.id, intent_status::AWAITING_CALLBACK)
                .await?;
            tx.commit().await.map_err(db_err)?;
            if let Some(t) = transition {
                self.notify_if_changed(&order, &t);
            }
            info!(order_id = %updated.id, "cash order accepted");
            return Ok(CheckoutReceipt {
                order_id: updated.id,
                redirect_url: None,
                subtotal_amount: subtotal.minor(),
                discount_amount: discount.minor(),
                total_amount: total.minor(),
            });
        }

        tx.commit().await.map_err(db_err)?;

        let gateway = self.gateways.get(provider)?;
        let initiated = gateway
            .initiate(InitiateRequest {
                order_id: order.id,
                transaction_reference: intent.id.to_string(),
                amount: total,
                order_info: format!("Order {}", order.id),
                return_url: self.config.return_url.clone(),
                ipn_url: format!("{}/webhooks/{}", self.config.ipn_base_url, provider),
                client_ip: request.client_ip.clone(),
            })
            .await;

        match initiated {
            Ok(payment) => {
                self.intents
                    .mark_awaiting_callback(intent.id, &payment.provider_transaction_ref)
                    .await?;
                info!(
                    order_id = %order.id,
                    provider = %provider,
                    total = total.minor(),
                    "order created, awaiting payment"
                );
                Ok(CheckoutReceipt {
                    order_id: order.id,
                    redirect_url: payment.redirect_url,
                    subtotal_amount: subtotal.minor(),
                    discount_amount: discount.minor(),
                    total_amount: total.minor(),
                })
            }
            Err(e) => {
                // The order survives in pending so the customer can retry;
                // only this intent is burned.
                warn!(order_id = %order.id, error = %e, "payment initiation failed");
                let mut conn = self.pool.acquire().await.map_err(db_err)?;
                IntentRepository::mark_status(conn.as_mut(), intent.id, intent_status::FAILED)
                    .await?;
                Err(e.into())
            }
        }
    }

    /// Re-open collection for a pending order after a failed or expired
    /// attempt.
    ///
    /// Reuses the newest never-initiated intent when one exists (the retry
    /// scheduler creates those); otherwise opens a fresh one, since
    /// providers reject re-initiating an already-presented reference.
    pub async fn retry_payment(&self, order_id: Uuid, client_ip: &str) -> AppResult<CheckoutReceipt> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let order = OrderRepository::lock_by_id(tx.as_mut(), order_id)
            .await?
            .ok_or_else(|| order_not_found(order_id))?;
        if order.status() != Some(OrderStatus::Pending) {
            return Err(AppError::new(AppErrorKind::Domain(
                DomainError::InvalidTransition {
                    status: order.status.clone(),
                    event: "retry_payment".to_string(),
                },
            )));
        }
        let provider = GatewayName::from_str(&order.payment_method)?;
        if provider.is_cash() {
            return Err(AppError::new(AppErrorKind::Validation(
                ValidationError::InvalidProvider {
                    provider: order.payment_method.clone(),
                },
            )));
        }

        let latest = IntentRepository::find_latest_for_order(tx.as_mut(), order.id).await?;
        let intent = match latest {
            Some(intent)
                if intent.status == intent_status::INITIATED
                    && intent.expires_at > chrono::Utc::now() =>
            {
                intent
            }
            _ => {
                IntentRepository::create(
                    tx.as_mut(),
                    order.id,
                    provider.as_str(),
                    order.total_amount,
                    self.config.intent_ttl_secs,
                )
                .await?
            }
        };
        tx.commit().await.map_err(db_err)?;

        let gateway = self.gateways.get(provider)?;
        let total = Money::from_minor(order.total_amount)?;
        match gateway
            .initiate(InitiateRequest {
                order_id: order.id,
                transaction_reference: intent.id.to_string(),
                amount: total,
                order_info: format!("Order {}", order.id),
                return_url: self.config.return_url.clone(),
                ipn_url: format!("{}/webhooks/{}", self.config.ipn_base_url, provider),
                client_ip: client_ip.to_string(),
            })
            .await
        {
            Ok(payment) => {
                self.intents
                    .mark_awaiting_callback(intent.id, &payment.provider_transaction_ref)
                    .await?;
                info!(order_id = %order.id, provider = %provider, "payment retry initiated");
                Ok(CheckoutReceipt {
                    order_id: order.id,
                    redirect_url: payment.redirect_url,
                    subtotal_amount: order.subtotal_amount,
                    discount_amount: order.discount_amount,
                    total_amount: order.total_amount,
                })
            }
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "payment retry initiation failed");
                let mut conn = self.pool.acquire().await.map_err(db_err)?;
                IntentRepository::mark_status(conn.as_mut(), intent.id, intent_status::FAILED)
                    .await?;
                Err(e.into())
            }
        }
    }

    async fn cart_time_discount(&self, code: &str, subtotal: Money) -> AppResult<Money> {
        if !self.promo_code_format.is_match(code) {
            return Err(AppError::new(AppErrorKind::Validation(
                ValidationError::InvalidPromotionCode {
                    code: code.to_string(),
                },
            )));
        }
        let promotion = self
            .promotions
            .find_by_code(code)
            .await?
            .filter(|p| p.is_live(chrono::Utc::now()))
            .ok_or_else(|| {
                AppError::new(AppErrorKind::Domain(DomainError::PromotionNotFound {
                    code: code.to_string(),
                }))
            })?;
        if promotion.current_redemptions >= promotion.usage_limit {
            return Err(AppError::new(AppErrorKind::Domain(
                DomainError::PromotionExhausted {
                    code: code.to_string(),
                },
            )));
        }
        Ok(self.rewards.compute_discount(&promotion, subtotal)?)
    }

    // =======================================================================
    // Gateway callbacks
    // =======================================================================

    /// The webhook pipeline: verify, ledger, reconcile, transition — one
    /// transaction, under the order lock.
    pub async fn handle_callback(
        &self,
        provider: GatewayName,
        payload: CallbackPayload,
    ) -> AppResult<SettlementOutcome> {
        let gateway = self.gateways.get(provider)?;
        let verification = gateway.verify_callback(&payload);

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        if !verification.valid {
            // Kept for audit under a payload-derived key so a forged payload
            // can never consume the genuine event's idempotency slot.
            let key = format!(
                "{}:invalid:{}",
                provider,
                payload_fingerprint(&payload)
            );
            CallbackRepository::record(
                tx.as_mut(),
                &key,
                provider.as_str(),
                &payload.fields,
                false,
                callback_outcome::REJECTED_INVALID_SIGNATURE,
            )
            .await?;
            tx.commit().await.map_err(db_err)?;
            warn!(
                provider = %provider,
                reason = verification.reason.as_deref().unwrap_or("unknown"),
                "callback rejected: invalid signature"
            );
            return Ok(SettlementOutcome::RejectedInvalidSignature);
        }

        let Some(provider_ref) = verification.provider_transaction_ref.clone() else {
            warn!(provider = %provider, "valid callback without a transaction reference");
            return Ok(SettlementOutcome::UnknownReference);
        };

        let Some(intent) =
            IntentRepository::find_by_provider_ref(tx.as_mut(), provider.as_str(), &provider_ref)
                .await?
        else {
            warn!(provider = %provider, provider_ref = %provider_ref, "callback for unknown intent");
            return Ok(SettlementOutcome::UnknownReference);
        };

        // Order row first, then the intent: every writer takes locks in this
        // order, so the callback path and the expiry sweep cannot deadlock.
        let order = OrderRepository::lock_by_id(tx.as_mut(), intent.order_id)
            .await?
            .ok_or_else(|| internal(format!("intent {} references missing order", intent.id)))?;
        let intent = IntentRepository::lock_by_id(tx.as_mut(), intent.id)
            .await?
            .ok_or_else(|| internal(format!("intent vanished for order {}", order.id)))?;

        // Insert-if-absent inside this same transaction: exactly one
        // delivery of this event can ever see is_new.
        let key = CallbackRepository::idempotency_key(provider.as_str(), &provider_ref, "payment");
        let recorded = CallbackRepository::record(
            tx.as_mut(),
            &key,
            provider.as_str(),
            &payload.fields,
            true,
            callback_outcome::APPLIED,
        )
        .await?;
        if !recorded.is_new {
            tx.commit().await.map_err(db_err)?;
            info!(provider = %provider, provider_ref = %provider_ref, "duplicate callback ignored");
            return Ok(SettlementOutcome::IgnoredDuplicate);
        }

        // A successful charge whose amount disagrees with the order is a
        // reconciliation case, never a silent success.
        if verification.success {
            let received = verification.amount.map(|a| a.minor()).unwrap_or(-1);
            if received != order.total_amount {
                OrderRepository::flag_needs_reconciliation(tx.as_mut(), order.id).await?;
                tx.commit().await.map_err(db_err)?;
                error!(
                    order_id = %order.id,
                    expected = order.total_amount,
                    received,
                    "amount mismatch, order flagged for manual reconciliation"
                );
                return Ok(SettlementOutcome::NeedsReconciliation {
                    expected: order.total_amount,
                    received,
                });
            }
        }

        let event = if verification.success {
            OrderEvent::PaymentConfirmed
        } else {
            OrderEvent::PaymentFailed
        };

        let view = order
            .view()
            .ok_or_else(|| internal(format!("order {} has corrupt status columns", order.id)))?;
        match self.state_machine.apply(&view, event) {
            Ok(TransitionOutcome::Discarded) => {
                tx.commit().await.map_err(db_err)?;
                debug!(order_id = %order.id, event = %event, "event discarded in terminal state");
                Ok(SettlementOutcome::DiscardedTerminal)
            }
            Ok(TransitionOutcome::Applied(transition)) => {
                // The intent only changes state once the transition is
                // accepted; a second confirmed intent for the same order
                // would trip the one-confirmed-per-order constraint.
                IntentRepository::mark_status(
                    tx.as_mut(),
                    intent.id,
                    if verification.success {
                        intent_status::CONFIRMED
                    } else {
                        intent_status::FAILED
                    },
                )
                .await?;
                let updated = self
                    .persist_transition(tx.as_mut(), &order, &intent, event, &transition, None)
                    .await?;
                tx.commit().await.map_err(db_err)?;
                self.notify_if_changed(&order, &transition);
                info!(
                    order_id = %updated.id,
                    provider = %provider,
                    event = %event,
                    status = %updated.status,
                    "callback settled"
                );
                Ok(SettlementOutcome::Applied { order: updated })
            }
            Err(e) => {
                // Authentic but inapplicable: keep the ledger row, leave the
                // order alone, acknowledge so the provider stops retrying.
                tx.commit().await.map_err(db_err)?;
                warn!(
                    order_id = %order.id,
                    event = %event,
                    error = %e,
                    "stale callback discarded"
                );
                Ok(SettlementOutcome::DiscardedStale)
            }
        }
    }

    // =======================================================================
    // User / operator actions
    // =======================================================================

    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        actor: CancelActor,
        reason: Option<&str>,
    ) -> AppResult<Order> {
        self.drive_order_event(order_id, actor.event(), reason).await
    }

    /// Fulfillment progress: restaurant_accept, ready, driver_pickup,
    /// delivered_confirm.
    pub async fn mark_progress(&self, order_id: Uuid, event: OrderEvent) -> AppResult<Order> {
        self.drive_order_event(order_id, event, None).await
    }

    /// Post-delivery rating; any other state is rejected.
    pub async fn rate_order(
        &self,
        order_id: Uuid,
        rating: i32,
        comment: Option<&str>,
    ) -> AppResult<Order> {
        if !(1..=5).contains(&rating) {
            return Err(AppError::new(AppErrorKind::Validation(
                ValidationError::OutOfRange {
                    field: "rating".to_string(),
                    reason: "must be between 1 and 5".to_string(),
                },
            )));
        }
        let order = self
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| order_not_found(order_id))?;
        if order.status() != Some(OrderStatus::Delivered) {
            return Err(AppError::new(AppErrorKind::Domain(
                DomainError::OrderNotRateable {
                    status: order.status.clone(),
                },
            )));
        }
        Ok(self.orders.set_rating(order_id, rating, comment).await?)
    }

    async fn drive_order_event(
        &self,
        order_id: Uuid,
        event: OrderEvent,
        reason: Option<&str>,
    ) -> AppResult<Order> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let order = OrderRepository::lock_by_id(tx.as_mut(), order_id)
            .await?
            .ok_or_else(|| order_not_found(order_id))?;

        // The driver reporting delivery of a cash order *is* the explicit
        // cash-collection event. The payment axis completes before the
        // delivery transition so its loyalty side effect sees a paid order.
        let order = if event == OrderEvent::DeliveredConfirm
            && order.payment_method == GatewayName::Cod.as_str()
            && order.payment_status() == Some(PaymentStatus::Pending)
            && order.status() == Some(OrderStatus::OutForDelivery)
        {
            self.collect_cash(tx.as_mut(), &order).await?
        } else {
            order
        };

        let (updated, transition) = self.apply_event(tx.as_mut(), &order, event, reason).await?;

        tx.commit().await.map_err(db_err)?;
        if let Some(t) = transition {
            self.notify_if_changed(&order, &t);
        }
        Ok(updated)
    }

    /// Mark cash collected: payment completed, intent confirmed.
    async fn collect_cash(&self, conn: &mut PgConnection, order: &Order) -> AppResult<Order> {
        let updated = OrderRepository::apply_transition(
            conn,
            order.id,
            order.status().unwrap_or(OrderStatus::OutForDelivery),
            Some(PaymentStatus::Completed),
            None,
            false,
        )
        .await?;
        if let Some(intent) = IntentRepository::find_latest_for_order(conn, order.id).await? {
            IntentRepository::mark_status(conn, intent.id, intent_status::CONFIRMED).await?;
        }
        info!(order_id = %order.id, "cash collected on delivery");
        Ok(updated)
    }

    // =======================================================================
    // Expiry sweep
    // =======================================================================

    /// Convert expired awaiting intents into `payment_failed` events.
    ///
    /// Idempotent and safe from multiple instances: every candidate is
    /// re-checked under the order lock, and the transition table decides
    /// whether the order retries or cancels. Returns how many intents were
    /// expired.
    pub async fn expire_intents(&self, batch_size: i64) -> AppResult<usize> {
        let candidates = self.intents.find_expired_awaiting(batch_size).await?;
        let mut expired = 0;
        for candidate in candidates {
            match self.expire_one(&candidate).await {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(e) => {
                    // One bad order must not wedge the sweep.
                    error!(
                        intent_id = %candidate.id,
                        order_id = %candidate.order_id,
                        error = %e,
                        "failed to expire intent"
                    );
                }
            }
        }
        Ok(expired)
    }

    async fn expire_one(&self, candidate: &PaymentIntent) -> AppResult<bool> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let Some(order) = OrderRepository::lock_by_id(tx.as_mut(), candidate.order_id).await?
        else {
            return Ok(false);
        };
        // Re-check under the lock: a callback may have settled the intent
        // between the sweep's read and now.
        let Some(intent) = IntentRepository::lock_by_id(tx.as_mut(), candidate.id).await? else {
            return Ok(false);
        };
        let still_waiting = intent.status == intent_status::INITIATED
            || intent.status == intent_status::AWAITING_CALLBACK;
        if !still_waiting || intent.expires_at > chrono::Utc::now() {
            return Ok(false);
        }

        IntentRepository::mark_status(tx.as_mut(), intent.id, intent_status::EXPIRED).await?;
        // Only pending orders are driven through payment_failed; an expired
        // leftover intent on an already-settled order just gets closed.
        let transition = if order.status() == Some(OrderStatus::Pending) {
            self.apply_event(tx.as_mut(), &order, OrderEvent::PaymentFailed, None)
                .await?
                .1
        } else {
            None
        };
        tx.commit().await.map_err(db_err)?;
        if let Some(t) = transition {
            self.notify_if_changed(&order, &t);
        }
        info!(
            order_id = %order.id,
            intent_id = %intent.id,
            "expired payment intent processed"
        );
        Ok(true)
    }

    // =======================================================================
    // Shared transition plumbing
    // =======================================================================

    /// Run `event` against `order` inside the caller's transaction and
    /// persist the result. Returns the updated order and the transition, if
    /// one was applied (terminal discards return the order untouched).
    async fn apply_event(
        &self,
        conn: &mut PgConnection,
        order: &Order,
        event: OrderEvent,
        reason_override: Option<&str>,
    ) -> AppResult<(Order, Option<Transition>)> {
        let view = order
            .view()
            .ok_or_else(|| internal(format!("order {} has corrupt status columns", order.id)))?;
        match self.state_machine.apply(&view, event)? {
            TransitionOutcome::Discarded => {
                debug!(order_id = %order.id, event = %event, "event discarded in terminal state");
                Ok((order.clone(), None))
            }
            TransitionOutcome::Applied(transition) => {
                let intent = IntentRepository::find_confirmed_for_order(conn, order.id).await?;
                let intent = match intent {
                    Some(i) => Some(i),
                    None => IntentRepository::find_latest_for_order(conn, order.id).await?,
                };
                let updated = match intent {
                    Some(ref intent) => {
                        self.persist_transition(
                            conn,
                            order,
                            intent,
                            event,
                            &transition,
                            reason_override,
                        )
                        .await?
                    }
                    None => {
                        // Orders always carry at least one intent; tolerate
                        // its absence rather than wedging the order.
                        warn!(order_id = %order.id, "order has no payment intent");
                        self.persist_without_intent(conn, order, event, &transition, reason_override)
                            .await?
                    }
                };
                Ok((updated, Some(transition)))
            }
        }
    }

    async fn persist_without_intent(
        &self,
        conn: &mut PgConnection,
        order: &Order,
        event: OrderEvent,
        transition: &Transition,
        reason_override: Option<&str>,
    ) -> AppResult<Order> {
        let updated = OrderRepository::apply_transition(
            conn,
            order.id,
            transition.next,
            transition.payment_status,
            reason_override.or(transition.cancellation_reason),
            event == OrderEvent::PaymentFailed,
        )
        .await?;
        for effect in &transition.effects {
            if matches!(effect, SideEffect::EnqueueRefund | SideEffect::SchedulePaymentRetry) {
                continue; // both need an intent
            }
            self.run_effect(conn, &updated, *effect).await?;
        }
        Ok(updated)
    }

    async fn persist_transition(
        &self,
        conn: &mut PgConnection,
        order: &Order,
        intent: &PaymentIntent,
        event: OrderEvent,
        transition: &Transition,
        reason_override: Option<&str>,
    ) -> AppResult<Order> {
        let updated = OrderRepository::apply_transition(
            conn,
            order.id,
            transition.next,
            transition.payment_status,
            reason_override.or(transition.cancellation_reason),
            event == OrderEvent::PaymentFailed,
        )
        .await?;

        for effect in &transition.effects {
            match effect {
                SideEffect::EnqueueRefund => {
                    if let Some(refund) = RefundRepository::enqueue(
                        conn,
                        updated.id,
                        intent.id,
                        &intent.provider,
                        updated.total_amount,
                    )
                    .await?
                    {
                        info!(
                            order_id = %updated.id,
                            refund_id = %refund.id,
                            amount = refund.amount,
                            "refund enqueued"
                        );
                    }
                }
                SideEffect::SchedulePaymentRetry => {
                    let fresh = IntentRepository::create(
                        conn,
                        updated.id,
                        &intent.provider,
                        updated.total_amount,
                        self.config.intent_ttl_secs,
                    )
                    .await?;
                    info!(
                        order_id = %updated.id,
                        intent_id = %fresh.id,
                        retry = updated.payment_retries,
                        "payment retry scheduled"
                    );
                }
                other => self.run_effect(conn, &updated, *other).await?,
            }
        }
        Ok(updated)
    }

    async fn run_effect(
        &self,
        conn: &mut PgConnection,
        order: &Order,
        effect: SideEffect,
    ) -> AppResult<()> {
        match effect {
            SideEffect::FinalizePromotion => {
                // Non-fatal by contract: the order settles either way.
                let outcome = self.rewards.finalize_promotion(conn, order).await?;
                debug!(order_id = %order.id, ?outcome, "promotion finalization");
            }
            SideEffect::ScheduleLoyaltyAccrual => {
                // Eligibility is implied by the confirmed transition; the
                // ledger row is written at delivery.
                debug!(order_id = %order.id, "loyalty accrual scheduled for delivery");
            }
            SideEffect::CommitLoyaltyAccrual => {
                if order.payment_status() == Some(PaymentStatus::Completed) {
                    let outcome = self.rewards.accrue_loyalty(conn, order).await?;
                    debug!(order_id = %order.id, ?outcome, "loyalty accrual");
                } else {
                    debug!(order_id = %order.id, "delivery without completed payment, no accrual");
                }
            }
            SideEffect::ReleasePromotion => {
                self.rewards.release_promotion(conn, order).await?;
            }
            SideEffect::EnqueueRefund | SideEffect::SchedulePaymentRetry => {
                // Handled in persist_transition, where the intent is known.
            }
        }
        Ok(())
    }

    fn notify_if_changed(&self, before: &Order, transition: &Transition) {
        if let Some(old) = before.status() {
            if old != transition.next {
                self.notifier
                    .order_transitioned(before.id, old, transition.next);
            }
        }
    }
}

/// Pin the payment axis back to pending after the COD acceptance transition
/// (the table row sets completed for gateway payments; cash is uncollected
/// at acceptance time).
async fn force_payment_pending(
    conn: &mut PgConnection,
    order: &Order,
) -> Result<Option<Order>, crate::database::error::DatabaseError> {
    if order.payment_status() == Some(PaymentStatus::Pending) {
        return Ok(None);
    }
    let status = order.status().unwrap_or(OrderStatus::Confirmed);
    OrderRepository::apply_transition(
        conn,
        order.id,
        status,
        Some(PaymentStatus::Pending),
        None,
        false,
    )
    .await
    .map(Some)
}

fn payload_fingerprint(payload: &CallbackPayload) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.fields.to_string().as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

fn db_err(err: sqlx::Error) -> AppError {
    crate::database::error::DatabaseError::from_sqlx(err).into()
}

fn internal(message: String) -> AppError {
    AppError::new(AppErrorKind::Infrastructure(
        InfrastructureError::Configuration { message },
    ))
}

fn order_not_found(order_id: Uuid) -> AppError {
    AppError::new(AppErrorKind::Domain(DomainError::OrderNotFound {
        order_id: order_id.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_fingerprint_distinguishes_payloads() {
        let a = CallbackPayload::new(serde_json::json!({"amount": 1000}));
        let b = CallbackPayload::new(serde_json::json!({"amount": 1001}));
        assert_ne!(payload_fingerprint(&a), payload_fingerprint(&b));
        assert_eq!(payload_fingerprint(&a), payload_fingerprint(&a));
        assert_eq!(payload_fingerprint(&a).len(), 32);
    }

    #[test]
    fn cancel_actor_maps_to_table_events() {
        assert_eq!(CancelActor::User.event(), OrderEvent::UserCancel);
        assert_eq!(CancelActor::Admin.event(), OrderEvent::AdminCancel);
        assert_eq!(CancelActor::Restaurant.event(), OrderEvent::RestaurantReject);
    }

    #[test]
    fn settlement_config_defaults_are_sane() {
        let config = SettlementConfig::default();
        assert_eq!(config.intent_ttl_secs, 900);
        assert_eq!(config.max_payment_retries, 3);
    }
}
