//! Order endpoints: checkout, lifecycle actions, rating.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::ApiState;
use crate::database::order_repository::Order;
use crate::error::{AppError, AppErrorKind, ValidationError};
use crate::middleware::error::ErrorResponse;
use crate::orders::OrderEvent;
use crate::services::settlement::{CancelActor, CheckoutItem, CheckoutRequest};

#[derive(Debug, Deserialize)]
pub struct CreateOrderBody {
    pub user_id: Uuid,
    pub restaurant_id: Uuid,
    pub items: Vec<CreateOrderItem>,
    pub payment_method: String,
    pub promotion_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderItem {
    pub name: String,
    pub unit_price: String,
    pub quantity: u32,
}

#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub order_id: Uuid,
    pub redirect_url: Option<String>,
    pub subtotal_amount: i64,
    pub discount_amount: i64,
    pub total_amount: i64,
}

#[derive(Debug, Deserialize)]
pub struct CancelOrderBody {
    pub actor: String,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OrderEventBody {
    pub event: String,
}

#[derive(Debug, Deserialize)]
pub struct RateOrderBody {
    pub rating: i32,
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub restaurant_id: Uuid,
    pub status: String,
    pub payment_method: String,
    pub payment_status: String,
    pub subtotal_amount: i64,
    pub discount_amount: i64,
    pub total_amount: i64,
    pub promotion_code: Option<String>,
    pub cancellation_reason: Option<String>,
    pub needs_reconciliation: bool,
    pub rating: Option<i32>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            restaurant_id: order.restaurant_id,
            status: order.status,
            payment_method: order.payment_method,
            payment_status: order.payment_status,
            subtotal_amount: order.subtotal_amount,
            discount_amount: order.discount_amount,
            total_amount: order.total_amount,
            promotion_code: order.promotion_code,
            cancellation_reason: order.cancellation_reason,
            needs_reconciliation: order.needs_reconciliation,
            rating: order.rating,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

/// POST /api/orders
pub async fn create_order(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(body): Json<CreateOrderBody>,
) -> Response {
    let client_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .unwrap_or("127.0.0.1")
        .trim()
        .to_string();

    let request = CheckoutRequest {
        user_id: body.user_id,
        restaurant_id: body.restaurant_id,
        items: body
            .items
            .into_iter()
            .map(|i| CheckoutItem {
                name: i.name,
                unit_price: i.unit_price,
                quantity: i.quantity,
            })
            .collect(),
        payment_method: body.payment_method,
        promotion_code: body.promotion_code,
        client_ip,
    };

    match state.orchestrator.create_order(request).await {
        Ok(receipt) => (
            StatusCode::CREATED,
            Json(CreateOrderResponse {
                order_id: receipt.order_id,
                redirect_url: receipt.redirect_url,
                subtotal_amount: receipt.subtotal_amount,
                discount_amount: receipt.discount_amount,
                total_amount: receipt.total_amount,
            }),
        )
            .into_response(),
        Err(e) => ErrorResponse::from_app_error(&e).into_response(),
    }
}

/// GET /api/orders/{id}
pub async fn get_order(
    State(state): State<Arc<ApiState>>,
    Path(order_id): Path<Uuid>,
) -> Response {
    match state
        .orchestrator
        .order_repository()
        .find_by_id(order_id)
        .await
    {
        Ok(Some(order)) => Json(OrderResponse::from(order)).into_response(),
        Ok(None) => ErrorResponse::from_app_error(&AppError::new(AppErrorKind::Domain(
            crate::error::DomainError::OrderNotFound {
                order_id: order_id.to_string(),
            },
        )))
        .into_response(),
        Err(e) => ErrorResponse::from_app_error(&e.into()).into_response(),
    }
}

/// POST /api/orders/{id}/cancel
pub async fn cancel_order(
    State(state): State<Arc<ApiState>>,
    Path(order_id): Path<Uuid>,
    Json(body): Json<CancelOrderBody>,
) -> Response {
    let actor = match body.actor.as_str() {
        "user" => CancelActor::User,
        "admin" => CancelActor::Admin,
        "restaurant" => CancelActor::Restaurant,
        other => {
            let err = AppError::new(AppErrorKind::Validation(ValidationError::OutOfRange {
                field: "actor".to_string(),
                reason: format!("unknown actor {other:?}"),
            }));
            return ErrorResponse::from_app_error(&err).into_response();
        }
    };

    match state
        .orchestrator
        .cancel_order(order_id, actor, body.reason.as_deref())
        .await
    {
        Ok(order) => Json(OrderResponse::from(order)).into_response(),
        Err(e) => ErrorResponse::from_app_error(&e).into_response(),
    }
}

/// POST /api/orders/{id}/events — fulfillment progress only; payment
/// events enter exclusively through the webhook route.
pub async fn order_event(
    State(state): State<Arc<ApiState>>,
    Path(order_id): Path<Uuid>,
    Json(body): Json<OrderEventBody>,
) -> Response {
    let event = match body.event.as_str() {
        "restaurant_accept" => OrderEvent::RestaurantAccept,
        "ready" => OrderEvent::Ready,
        "driver_pickup" => OrderEvent::DriverPickup,
        "delivered_confirm" => OrderEvent::DeliveredConfirm,
        other => {
            let err = AppError::new(AppErrorKind::Validation(ValidationError::OutOfRange {
                field: "event".to_string(),
                reason: format!("{other:?} is not a fulfillment event"),
            }));
            return ErrorResponse::from_app_error(&err).into_response();
        }
    };

    match state.orchestrator.mark_progress(order_id, event).await {
        Ok(order) => Json(OrderResponse::from(order)).into_response(),
        Err(e) => ErrorResponse::from_app_error(&e).into_response(),
    }
}

/// POST /api/orders/{id}/retry-payment
pub async fn retry_payment(
    State(state): State<Arc<ApiState>>,
    Path(order_id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    let client_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .unwrap_or("127.0.0.1")
        .trim()
        .to_string();

    match state.orchestrator.retry_payment(order_id, &client_ip).await {
        Ok(receipt) => Json(CreateOrderResponse {
            order_id: receipt.order_id,
            redirect_url: receipt.redirect_url,
            subtotal_amount: receipt.subtotal_amount,
            discount_amount: receipt.discount_amount,
            total_amount: receipt.total_amount,
        })
        .into_response(),
        Err(e) => ErrorResponse::from_app_error(&e).into_response(),
    }
}

/// POST /api/orders/{id}/rating
pub async fn rate_order(
    State(state): State<Arc<ApiState>>,
    Path(order_id): Path<Uuid>,
    Json(body): Json<RateOrderBody>,
) -> Response {
    match state
        .orchestrator
        .rate_order(order_id, body.rating, body.comment.as_deref())
        .await
    {
        Ok(order) => Json(OrderResponse::from(order)).into_response(),
        Err(e) => ErrorResponse::from_app_error(&e).into_response(),
    }
}
