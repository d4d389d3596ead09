//! HTTP surface for the storefront backend.
//!
//! Authentication is terminated upstream; the reverse proxy forwards the
//! caller's identity as `x-user-id` (plus `x-user-role` for the admin
//! surface). The webhook route is the exception: it carries no user at all
//! and is authorized solely by its signature.

use std::error::Error;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{FromRequestParts, Path, Query, State},
    http::{HeaderMap, StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::Deserialize;
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use common::config::{BackendConfig, PaymentsConfig};

use crate::error::StoreError;
use crate::model::{ModelId, OrderStatus, PlaceOrder};
use crate::order_storage::OrderStorage;
use crate::payments::PaymentGateway;
use crate::webhook::{self, GatewayEvent, signature};

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<OrderStorage>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub payments: PaymentsConfig,
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = match &self {
            StoreError::Validation(_) | StoreError::InsufficientStock { .. } => {
                StatusCode::BAD_REQUEST
            }
            StoreError::ProductNotFound(_) | StoreError::OrderNotFound(_) => StatusCode::NOT_FOUND,
            StoreError::Authenticity(_) => StatusCode::BAD_REQUEST,
            StoreError::Gateway(_) | StoreError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Identity injected by the upstream auth layer.
pub struct AuthUser(pub ModelId);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<ModelId>().ok());

        match user_id {
            Some(id) => Ok(AuthUser(id)),
            None => Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "missing or invalid user identity" })),
            )
                .into_response()),
        }
    }
}

/// Admin identity: a valid user plus the admin role header.
pub struct AdminUser(pub ModelId);

impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthUser(user_id) = AuthUser::from_request_parts(parts, state).await?;
        let is_admin = parts
            .headers
            .get("x-user-role")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|role| role == "admin");

        if is_admin {
            Ok(AdminUser(user_id))
        } else {
            Err((
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "admin access required" })),
            )
                .into_response())
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(place_order).get(list_my_orders))
        .route("/orders/admin/all", get(admin_list_orders))
        .route("/orders/{id}", get(get_order))
        .route("/orders/{id}/status", patch(update_order_status))
        .route("/payments/intent", post(create_payment_intent))
        .route("/payments/status/{reference}", get(payment_status))
        .route("/payments/webhook", post(payment_webhook))
        .route("/health", get(health_check))
        .with_state(state)
}

pub async fn run_backend(
    config: BackendConfig,
    state: AppState,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let cors = match config.cors_allow_origin.parse::<http::HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(_) => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    let app = router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    tracing::info!("Starting storefront backend at {}", config.server_address);
    let listener = tokio::net::TcpListener::bind(&config.server_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn place_order(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<PlaceOrder>,
) -> Result<impl IntoResponse, StoreError> {
    let order = state.storage.place_order(user_id, &request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn list_my_orders(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<impl IntoResponse, StoreError> {
    let orders = state.storage.get_orders_for_user(user_id).await?;
    Ok(Json(orders))
}

async fn get_order(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(order_id): Path<ModelId>,
) -> Result<impl IntoResponse, StoreError> {
    let order = state.storage.get_order(user_id, order_id).await?;
    Ok(Json(order))
}

#[derive(Debug, Deserialize)]
struct AdminListParams {
    status: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    50
}

async fn admin_list_orders(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Query(params): Query<AdminListParams>,
) -> Result<impl IntoResponse, StoreError> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<OrderStatus>)
        .transpose()?;
    let orders = state
        .storage
        .list_orders(status, params.limit, params.offset)
        .await?;
    Ok(Json(orders))
}

#[derive(Debug, Deserialize)]
struct UpdateStatusBody {
    status: String,
}

async fn update_order_status(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Path(order_id): Path<ModelId>,
    Json(body): Json<UpdateStatusBody>,
) -> Result<impl IntoResponse, StoreError> {
    let status: OrderStatus = body.status.parse()?;
    let order = state.storage.update_status(order_id, status).await?;
    Ok(Json(order))
}

#[derive(Debug, Deserialize)]
struct CreateIntentBody {
    order_id: ModelId,
}

async fn create_payment_intent(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<CreateIntentBody>,
) -> Result<impl IntoResponse, StoreError> {
    let order = state.storage.get_order(user_id, body.order_id).await?;

    let intent = state
        .gateway
        .create_intent(
            order.order.total_amount,
            &state.payments.currency,
            order.order.id,
            user_id,
        )
        .await?;

    state
        .storage
        .set_payment_reference(order.order.id, &intent.reference)
        .await?;

    Ok(Json(json!({
        "clientSecret": intent.client_secret,
        "reference": intent.reference,
    })))
}

async fn payment_status(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, StoreError> {
    let status = state.gateway.retrieve_intent(&reference).await?;
    Ok(Json(status))
}

/// Gateway-to-server only; no user session. Signature verification over the
/// raw body is the sole authorization check, and it must run before the
/// payload is interpreted in any way.
async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, StoreError> {
    let header = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| StoreError::Authenticity("missing signature header".to_string()))?;

    signature::verify(
        &state.payments.webhook_secret,
        header,
        &body,
        signature::DEFAULT_TOLERANCE_SECS,
        chrono::Utc::now().timestamp(),
    )?;

    let event = GatewayEvent::from_body(&body)?;
    webhook::apply_event(&state.storage, &event).await?;

    Ok(Json(json!({ "received": true })))
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK").into_response()
}
