use crate::config::Config;
use crate::errors::EscrowEngineError;
use crate::funding::FundingService;
use crate::ledger::LedgerEngine;
use crate::metrics;
use crate::models::{
    ApprovePaymentRequest, ChainEventPayload, CreateEscrowRequest, CreateFundingIntentRequest,
    CreatePaymentRequestRequest, FundingWebhookPayload, OfframpWebhookPayload, RejectPaymentRequest,
    SettlementKind,
};
use crate::payments::PaymentService;
use crate::reconciliation;
use crate::webhooks::{HandlerResult, WebhookDelivery, WebhookProcessor};
use crate::workers::{JobQueues, QUEUE_REFUND};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Shared handler state, wired once in `main`.
pub struct AppState {
    pub funding: Arc<FundingService>,
    pub payments: Arc<PaymentService>,
    pub ledger: Arc<LedgerEngine>,
    pub webhooks: Arc<WebhookProcessor>,
    pub queues: Arc<JobQueues>,
    pub db: Arc<crate::database::Database>,
    pub config: Config,
}

/// Health check endpoint
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "escrow-engine",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Prometheus metrics endpoint
pub async fn metrics_endpoint() -> HttpResponse {
    match metrics::metrics_handler() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => HttpResponse::InternalServerError().json(json!({
            "error": { "message": e.to_string() }
        })),
    }
}

// =============================================================================
// Funding
// =============================================================================

/// Declare a funding intent (intent-first path). Returns 201 with a polling
/// id; the escrow materializes asynchronously on confirmed funding.
pub async fn create_funding_intent(
    state: web::Data<AppState>,
    request: web::Json<CreateFundingIntentRequest>,
) -> Result<HttpResponse, EscrowEngineError> {
    let response = state.funding.create_intent(request.into_inner()).await?;
    Ok(HttpResponse::Created().json(response))
}

/// Poll a funding intent. A long-pending intent may trigger the fallback
/// reconciliation lookup against the provider.
pub async fn get_funding_intent(
    state: web::Data<AppState>,
    intent_id: web::Path<Uuid>,
) -> Result<HttpResponse, EscrowEngineError> {
    let response = state.funding.get_intent(*intent_id).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Legacy escrow-first creation: the escrow row exists immediately in
/// `pending_deposit`.
pub async fn create_escrow(
    state: web::Data<AppState>,
    request: web::Json<CreateEscrowRequest>,
) -> Result<HttpResponse, EscrowEngineError> {
    let escrow = state
        .funding
        .create_escrow_direct(request.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(escrow))
}

pub async fn get_escrow(
    state: web::Data<AppState>,
    escrow_id: web::Path<Uuid>,
) -> Result<HttpResponse, EscrowEngineError> {
    let view = state.funding.get_escrow_view(*escrow_id).await?;
    Ok(HttpResponse::Ok().json(view))
}

#[derive(Debug, Deserialize)]
pub struct CancelEscrowRequest {
    pub actor_user_id: Uuid,
}

/// Sender-initiated cancellation. The ledger sweep happens synchronously;
/// the on-chain refund is queued, so the response is 202.
pub async fn cancel_escrow(
    state: web::Data<AppState>,
    escrow_id: web::Path<Uuid>,
    request: web::Json<CancelEscrowRequest>,
) -> Result<HttpResponse, EscrowEngineError> {
    let escrow = state.funding.get_escrow_row(*escrow_id).await?;
    if escrow.sender_user_id != request.actor_user_id {
        return Err(EscrowEngineError::Forbidden(
            "only the escrow sender may cancel".to_string(),
        ));
    }

    let swept = state
        .ledger
        .sweep_terminal(
            *escrow_id,
            SettlementKind::Refund,
            &request.actor_user_id.to_string(),
        )
        .await?;
    state.queues.enqueue(QUEUE_REFUND, *escrow_id).await?;

    Ok(HttpResponse::Accepted().json(json!({
        "escrow_id": *escrow_id,
        "status": "cancelled",
        "swept_minor": swept,
    })))
}

// =============================================================================
// Payment requests
// =============================================================================

pub async fn create_payment_request(
    state: web::Data<AppState>,
    request: web::Json<CreatePaymentRequestRequest>,
) -> Result<HttpResponse, EscrowEngineError> {
    let response = state.payments.create_request(request.into_inner()).await?;
    Ok(HttpResponse::Created().json(response))
}

pub async fn get_payment_request(
    state: web::Data<AppState>,
    payment_request_id: web::Path<Uuid>,
) -> Result<HttpResponse, EscrowEngineError> {
    let request = state.payments.get_request(*payment_request_id).await?;
    Ok(HttpResponse::Ok().json(request))
}

/// Approve: the settlement job is queued, not awaited, hence 202.
pub async fn approve_payment_request(
    state: web::Data<AppState>,
    payment_request_id: web::Path<Uuid>,
    request: web::Json<ApprovePaymentRequest>,
) -> Result<HttpResponse, EscrowEngineError> {
    let approved = state
        .payments
        .approve(*payment_request_id, request.into_inner())
        .await?;
    Ok(HttpResponse::Accepted().json(approved))
}

pub async fn reject_payment_request(
    state: web::Data<AppState>,
    payment_request_id: web::Path<Uuid>,
    request: web::Json<RejectPaymentRequest>,
) -> Result<HttpResponse, EscrowEngineError> {
    let rejected = state
        .payments
        .reject(*payment_request_id, request.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(rejected))
}

// =============================================================================
// Webhooks
// =============================================================================

fn webhook_response(result: HandlerResult) -> HttpResponse {
    match result {
        HandlerResult::Processed => HttpResponse::Ok().json(json!({ "status": "processed" })),
        HandlerResult::AlreadyProcessed => {
            HttpResponse::Ok().json(json!({ "status": "duplicate" }))
        }
    }
}

pub async fn mobile_money_funding_webhook(
    state: web::Data<AppState>,
    payload: web::Json<FundingWebhookPayload>,
) -> Result<HttpResponse, EscrowEngineError> {
    let payload = payload.into_inner();
    let code = payload.external_transaction_code.clone();
    let result = state
        .webhooks
        .process("mobile-money-funding", &code, WebhookDelivery::Funding(payload))
        .await?;
    Ok(webhook_response(result))
}

pub async fn mobile_money_offramp_webhook(
    state: web::Data<AppState>,
    payload: web::Json<OfframpWebhookPayload>,
) -> Result<HttpResponse, EscrowEngineError> {
    let payload = payload.into_inner();
    let code = payload.external_transaction_code.clone();
    let result = state
        .webhooks
        .process("mobile-money-offramp", &code, WebhookDelivery::Offramp(payload))
        .await?;
    Ok(webhook_response(result))
}

pub async fn chain_event_webhook(
    state: web::Data<AppState>,
    payload: web::Json<ChainEventPayload>,
) -> Result<HttpResponse, EscrowEngineError> {
    let payload = payload.into_inner();
    let code = format!("{}:{}", payload.chain_escrow_id, payload.tx_hash);
    let result = state
        .webhooks
        .process("chain-indexer", &code, WebhookDelivery::Chain(payload))
        .await?;
    Ok(webhook_response(result))
}

// =============================================================================
// Operator reconciliation
// =============================================================================

pub async fn reconciliation_failed(
    state: web::Data<AppState>,
) -> Result<HttpResponse, EscrowEngineError> {
    let failed =
        reconciliation::failed_rows(&state.db, state.config.workers.max_attempts).await?;
    Ok(HttpResponse::Ok().json(failed))
}

pub async fn reconciliation_integrity(
    state: web::Data<AppState>,
) -> Result<HttpResponse, EscrowEngineError> {
    let violations = state.ledger.check_integrity().await?;
    Ok(HttpResponse::Ok().json(json!({
        "clean": violations.is_empty(),
        "violations": violations,
    })))
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/metrics", web::get().to(metrics_endpoint))
        .service(
            web::scope("/api/v1")
                .route("/funding/intents", web::post().to(create_funding_intent))
                .route("/funding/intents/{id}", web::get().to(get_funding_intent))
                .route("/escrows", web::post().to(create_escrow))
                .route("/escrows/{id}", web::get().to(get_escrow))
                .route("/escrows/{id}/cancel", web::post().to(cancel_escrow))
                .route("/payment-requests", web::post().to(create_payment_request))
                .route(
                    "/payment-requests/{id}",
                    web::get().to(get_payment_request),
                )
                .route(
                    "/payment-requests/{id}/approve",
                    web::post().to(approve_payment_request),
                )
                .route(
                    "/payment-requests/{id}/reject",
                    web::post().to(reject_payment_request),
                )
                .route(
                    "/reconciliation/failed",
                    web::get().to(reconciliation_failed),
                )
                .route(
                    "/reconciliation/integrity",
                    web::get().to(reconciliation_integrity),
                ),
        )
        .service(
            web::scope("/webhooks")
                .route(
                    "/mobile-money/funding",
                    web::post().to(mobile_money_funding_webhook),
                )
                .route(
                    "/mobile-money/offramp",
                    web::post().to(mobile_money_offramp_webhook),
                )
                .route("/chain", web::post().to(chain_event_webhook)),
        );
}
