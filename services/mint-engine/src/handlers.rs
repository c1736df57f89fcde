use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;
use std::sync::Arc;

use mint_core::Address;

use crate::errors::MintError;
use crate::models::{
    CancelTransactionRequest, CreateAssetRequest, CreateOfferRequest, CreateOperationRequest,
    CreateTransactionRequest, PropagateTransactionRequest, SettleTransactionRequest,
};
use crate::service::Mint;

/// The authenticated local user, injected by the auth layer in front of the
/// mint as an `X-Mint-User` header.
fn caller(req: &HttpRequest, mint: &Mint) -> Result<Address, MintError> {
    let user = req
        .headers()
        .get("X-Mint-User")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            MintError::OperationNotAuthorized("missing X-Mint-User header".to_string())
        })?;
    mint.address_for(user)
}

fn caller_opt(req: &HttpRequest, mint: &Mint) -> Option<Address> {
    caller(req, mint).ok()
}

pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "mint-engine",
    }))
}

pub async fn create_asset(
    mint: web::Data<Arc<Mint>>,
    req: HttpRequest,
    request: web::Json<CreateAssetRequest>,
) -> Result<HttpResponse, MintError> {
    let caller = caller(&req, &mint)?;
    let asset = mint.create_asset(&caller, &request).await?;
    Ok(HttpResponse::Created().json(json!({ "asset": asset })))
}

pub async fn get_balance(
    mint: web::Data<Arc<Mint>>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, MintError> {
    let (asset, holder) = path.into_inner();
    let balance = mint.get_balance(&asset, &holder).await?;
    Ok(HttpResponse::Ok().json(json!({ "balance": balance })))
}

pub async fn create_operation(
    mint: web::Data<Arc<Mint>>,
    req: HttpRequest,
    asset: web::Path<String>,
    request: web::Json<CreateOperationRequest>,
) -> Result<HttpResponse, MintError> {
    let caller = caller(&req, &mint)?;
    let operation = mint.create_operation(&caller, &asset, &request).await?;
    Ok(HttpResponse::Created().json(json!({ "operation": operation })))
}

pub async fn get_operation(
    mint: web::Data<Arc<Mint>>,
    id: web::Path<String>,
) -> Result<HttpResponse, MintError> {
    let operation = mint.get_operation(&id).await?;
    Ok(HttpResponse::Ok().json(json!({ "operation": operation })))
}

pub async fn propagate_operation(
    mint: web::Data<Arc<Mint>>,
    id: web::Path<String>,
) -> Result<HttpResponse, MintError> {
    let operation = mint.receive_operation_propagation(&id).await?;
    Ok(HttpResponse::Ok().json(json!({ "operation": operation })))
}

pub async fn create_offer(
    mint: web::Data<Arc<Mint>>,
    req: HttpRequest,
    request: web::Json<CreateOfferRequest>,
) -> Result<HttpResponse, MintError> {
    let caller = caller(&req, &mint)?;
    let offer = mint.create_offer(&caller, &request).await?;
    Ok(HttpResponse::Created().json(json!({ "offer": offer })))
}

pub async fn get_offer(
    mint: web::Data<Arc<Mint>>,
    id: web::Path<String>,
) -> Result<HttpResponse, MintError> {
    let offer = mint.get_offer(&id).await?;
    Ok(HttpResponse::Ok().json(json!({ "offer": offer })))
}

pub async fn propagate_offer(
    mint: web::Data<Arc<Mint>>,
    id: web::Path<String>,
) -> Result<HttpResponse, MintError> {
    let offer = mint.receive_offer_propagation(&id).await?;
    Ok(HttpResponse::Ok().json(json!({ "offer": offer })))
}

pub async fn create_transaction(
    mint: web::Data<Arc<Mint>>,
    req: HttpRequest,
    request: web::Json<CreateTransactionRequest>,
) -> Result<HttpResponse, MintError> {
    let caller = caller(&req, &mint)?;
    let transaction = mint.create_transaction(&caller, &request).await?;
    Ok(HttpResponse::Created().json(json!({ "transaction": transaction })))
}

pub async fn get_transaction(
    mint: web::Data<Arc<Mint>>,
    id: web::Path<String>,
) -> Result<HttpResponse, MintError> {
    let transaction = mint.get_transaction(&id).await?;
    Ok(HttpResponse::Ok().json(json!({ "transaction": transaction })))
}

pub async fn propagate_transaction(
    mint: web::Data<Arc<Mint>>,
    id: web::Path<String>,
    request: web::Json<PropagateTransactionRequest>,
) -> Result<HttpResponse, MintError> {
    let transaction = mint
        .receive_transaction_propagation(&id, &request.lock, request.hop)
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "transaction": transaction })))
}

pub async fn settle_transaction(
    mint: web::Data<Arc<Mint>>,
    req: HttpRequest,
    id: web::Path<String>,
    request: Option<web::Json<SettleTransactionRequest>>,
) -> Result<HttpResponse, MintError> {
    let caller = caller_opt(&req, &mint);
    let lock = request.and_then(|r| r.lock.clone());
    let transaction = mint
        .settle_transaction(caller.as_ref(), &id, lock.as_deref())
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "transaction": transaction })))
}

pub async fn cancel_transaction(
    mint: web::Data<Arc<Mint>>,
    req: HttpRequest,
    id: web::Path<String>,
    request: Option<web::Json<CancelTransactionRequest>>,
) -> Result<HttpResponse, MintError> {
    let caller = caller_opt(&req, &mint);
    let lock = request.and_then(|r| r.lock.clone());
    let transaction = mint
        .cancel_transaction(caller.as_ref(), &id, lock.as_deref())
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "transaction": transaction })))
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/assets", web::post().to(create_asset))
        .route(
            "/assets/{asset}/balances/{holder}",
            web::get().to(get_balance),
        )
        .route("/operations/{asset}", web::post().to(create_operation))
        .route("/operations/{id}", web::get().to(get_operation))
        .route(
            "/operations/{id}/propagate",
            web::post().to(propagate_operation),
        )
        .route("/offers", web::post().to(create_offer))
        .route("/offers/{id}", web::get().to(get_offer))
        .route("/offers/{id}/propagate", web::post().to(propagate_offer))
        .route("/transactions", web::post().to(create_transaction))
        .route("/transactions/{id}", web::get().to(get_transaction))
        .route(
            "/transactions/{id}/propagate",
            web::post().to(propagate_transaction),
        )
        .route(
            "/transactions/{id}/settle",
            web::post().to(settle_transaction),
        )
        .route(
            "/transactions/{id}/cancel",
            web::post().to(cancel_transaction),
        );
}
