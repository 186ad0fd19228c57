use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::api::middleware::{
    auth::{Admin, Principal},
    state::AppState,
};
use crate::error::{CardError, Result};
use crate::models::{CardStatus, CardView};
use crate::services::card_codec::mask;
use crate::services::card_engine::{CardEngine, CardPatch, CreateCardRequest};

#[derive(Deserialize)]
struct CardNumberQuery {
    number: String,
}

#[derive(Deserialize)]
struct StatusQuery {
    number: String,
    status: String,
}

#[derive(Serialize)]
struct BalanceResponse {
    balance: Decimal,
}

#[derive(Deserialize)]
struct TransferBody {
    from_card: String,
    to_card: String,
    amount: Decimal,
}

#[derive(Deserialize)]
struct CreateCardBody {
    owner_username: String,
    number: String,
    expiration_month: i32,
    expiration_year: i32,
    status: Option<String>,
    balance: Option<Decimal>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct UpdateCardBody {
    number: Option<String>,
    expiration_month: Option<i32>,
    expiration_year: Option<i32>,
    status: Option<String>,
    balance: Option<Decimal>,
    owner_username: Option<String>,
}

fn parse_status(name: Option<String>) -> Result<Option<CardStatus>> {
    name.map(|n| CardStatus::parse(&n).map_err(|e| CardError::WrongStatus(e.0)))
        .transpose()
}

async fn balance(
    State(engine): State<Arc<CardEngine>>,
    principal: Principal,
    Query(query): Query<CardNumberQuery>,
) -> Result<Json<BalanceResponse>> {
    let balance = engine
        .get_balance(&principal.username, &query.number)
        .await?;

    Ok(Json(BalanceResponse { balance }))
}

async fn request_block(
    State(engine): State<Arc<CardEngine>>,
    principal: Principal,
    Query(query): Query<CardNumberQuery>,
) -> Result<impl IntoResponse> {
    engine
        .request_block(&principal.username, &query.number)
        .await?;

    tracing::info!(
        principal = %principal.username,
        card = %mask(&query.number),
        "Block requested"
    );

    Ok(Json(json!({ "message": "Block request submitted" })))
}

async fn transfer(
    State(engine): State<Arc<CardEngine>>,
    principal: Principal,
    Json(body): Json<TransferBody>,
) -> Result<impl IntoResponse> {
    engine
        .transfer(&principal.username, &body.from_card, &body.to_card, body.amount)
        .await?;

    tracing::info!(
        principal = %principal.username,
        from = %mask(&body.from_card),
        to = %mask(&body.to_card),
        amount = %body.amount,
        "Transfer completed"
    );

    Ok(Json(json!({ "message": "Transfer completed" })))
}

async fn set_status(
    State(engine): State<Arc<CardEngine>>,
    Admin(admin): Admin,
    Query(query): Query<StatusQuery>,
) -> Result<StatusCode> {
    engine.set_status(&query.number, &query.status).await?;

    tracing::info!(
        admin = %admin.username,
        card = %mask(&query.number),
        status = %query.status,
        "Card status set"
    );

    Ok(StatusCode::OK)
}

async fn create_card(
    State(engine): State<Arc<CardEngine>>,
    Admin(admin): Admin,
    Json(body): Json<CreateCardBody>,
) -> Result<(StatusCode, Json<CardView>)> {
    let status = parse_status(body.status)?;

    let view = engine
        .create_card(CreateCardRequest {
            owner_username: body.owner_username,
            card_number: body.number,
            expiration_month: body.expiration_month,
            expiration_year: body.expiration_year,
            status,
            balance: body.balance,
        })
        .await?;

    tracing::info!(
        admin = %admin.username,
        card = %view.number,
        owner = %view.owner_username,
        "Card created"
    );

    Ok((StatusCode::CREATED, Json(view)))
}

async fn update_card(
    State(engine): State<Arc<CardEngine>>,
    Admin(admin): Admin,
    Path(number): Path<String>,
    Json(body): Json<UpdateCardBody>,
) -> Result<Json<CardView>> {
    let patch = CardPatch {
        status: parse_status(body.status)?,
        card_number: body.number,
        expiration_month: body.expiration_month,
        expiration_year: body.expiration_year,
        balance: body.balance,
        owner_username: body.owner_username,
    };

    let view = engine.update_card(&number, patch).await?;

    tracing::info!(admin = %admin.username, card = %view.number, "Card updated");

    Ok(Json(view))
}

async fn delete_card(
    State(engine): State<Arc<CardEngine>>,
    Admin(admin): Admin,
    Path(number): Path<String>,
) -> Result<StatusCode> {
    engine.delete_card(&number).await?;

    tracing::info!(admin = %admin.username, card = %mask(&number), "Card deleted");

    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/bank/cards", post(create_card))
        .route("/bank/cards/balance", get(balance))
        .route("/bank/cards/block", post(request_block))
        .route("/bank/cards/status", post(set_status))
        .route("/bank/cards/transfer", post(transfer))
        .route("/bank/cards/:number", put(update_card).delete(delete_card))
}
