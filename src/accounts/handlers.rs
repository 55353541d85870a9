use axum::{
    extract::{FromRef, Query, State},
    http::StatusCode,
    routing::{get, post},
    Form, Json, Router,
};
use tracing::instrument;

use crate::accounts::dto::{
    AccountResponse, ListQuery, LoginForm, LoginRequest, RegisterRequest, SearchQuery,
    StatsResponse, TokenResponse, UpdateAccountRequest,
};
use crate::accounts::service;
use crate::auth::extractors::CurrentAccount;
use crate::auth::jwt::JwtKeys;
use crate::error::ApiError;
use crate::state::AppState;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/login/form", post(login_form))
}

pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/users/me", get(get_me).put(update_me).delete(delete_me))
        .route("/users", get(list_accounts))
        .route("/users/search/by-email", get(search_by_email))
        .route("/stats", get(get_stats))
}

#[instrument(skip(state, payload))]
async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AccountResponse>), ApiError> {
    let account = service::register(state.store.as_ref(), payload).await?;
    Ok((StatusCode::CREATED, Json(AccountResponse::from(account))))
}

#[instrument(skip(state, payload))]
async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let keys = JwtKeys::from_ref(&state);
    let (token, account) = service::login(state.store.as_ref(), &keys, payload).await?;
    Ok(Json(TokenResponse {
        token,
        token_type: "bearer",
        account: AccountResponse::from(account),
    }))
}

/// Same flow as `login`, fed by an OAuth2 password form.
#[instrument(skip(state, form))]
async fn login_form(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Json<TokenResponse>, ApiError> {
    let keys = JwtKeys::from_ref(&state);
    let payload = LoginRequest {
        email: form.username,
        password: form.password,
    };
    let (token, account) = service::login(state.store.as_ref(), &keys, payload).await?;
    Ok(Json(TokenResponse {
        token,
        token_type: "bearer",
        account: AccountResponse::from(account),
    }))
}

async fn get_me(CurrentAccount(account): CurrentAccount) -> Json<AccountResponse> {
    Json(AccountResponse::from(account))
}

#[instrument(skip(state, current, payload))]
async fn update_me(
    State(state): State<AppState>,
    current: CurrentAccount,
    Json(payload): Json<UpdateAccountRequest>,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = service::update_self(state.store.as_ref(), current.0.id, payload).await?;
    Ok(Json(AccountResponse::from(account)))
}

#[instrument(skip(state, current))]
async fn delete_me(
    State(state): State<AppState>,
    current: CurrentAccount,
) -> Result<StatusCode, ApiError> {
    service::delete_self(state.store.as_ref(), current.0.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, _current))]
async fn list_accounts(
    State(state): State<AppState>,
    _current: CurrentAccount,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<AccountResponse>>, ApiError> {
    let accounts = service::list(state.store.as_ref(), query.skip, query.limit).await?;
    Ok(Json(accounts.into_iter().map(AccountResponse::from).collect()))
}

#[instrument(skip(state, _current))]
async fn search_by_email(
    State(state): State<AppState>,
    _current: CurrentAccount,
    Query(query): Query<SearchQuery>,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = service::find_by_email_exact(state.store.as_ref(), &query.email).await?;
    Ok(Json(AccountResponse::from(account)))
}

#[instrument(skip(state, _current))]
async fn get_stats(
    State(state): State<AppState>,
    _current: CurrentAccount,
) -> Result<Json<StatsResponse>, ApiError> {
    let stats = service::stats(state.store.as_ref()).await?;
    Ok(Json(StatsResponse {
        total_users: stats.total,
        active_users: stats.active,
        inactive_users: stats.inactive,
    }))
}
