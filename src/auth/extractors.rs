use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;

use crate::auth::jwt::JwtKeys;
use crate::error::ApiError;
use crate::state::AppState;
use crate::store::{Account, AccountStore};

/// Resolve a bearer token into the authenticated, active account.
///
/// The two failure kinds stay distinct: anything wrong with the token or its
/// subject is `Unauthenticated` (401), while a resolvable but inactive
/// account is `AccountDisabled` (403).
pub async fn resolve(
    keys: &JwtKeys,
    store: &dyn AccountStore,
    token: &str,
) -> Result<Account, ApiError> {
    let claims = keys.verify(token).map_err(|e| {
        warn!(error = %e, "token rejected");
        ApiError::Unauthenticated
    })?;
    let account_id: i64 = claims.sub.parse().map_err(|_| {
        warn!(subject = %claims.sub, "token subject is not an account id");
        ApiError::Unauthenticated
    })?;
    let account = store
        .find_by_id(account_id)
        .await?
        .ok_or(ApiError::Unauthenticated)?;
    if !account.is_active {
        return Err(ApiError::AccountDisabled);
    }
    Ok(account)
}

/// Extracts the authenticated account from the `Authorization` header.
pub struct CurrentAccount(pub Account);

#[async_trait]
impl FromRequestParts<AppState> for CurrentAccount {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(ApiError::Unauthenticated)?;

        // Expect "Bearer <token>"
        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or(ApiError::Unauthenticated)?;

        let keys = JwtKeys::from_ref(state);
        let account = resolve(&keys, state.store.as_ref(), token).await?;
        Ok(CurrentAccount(account))
    }
}
