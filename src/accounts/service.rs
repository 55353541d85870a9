use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};

use crate::accounts::dto::{LoginRequest, RegisterRequest, UpdateAccountRequest};
use crate::auth::jwt::JwtKeys;
use crate::auth::password::{hash_password, verify_password};
use crate::error::ApiError;
use crate::store::{Account, AccountPatch, AccountStore, NewAccount, StoreError};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn validate_name(name: &str) -> Result<(), ApiError> {
    let len = name.chars().count();
    if len == 0 || len > 100 {
        return Err(ApiError::Validation(
            "Name must be 1 to 100 characters".into(),
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), ApiError> {
    if !is_valid_email(email) {
        return Err(ApiError::Validation("Invalid email address".into()));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    let len = password.chars().count();
    if !(6..=50).contains(&len) {
        return Err(ApiError::Validation(
            "Password must be 6 to 50 characters".into(),
        ));
    }
    Ok(())
}

fn validate_age(age: i32) -> Result<(), ApiError> {
    if !(0..=150).contains(&age) {
        return Err(ApiError::Validation("Age must be between 0 and 150".into()));
    }
    Ok(())
}

fn map_write_err(e: StoreError) -> ApiError {
    match e {
        StoreError::DuplicateEmail => ApiError::EmailTaken,
        other => ApiError::Storage(other),
    }
}

pub async fn register(
    store: &dyn AccountStore,
    req: RegisterRequest,
) -> Result<Account, ApiError> {
    validate_name(&req.name)?;
    validate_email(&req.email)?;
    validate_password(&req.password)?;
    if let Some(age) = req.age {
        validate_age(age)?;
    }

    // Friendly pre-check; the unique index on email is the real guarantee.
    if store.find_by_email(&req.email).await?.is_some() {
        warn!(email = %req.email, "email already registered");
        return Err(ApiError::EmailTaken);
    }

    let password_hash = hash_password(&req.password).map_err(ApiError::Internal)?;
    let account = store
        .create(NewAccount {
            name: req.name,
            email: req.email,
            password_hash,
            age: req.age,
        })
        .await
        .map_err(map_write_err)?;

    info!(account_id = account.id, email = %account.email, "account registered");
    Ok(account)
}

pub async fn login(
    store: &dyn AccountStore,
    keys: &JwtKeys,
    req: LoginRequest,
) -> Result<(String, Account), ApiError> {
    let Some(account) = store.find_by_email(&req.email).await? else {
        warn!(email = %req.email, "login with unknown email");
        return Err(ApiError::InvalidCredentials);
    };

    if !verify_password(&req.password, &account.password_hash) {
        warn!(account_id = account.id, "login with wrong password");
        return Err(ApiError::InvalidCredentials);
    }

    if !account.is_active {
        warn!(account_id = account.id, "login on disabled account");
        return Err(ApiError::AccountDisabled);
    }

    let token = keys.sign(account.id).map_err(ApiError::Internal)?;
    info!(account_id = account.id, "login");
    Ok((token, account))
}

pub async fn update_self(
    store: &dyn AccountStore,
    account_id: i64,
    req: UpdateAccountRequest,
) -> Result<Account, ApiError> {
    if let Some(name) = &req.name {
        validate_name(name)?;
    }
    if let Some(email) = &req.email {
        validate_email(email)?;
    }
    if let Some(password) = &req.password {
        validate_password(password)?;
    }
    if let Some(age) = req.age {
        validate_age(age)?;
    }

    let current = store
        .find_by_id(account_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    // A changed email must not collide with any other account.
    if let Some(email) = &req.email {
        if *email != current.email && store.find_by_email(email).await?.is_some() {
            warn!(account_id, email = %email, "email already used by another account");
            return Err(ApiError::EmailTaken);
        }
    }

    let password_hash = match &req.password {
        Some(password) => Some(hash_password(password).map_err(ApiError::Internal)?),
        None => None,
    };

    let account = store
        .update(
            account_id,
            AccountPatch {
                name: req.name,
                email: req.email,
                password_hash,
                age: req.age,
            },
        )
        .await
        .map_err(map_write_err)?
        .ok_or(ApiError::NotFound)?;

    info!(account_id, "account updated");
    Ok(account)
}

pub async fn delete_self(store: &dyn AccountStore, account_id: i64) -> Result<(), ApiError> {
    store.delete(account_id).await?;
    info!(account_id, "account deleted");
    Ok(())
}

pub async fn list(
    store: &dyn AccountStore,
    skip: i64,
    limit: i64,
) -> Result<Vec<Account>, ApiError> {
    Ok(store.list(skip, limit).await?)
}

pub async fn find_by_email_exact(
    store: &dyn AccountStore,
    email: &str,
) -> Result<Account, ApiError> {
    store.find_by_email(email).await?.ok_or(ApiError::NotFound)
}

#[derive(Debug, Clone, Copy)]
pub struct Stats {
    pub total: i64,
    pub active: i64,
    pub inactive: i64,
}

pub async fn stats(store: &dyn AccountStore) -> Result<Stats, ApiError> {
    let total = store.count().await?;
    let active = store.count_active().await?;
    Ok(Stats {
        total,
        active,
        inactive: total - active,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::extractors::resolve;
    use crate::auth::jwt::test_keys;
    use crate::store::memory::MemoryStore;

    fn register_req(name: &str, email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            name: name.into(),
            email: email.into(),
            password: password.into(),
            age: Some(25),
        }
    }

    fn login_req(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.into(),
            password: password.into(),
        }
    }

    #[tokio::test]
    async fn register_hashes_the_password() {
        let store = MemoryStore::new();
        let account = register(&store, register_req("A", "a@x.com", "secret1"))
            .await
            .expect("register");
        assert!(account.is_active);
        assert!(!account.password_hash.is_empty());
        assert_ne!(account.password_hash, "secret1");
        assert!(verify_password("secret1", &account.password_hash));
    }

    #[tokio::test]
    async fn register_rejects_bad_input() {
        let store = MemoryStore::new();
        let err = register(&store, register_req("", "a@x.com", "secret1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let err = register(&store, register_req("A", "not-an-email", "secret1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let err = register(&store, register_req("A", "a@x.com", "short"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let err = register(
            &store,
            RegisterRequest {
                age: Some(200),
                ..register_req("A", "a@x.com", "secret1")
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        // Nothing was written along the way.
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_without_a_write() {
        let store = MemoryStore::new();
        register(&store, register_req("A", "a@x.com", "secret1"))
            .await
            .expect("first register");
        let err = register(&store, register_req("B", "a@x.com", "secret2"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::EmailTaken));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn email_comparison_is_case_exact() {
        let store = MemoryStore::new();
        register(&store, register_req("A", "a@x.com", "secret1"))
            .await
            .expect("register");
        // A differently-cased address is a different account.
        register(&store, register_req("B", "A@x.com", "secret2"))
            .await
            .expect("register with different case");
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn login_then_resolve_round_trips_the_account() {
        let store = MemoryStore::new();
        let keys = test_keys();
        let registered = register(&store, register_req("A", "a@x.com", "secret1"))
            .await
            .expect("register");

        let (token, account) = login(&store, &keys, login_req("a@x.com", "secret1"))
            .await
            .expect("login");
        assert_eq!(account.id, registered.id);

        let resolved = resolve(&keys, &store, &token).await.expect("resolve");
        assert_eq!(resolved.id, registered.id);
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_are_indistinguishable() {
        let store = MemoryStore::new();
        let keys = test_keys();
        register(&store, register_req("A", "a@x.com", "secret1"))
            .await
            .expect("register");

        let wrong_password = login(&store, &keys, login_req("a@x.com", "wrong-password"))
            .await
            .unwrap_err();
        let unknown_email = login(&store, &keys, login_req("nobody@x.com", "secret1"))
            .await
            .unwrap_err();
        assert!(matches!(wrong_password, ApiError::InvalidCredentials));
        assert!(matches!(unknown_email, ApiError::InvalidCredentials));
        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
    }

    #[tokio::test]
    async fn login_on_disabled_account_is_account_disabled() {
        let store = MemoryStore::new();
        let keys = test_keys();
        let account = register(&store, register_req("A", "a@x.com", "secret1"))
            .await
            .expect("register");
        store.set_active(account.id, false);

        let err = login(&store, &keys, login_req("a@x.com", "secret1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::AccountDisabled));
    }

    #[tokio::test]
    async fn age_only_update_leaves_other_fields_alone() {
        let store = MemoryStore::new();
        let before = register(&store, register_req("A", "a@x.com", "secret1"))
            .await
            .expect("register");

        let after = update_self(
            &store,
            before.id,
            UpdateAccountRequest {
                age: Some(30),
                ..Default::default()
            },
        )
        .await
        .expect("update");

        assert_eq!(after.age, Some(30));
        assert_eq!(after.name, before.name);
        assert_eq!(after.email, before.email);
        assert_eq!(after.password_hash, before.password_hash);
        assert!(after.updated_at >= before.updated_at);
    }

    #[tokio::test]
    async fn password_update_is_rehashed() {
        let store = MemoryStore::new();
        let keys = test_keys();
        let account = register(&store, register_req("A", "a@x.com", "secret1"))
            .await
            .expect("register");

        update_self(
            &store,
            account.id,
            UpdateAccountRequest {
                password: Some("new-secret".into()),
                ..Default::default()
            },
        )
        .await
        .expect("update");

        let err = login(&store, &keys, login_req("a@x.com", "secret1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidCredentials));
        login(&store, &keys, login_req("a@x.com", "new-secret"))
            .await
            .expect("login with new password");
    }

    #[tokio::test]
    async fn email_update_rechecks_uniqueness_against_others() {
        let store = MemoryStore::new();
        let a = register(&store, register_req("A", "a@x.com", "secret1"))
            .await
            .expect("register a");
        register(&store, register_req("B", "b@x.com", "secret2"))
            .await
            .expect("register b");

        let err = update_self(
            &store,
            a.id,
            UpdateAccountRequest {
                email: Some("b@x.com".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::EmailTaken));

        // Re-submitting the current email is not a conflict.
        let same = update_self(
            &store,
            a.id,
            UpdateAccountRequest {
                email: Some("a@x.com".into()),
                ..Default::default()
            },
        )
        .await
        .expect("no-op email update");
        assert_eq!(same.email, "a@x.com");
    }

    #[tokio::test]
    async fn update_on_missing_account_is_not_found() {
        let store = MemoryStore::new();
        let err = update_self(
            &store,
            999,
            UpdateAccountRequest {
                age: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::NotFound));
    }

    #[tokio::test]
    async fn delete_is_a_hard_delete_and_idempotent() {
        let store = MemoryStore::new();
        let account = register(&store, register_req("A", "a@x.com", "secret1"))
            .await
            .expect("register");

        delete_self(&store, account.id).await.expect("delete");
        assert!(store.find_by_id(account.id).await.unwrap().is_none());

        // Second delete is a no-op at the store layer.
        delete_self(&store, account.id).await.expect("second delete");
    }

    #[tokio::test]
    async fn list_returns_creation_order_and_clamps() {
        let store = MemoryStore::new();
        for i in 0..4 {
            register(
                &store,
                register_req(&format!("U{i}"), &format!("u{i}@x.com"), "secret1"),
            )
            .await
            .expect("register");
        }

        let first_two = list(&store, 0, 2).await.expect("list");
        assert_eq!(first_two.len(), 2);
        assert_eq!(first_two[0].email, "u0@x.com");
        assert_eq!(first_two[1].email, "u1@x.com");

        let rest = list(&store, 2, 100).await.expect("list");
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].email, "u2@x.com");

        // Out-of-range values clamp silently instead of erroring.
        assert!(list(&store, -5, -1).await.expect("list").is_empty());
        assert_eq!(list(&store, 0, 100).await.expect("list").len(), 4);
    }

    #[tokio::test]
    async fn search_by_email_is_exact() {
        let store = MemoryStore::new();
        register(&store, register_req("A", "a@x.com", "secret1"))
            .await
            .expect("register");

        let found = find_by_email_exact(&store, "a@x.com").await.expect("found");
        assert_eq!(found.name, "A");

        let err = find_by_email_exact(&store, "A@x.com").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound));
    }

    #[tokio::test]
    async fn stats_are_consistent() {
        let store = MemoryStore::new();
        for i in 0..3 {
            register(
                &store,
                register_req(&format!("U{i}"), &format!("u{i}@x.com"), "secret1"),
            )
            .await
            .expect("register");
        }
        store.set_active(2, false);

        let s = stats(&store).await.expect("stats");
        assert_eq!(s.total, 3);
        assert_eq!(s.active, 2);
        assert_eq!(s.inactive, 1);
        assert_eq!(s.total, s.active + s.inactive);
    }
}
