use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, body::Bytes, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use bazaar_db::models::{NewUser, UserChanges, UserRow};
use bazaar_types::api::{
    AccessResponse, Claims, LoginRequest, RefreshRequest, RegisterRequest, RegisterResponse,
    TokenKind, TokenLoginResponse, TokenPairResponse, UpdateUserRequest,
};

use crate::error::ApiError;
use crate::extract::{AuthMethod, Payload, Principal};
use crate::serializers;
use crate::state::{AppState, JwtSettings, run_db};

const MIN_PASSWORD_LEN: usize = 8;
const MAX_USERNAME_LEN: usize = 150;
const MAX_PHONE_LEN: usize = 15;

pub async fn register(
    State(state): State<AppState>,
    Payload(req): Payload<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_username(&req.username)?;
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation(
            "This password is too short. It must contain at least 8 characters.".into(),
        ));
    }
    validate_email(&req.email)?;
    validate_phone(req.phone.as_deref())?;

    let password = req.password.clone();
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(ApiError::internal)?
        .map_err(ApiError::internal)?;

    let user = run_db(&state, move |db| {
        db.create_user(&NewUser {
            username: &req.username,
            password_hash: &password_hash,
            email: &req.email,
            name: &req.name,
            phone: req.phone.as_deref(),
            is_staff: false,
        })
    })
    .await
    .map_err(|e| match e {
        ApiError::Conflict(_) => {
            ApiError::Conflict("A user with that username already exists.".into())
        }
        other => other,
    })?;

    let (refresh, _) = issue_token(&state.jwt, user.id, &user.username, TokenKind::Refresh)?;
    let (access, _) = issue_token(&state.jwt, user.id, &user.username, TokenKind::Access)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user: serializers::user(user),
            refresh,
            access,
        }),
    ))
}

pub async fn me(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<impl IntoResponse, ApiError> {
    let user = run_db(&state, move |db| db.get_user_by_id(principal.id))
        .await?
        .ok_or_else(ApiError::not_found)?;
    Ok(Json(serializers::user(user)))
}

pub async fn update_me(
    State(state): State<AppState>,
    principal: Principal,
    Payload(req): Payload<UpdateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(email) = &req.email {
        validate_email(email)?;
    }
    validate_phone(req.phone.as_deref())?;

    let changes = UserChanges {
        email: req.email,
        name: req.name,
        phone: req.phone,
    };
    let user = run_db(&state, move |db| db.update_user(principal.id, &changes)).await?;
    Ok(Json(serializers::user(user)))
}

/// Opaque-token login. Reuses the user's existing token when there is one.
pub async fn token_login(
    State(state): State<AppState>,
    Payload(req): Payload<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = check_credentials(&state, req).await?.ok_or_else(|| {
        ApiError::AuthRejected("Unable to log in with provided credentials.".into())
    })?;

    let candidate = hex::encode(rand::random::<[u8; 20]>());
    let user_id = user.id;
    let (token, created) =
        run_db(&state, move |db| db.get_or_create_auth_token(user_id, &candidate)).await?;

    info!(user_id, created, "Token login");
    Ok(Json(TokenLoginResponse {
        token,
        username: user.username,
        email: user.email,
        created,
    }))
}

pub async fn token_logout(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<impl IntoResponse, ApiError> {
    if principal.method != AuthMethod::Token {
        return Err(ApiError::Unauthenticated(
            "Authentication credentials were not provided.".into(),
        ));
    }

    let removed = run_db(&state, move |db| db.delete_auth_token(principal.id)).await?;
    let message = if removed {
        "You Successfully logged out"
    } else {
        "Token Not Found"
    };
    Ok(Json(json!({ "data": message })))
}

pub async fn jwt_login(
    State(state): State<AppState>,
    Payload(req): Payload<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = check_credentials(&state, req)
        .await?
        .ok_or_else(|| ApiError::Unauthenticated("Invalid credentials".into()))?;

    let (refresh, _) = issue_token(&state.jwt, user.id, &user.username, TokenKind::Refresh)?;
    let (access, _) = issue_token(&state.jwt, user.id, &user.username, TokenKind::Access)?;

    Ok(Json(TokenPairResponse { refresh, access }))
}

/// Blacklists the submitted refresh token. Any problem with the body or the
/// token is reported as a single "Invalid token" failure.
pub async fn jwt_logout(
    State(state): State<AppState>,
    principal: Principal,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    if principal.method != AuthMethod::Jwt {
        return Err(ApiError::Unauthenticated(
            "Authentication credentials were not provided.".into(),
        ));
    }

    let invalid = || ApiError::AuthRejected("Invalid token".into());
    let req: RefreshRequest = serde_json::from_slice(&body).map_err(|_| invalid())?;
    let claims = decode_token(&state.jwt, &req.refresh, TokenKind::Refresh).ok_or_else(invalid)?;
    if claims.sub != principal.id {
        warn!(user_id = principal.id, "Refusing to blacklist another user's token");
        return Err(invalid());
    }

    let (jti, exp) = (claims.jti, claims.exp as i64);
    run_db(&state, move |db| db.blacklist_refresh_token(&jti, principal.id, exp)).await?;

    Ok(Json(json!({ "detail": "Successfully logged out" })))
}

pub async fn token_refresh(
    State(state): State<AppState>,
    Payload(req): Payload<RefreshRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = decode_token(&state.jwt, &req.refresh, TokenKind::Refresh)
        .ok_or_else(|| ApiError::Unauthenticated("Token is invalid or expired".into()))?;

    let (jti, user_id) = (claims.jti.clone(), claims.sub);
    let (blacklisted, user) = run_db(&state, move |db| {
        Ok((db.is_refresh_token_blacklisted(&jti)?, db.get_user_by_id(user_id)?))
    })
    .await?;

    if blacklisted {
        return Err(ApiError::Unauthenticated("Token is blacklisted".into()));
    }
    let user = user.ok_or_else(|| ApiError::Unauthenticated("User not found".into()))?;

    let (access, _) = issue_token(&state.jwt, user.id, &user.username, TokenKind::Access)?;
    Ok(Json(AccessResponse { access }))
}

// -- Helpers --

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .and_then(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed))
        .is_ok()
}

/// Looks the user up and verifies the password off the async runtime.
/// `None` covers both an unknown username and a wrong password.
async fn check_credentials(state: &AppState, req: LoginRequest) -> Result<Option<UserRow>, ApiError> {
    run_db(state, move |db| {
        let user = db.get_user_by_username(&req.username)?;
        Ok(user.filter(|u| verify_password(&req.password, &u.password)))
    })
    .await
}

pub fn issue_token(
    jwt: &JwtSettings,
    user_id: i64,
    username: &str,
    kind: TokenKind,
) -> Result<(String, Claims), ApiError> {
    let now = chrono::Utc::now();
    let ttl = match kind {
        TokenKind::Access => jwt.access_ttl,
        TokenKind::Refresh => jwt.refresh_ttl,
    };

    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        token_type: kind,
        jti: Uuid::new_v4().simple().to_string(),
        iat: now.timestamp() as usize,
        exp: (now + ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt.secret.as_bytes()),
    )
    .map_err(ApiError::internal)?;

    Ok((token, claims))
}

/// Validate signature, expiry and token type.
pub fn decode_token(jwt: &JwtSettings, token: &str, expected: TokenKind) -> Option<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt.secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?;

    (data.claims.token_type == expected).then_some(data.claims)
}

fn validate_username(username: &str) -> Result<(), ApiError> {
    let len = username.chars().count();
    if !(3..=MAX_USERNAME_LEN).contains(&len) {
        return Err(ApiError::Validation(
            "Username must be between 3 and 150 characters.".into(),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || "@.+-_".contains(c))
    {
        return Err(ApiError::Validation(
            "Username may contain only letters, numbers, and @/./+/-/_ characters.".into(),
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), ApiError> {
    if email.is_empty() {
        return Ok(());
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(ApiError::Validation("Enter a valid email address.".into())),
    }
}

fn validate_phone(phone: Option<&str>) -> Result<(), ApiError> {
    match phone {
        Some(p) if p.chars().count() > MAX_PHONE_LEN => Err(ApiError::Validation(
            "Phone number must have at most 15 characters.".into(),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> JwtSettings {
        JwtSettings {
            secret: "test-secret".into(),
            access_ttl: chrono::Duration::minutes(5),
            refresh_ttl: chrono::Duration::hours(24),
        }
    }

    #[test]
    fn password_hash_roundtrip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn token_type_is_enforced() {
        let jwt = settings();
        let (access, claims) = issue_token(&jwt, 7, "alice", TokenKind::Access).unwrap();
        assert_eq!(claims.sub, 7);

        assert!(decode_token(&jwt, &access, TokenKind::Access).is_some());
        assert!(decode_token(&jwt, &access, TokenKind::Refresh).is_none());
    }

    #[test]
    fn tokens_from_another_secret_are_rejected() {
        let (token, _) = issue_token(&settings(), 1, "alice", TokenKind::Refresh).unwrap();
        let other = JwtSettings {
            secret: "other".into(),
            ..settings()
        };
        assert!(decode_token(&other, &token, TokenKind::Refresh).is_none());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let jwt = JwtSettings {
            access_ttl: chrono::Duration::minutes(-10),
            ..settings()
        };
        let (token, _) = issue_token(&jwt, 1, "alice", TokenKind::Access).unwrap();
        assert!(decode_token(&jwt, &token, TokenKind::Access).is_none());
    }

    #[test]
    fn username_rules() {
        assert!(validate_username("al").is_err());
        assert!(validate_username("alice smith").is_err());
        assert!(validate_username("alice.smith+shop@x").is_ok());
    }

    #[test]
    fn email_rules() {
        assert!(validate_email("").is_ok());
        assert!(validate_email("a@example.com").is_ok());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("@example.com").is_err());
    }
}
