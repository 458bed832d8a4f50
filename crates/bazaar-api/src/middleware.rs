use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use bazaar_types::api::TokenKind;

use crate::auth::decode_token;
use crate::error::ApiError;
use crate::extract::{AuthMethod, Principal, Viewer};
use crate::state::{AppState, run_db};

/// Resolve the `Authorization` header into a [`Viewer`].
///
/// Accepts `Bearer <jwt access token>` and `Token <opaque key>`. A request
/// without the header proceeds anonymously; a present but invalid header is
/// rejected with 401.
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .map(|v| v.to_str().map(str::to_owned));

    let viewer = match auth_header {
        None => Viewer::default(),
        Some(Ok(value)) => Viewer(Some(resolve_principal(&state, &value).await?)),
        Some(Err(_)) => {
            return Err(ApiError::Unauthenticated("Invalid authorization header.".into()));
        }
    };

    req.extensions_mut().insert(viewer);
    Ok(next.run(req).await)
}

async fn resolve_principal(state: &AppState, header_value: &str) -> Result<Principal, ApiError> {
    if let Some(token) = header_value.strip_prefix("Bearer ") {
        let claims = decode_token(&state.jwt, token.trim(), TokenKind::Access).ok_or_else(|| {
            ApiError::Unauthenticated("Given token not valid for any token type".into())
        })?;

        let user = run_db(state, move |db| db.get_user_by_id(claims.sub))
            .await?
            .ok_or_else(|| ApiError::Unauthenticated("User not found".into()))?;

        return Ok(Principal {
            id: user.id,
            username: user.username,
            is_staff: user.is_staff,
            method: AuthMethod::Jwt,
        });
    }

    if let Some(key) = header_value.strip_prefix("Token ") {
        let key = key.trim().to_string();
        let user = run_db(state, move |db| db.get_user_by_auth_token(&key))
            .await?
            .ok_or_else(|| ApiError::Unauthenticated("Invalid token.".into()))?;

        return Ok(Principal {
            id: user.id,
            username: user.username,
            is_staff: user.is_staff,
            method: AuthMethod::Token,
        });
    }

    Err(ApiError::Unauthenticated("Invalid authorization header.".into()))
}
