use axum::{
    Json,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::StatusCode,
    response::IntoResponse,
};
use bazaar_types::api::{CommentPatch, CommentRequest, CommentResponse, LikedResponse};
use bazaar_types::pagination::Paginated;
use serde::Deserialize;
use tracing::warn;

use crate::error::ApiError;
use crate::extract::{Payload, Principal, Viewer};
use crate::pagination::Pagination;
use crate::serializers;
use crate::state::{AppState, run_db};

const MAX_COMMENT_LEN: usize = 5000;

pub async fn list_comments(
    State(state): State<AppState>,
    viewer: Viewer,
    pagination: Pagination,
) -> Result<Json<Paginated<CommentResponse>>, ApiError> {
    let (viewer_id, page) = (viewer.user_id(), pagination.request());
    let (rows, total) = run_db(&state, move |db| db.list_comments(viewer_id, page)).await?;
    let rows = rows.into_iter().map(serializers::comment).collect();
    Ok(Json(pagination.finish(rows, total)?))
}

pub async fn get_comment(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<i64>,
) -> Result<Json<CommentResponse>, ApiError> {
    let viewer_id = viewer.user_id();
    let row = run_db(&state, move |db| db.get_comment(viewer_id, id))
        .await?
        .ok_or_else(ApiError::not_found)?;
    Ok(Json(serializers::comment(row)))
}

pub async fn create_comment(
    State(state): State<AppState>,
    principal: Principal,
    Payload(req): Payload<CommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let body = validate_comment(&req.comment)?;
    let user_id = principal.id;
    let row = run_db(&state, move |db| db.create_comment(user_id, req.product_id, &body)).await?;
    Ok((StatusCode::CREATED, Json(serializers::comment(row))))
}

/// Edits are limited to the comment's author. Serves both PUT and PATCH: the
/// comment text is the only writable field.
pub async fn update_comment(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
    Payload(req): Payload<CommentPatch>,
) -> Result<Json<CommentResponse>, ApiError> {
    let body = validate_comment(&req.comment)?;
    ensure_author(&state, &principal, id).await?;

    let user_id = principal.id;
    let row = run_db(&state, move |db| {
        db.update_comment(id, &body)?;
        db.get_comment(Some(user_id), id)
    })
    .await?
    .ok_or_else(ApiError::not_found)?;
    Ok(Json(serializers::comment(row)))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    ensure_author(&state, &principal, id).await?;
    run_db(&state, move |db| db.delete_comment(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ByProductQuery {
    pub product_id: Option<String>,
}

/// All comments on one product, unpaginated.
pub async fn by_product(
    State(state): State<AppState>,
    principal: Principal,
    query: Result<Query<ByProductQuery>, QueryRejection>,
) -> Result<Json<Vec<CommentResponse>>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::Validation(e.body_text()))?;
    let raw = query
        .product_id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::Validation("product_id is required".into()))?;
    let product_id: i64 = raw
        .parse()
        .map_err(|_| ApiError::Validation("product_id must be an integer".into()))?;

    let viewer_id = principal.id;
    let rows = run_db(&state, move |db| db.comments_for_product(Some(viewer_id), product_id)).await?;
    Ok(Json(rows.into_iter().map(serializers::comment).collect()))
}

pub async fn like_comment(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = principal.id;
    let created = run_db(&state, move |db| db.like_comment(user_id, id)).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(LikedResponse { liked: true })))
}

pub async fn unlike_comment(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
) -> Result<Json<LikedResponse>, ApiError> {
    let user_id = principal.id;
    let removed = run_db(&state, move |db| db.unlike_comment(user_id, id)).await?;
    if !removed {
        return Err(ApiError::Validation("Like not found.".into()));
    }
    Ok(Json(LikedResponse { liked: false }))
}

async fn ensure_author(state: &AppState, principal: &Principal, id: i64) -> Result<(), ApiError> {
    let comment = run_db(state, move |db| db.get_comment(None, id))
        .await?
        .ok_or_else(ApiError::not_found)?;
    if comment.user_id != principal.id {
        warn!(user_id = principal.id, comment_id = id, "Rejected edit of another user's comment");
        return Err(ApiError::Forbidden(
            "You do not have permission to perform this action.".into(),
        ));
    }
    Ok(())
}

fn validate_comment(body: &str) -> Result<String, ApiError> {
    let body = body.trim();
    if body.is_empty() {
        return Err(ApiError::Validation("This field may not be blank.".into()));
    }
    if body.chars().count() > MAX_COMMENT_LEN {
        return Err(ApiError::Validation(
            "Ensure this field has no more than 5000 characters.".into(),
        ));
    }
    Ok(body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_text_is_trimmed() {
        assert_eq!(validate_comment("  great phone \n").unwrap(), "great phone");
        assert!(validate_comment(" \t ").is_err());
        assert!(validate_comment(&"a".repeat(5001)).is_err());
    }
}
