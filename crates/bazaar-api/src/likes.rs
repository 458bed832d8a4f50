//! Product likes: the like/unlike actions on a product and the viewer's
//! liked collection.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use bazaar_types::api::{LikeResponse, LikedResponse, ProductRef};
use bazaar_types::pagination::Paginated;
use tracing::debug;

use crate::catalog::{load_product, load_products};
use crate::error::ApiError;
use crate::extract::{Payload, Principal};
use crate::pagination::Pagination;
use crate::serializers;
use crate::state::{AppState, run_db};

fn created_or_ok(created: bool) -> StatusCode {
    if created { StatusCode::CREATED } else { StatusCode::OK }
}

pub async fn like_product(
    State(state): State<AppState>,
    principal: Principal,
    Path(product_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = principal.id;
    let (_, created) = run_db(&state, move |db| db.like_product(user_id, product_id)).await?;

    debug!(user_id, product_id, created, "Product liked");
    Ok((created_or_ok(created), Json(LikedResponse { liked: true })))
}

pub async fn unlike_product(
    State(state): State<AppState>,
    principal: Principal,
    Path(product_id): Path<i64>,
) -> Result<Json<LikedResponse>, ApiError> {
    let user_id = principal.id;
    let removed = run_db(&state, move |db| db.unlike_product(user_id, product_id)).await?;
    if !removed {
        return Err(ApiError::Validation("Like not found.".into()));
    }
    Ok(Json(LikedResponse { liked: false }))
}

pub async fn list_likes(
    State(state): State<AppState>,
    principal: Principal,
    pagination: Pagination,
) -> Result<Json<Paginated<LikeResponse>>, ApiError> {
    let (user_id, page) = (principal.id, pagination.request());
    let (rows, total) = run_db(&state, move |db| db.list_likes(user_id, page)).await?;

    let mut products =
        load_products(&state, Some(user_id), rows.iter().map(|r| r.product_id).collect()).await?;
    let results = rows
        .into_iter()
        .filter_map(|row| {
            let product = products.remove(&row.product_id)?;
            Some(serializers::like(row, product))
        })
        .collect();

    Ok(Json(pagination.finish(results, total)?))
}

pub async fn get_like(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
) -> Result<Json<LikeResponse>, ApiError> {
    let user_id = principal.id;
    let row = run_db(&state, move |db| db.get_like(user_id, id))
        .await?
        .ok_or_else(ApiError::not_found)?;
    let product = load_product(&state, Some(user_id), row.product_id).await?;
    Ok(Json(serializers::like(row, product)))
}

/// Liking an already-liked product returns the existing like.
pub async fn create_like(
    State(state): State<AppState>,
    principal: Principal,
    Payload(req): Payload<ProductRef>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = principal.id;
    let (row, created) = run_db(&state, move |db| db.like_product(user_id, req.product_id)).await?;
    let product = load_product(&state, Some(user_id), row.product_id).await?;
    Ok((created_or_ok(created), Json(serializers::like(row, product))))
}

pub async fn delete_like(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let user_id = principal.id;
    run_db(&state, move |db| db.delete_like(user_id, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
