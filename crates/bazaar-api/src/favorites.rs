use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use bazaar_types::api::{FavoriteResponse, ProductRef};
use bazaar_types::pagination::Paginated;

use crate::catalog::{load_product, load_products};
use crate::error::ApiError;
use crate::extract::{Payload, Principal};
use crate::pagination::Pagination;
use crate::serializers;
use crate::state::{AppState, run_db};

pub async fn list_favorites(
    State(state): State<AppState>,
    principal: Principal,
    pagination: Pagination,
) -> Result<Json<Paginated<FavoriteResponse>>, ApiError> {
    let (user_id, page) = (principal.id, pagination.request());
    let (rows, total) = run_db(&state, move |db| db.list_favorites(user_id, page)).await?;

    let mut products =
        load_products(&state, Some(user_id), rows.iter().map(|r| r.product_id).collect()).await?;
    let results = rows
        .into_iter()
        .filter_map(|row| {
            let product = products.remove(&row.product_id)?;
            Some(serializers::favorite(row, product))
        })
        .collect();

    Ok(Json(pagination.finish(results, total)?))
}

pub async fn get_favorite(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
) -> Result<Json<FavoriteResponse>, ApiError> {
    let user_id = principal.id;
    let row = run_db(&state, move |db| db.get_favorite(user_id, id))
        .await?
        .ok_or_else(ApiError::not_found)?;
    let product = load_product(&state, Some(user_id), row.product_id).await?;
    Ok(Json(serializers::favorite(row, product)))
}

pub async fn create_favorite(
    State(state): State<AppState>,
    principal: Principal,
    Payload(req): Payload<ProductRef>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = principal.id;
    let row = run_db(&state, move |db| db.add_favorite(user_id, req.product_id))
        .await
        .map_err(|e| match e {
            ApiError::Conflict(_) => {
                ApiError::Conflict("This product is already in your favorites.".into())
            }
            other => other,
        })?;
    let product = load_product(&state, Some(user_id), row.product_id).await?;
    Ok((StatusCode::CREATED, Json(serializers::favorite(row, product))))
}

pub async fn delete_favorite(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let user_id = principal.id;
    run_db(&state, move |db| db.delete_favorite(user_id, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
