//! Cart and cart-item endpoints. Stock is reserved and returned by the
//! repository inside the same transaction as the item change.

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use bazaar_db::DbError;
use bazaar_db::models::{CartItemRow, CartRow};
use bazaar_types::api::{CartItemPatch, CartItemRequest, CartItemResponse, CartResponse};
use bazaar_types::pagination::Paginated;
use tracing::info;

use crate::catalog::load_products;
use crate::error::ApiError;
use crate::extract::{Payload, Principal};
use crate::pagination::Pagination;
use crate::serializers;
use crate::state::{AppState, run_db};

// -- Carts --

pub async fn list_carts(
    State(state): State<AppState>,
    principal: Principal,
    pagination: Pagination,
) -> Result<Json<Paginated<CartResponse>>, ApiError> {
    let (user_id, page) = (principal.id, pagination.request());
    let (carts, total) = run_db(&state, move |db| db.list_carts(user_id, page)).await?;
    let carts = build_carts(&state, user_id, carts).await?;
    Ok(Json(pagination.finish(carts, total)?))
}

pub async fn get_cart(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
) -> Result<Json<CartResponse>, ApiError> {
    let user_id = principal.id;
    let cart = run_db(&state, move |db| db.get_cart(user_id, id))
        .await?
        .ok_or_else(ApiError::not_found)?;
    let mut carts = build_carts(&state, user_id, vec![cart]).await?;
    carts.pop().map(Json).ok_or_else(ApiError::not_found)
}

/// Only useful for users whose cart was never provisioned.
pub async fn create_cart(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = principal.id;
    let cart = run_db(&state, move |db| db.create_cart(user_id))
        .await
        .map_err(|e| match e {
            ApiError::Conflict(_) => ApiError::Conflict("You already have a cart.".into()),
            other => other,
        })?;
    Ok((StatusCode::CREATED, Json(serializers::cart(cart, vec![])?)))
}

pub async fn clear_cart(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<StatusCode, ApiError> {
    let user_id = principal.id;
    let removed = run_db(&state, move |db| db.clear_cart(user_id))
        .await
        .map_err(|e| match e {
            ApiError::NotFound(_) => ApiError::CartNotFound,
            other => other,
        })?;

    info!(user_id, removed, "Cleared cart");
    Ok(StatusCode::NO_CONTENT)
}

async fn build_carts(
    state: &AppState,
    viewer: i64,
    carts: Vec<CartRow>,
) -> Result<Vec<CartResponse>, ApiError> {
    let cart_ids: Vec<i64> = carts.iter().map(|c| c.id).collect();
    let rows = run_db(state, move |db| db.get_cart_items(&cart_ids)).await?;

    let mut by_cart: HashMap<i64, Vec<CartItemResponse>> = HashMap::new();
    for (cart_id, item) in build_items(state, viewer, rows).await? {
        by_cart.entry(cart_id).or_default().push(item);
    }

    carts
        .into_iter()
        .map(|cart| {
            let items = by_cart.remove(&cart.id).unwrap_or_default();
            serializers::cart(cart, items)
        })
        .collect()
}

/// Serialize items with their products, keeping the owning cart id alongside.
async fn build_items(
    state: &AppState,
    viewer: i64,
    rows: Vec<CartItemRow>,
) -> Result<Vec<(i64, CartItemResponse)>, ApiError> {
    let products = load_products(state, Some(viewer), rows.iter().map(|r| r.product_id).collect()).await?;

    rows.into_iter()
        .filter_map(|row| {
            let product = products.get(&row.product_id)?.clone();
            let cart_id = row.cart_id;
            Some(serializers::cart_item(row, product).map(|item| (cart_id, item)))
        })
        .collect()
}

async fn item_response(
    state: &AppState,
    viewer: i64,
    row: CartItemRow,
) -> Result<CartItemResponse, ApiError> {
    build_items(state, viewer, vec![row])
        .await?
        .pop()
        .map(|(_, item)| item)
        .ok_or_else(ApiError::not_found)
}

// -- Cart items --

pub async fn list_items(
    State(state): State<AppState>,
    principal: Principal,
    pagination: Pagination,
) -> Result<Json<Paginated<CartItemResponse>>, ApiError> {
    let (user_id, page) = (principal.id, pagination.request());
    let (rows, total) = run_db(&state, move |db| db.list_cart_items(user_id, page)).await?;
    let items = build_items(&state, user_id, rows)
        .await?
        .into_iter()
        .map(|(_, item)| item)
        .collect();
    Ok(Json(pagination.finish(items, total)?))
}

pub async fn get_item(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
) -> Result<Json<CartItemResponse>, ApiError> {
    let user_id = principal.id;
    let row = run_db(&state, move |db| db.get_cart_item(user_id, id))
        .await?
        .ok_or_else(ApiError::not_found)?;
    Ok(Json(item_response(&state, user_id, row).await?))
}

/// Put a product in the viewer's cart. A product already in the cart has its
/// line's quantity replaced (200) instead of a new line being created (201).
pub async fn create_item(
    State(state): State<AppState>,
    principal: Principal,
    Payload(req): Payload<CartItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = principal.id;
    let (write, row) = run_db(&state, move |db| {
        let write = db.add_to_cart(user_id, req.product_id, req.quantity)?;
        let row = db
            .get_cart_item(user_id, write.item_id)?
            .ok_or(DbError::NotFound("Cart item"))?;
        Ok((write, row))
    })
    .await?;

    let status = if write.created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(item_response(&state, user_id, row).await?)))
}

/// Serves both PUT and PATCH: quantity is the only writable field.
pub async fn update_item(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
    Payload(req): Payload<CartItemPatch>,
) -> Result<Json<CartItemResponse>, ApiError> {
    let user_id = principal.id;
    let row = run_db(&state, move |db| db.set_cart_item_quantity(user_id, id, req.quantity)).await?;
    Ok(Json(item_response(&state, user_id, row).await?))
}

pub async fn delete_item(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let user_id = principal.id;
    run_db(&state, move |db| db.remove_cart_item(user_id, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
