use std::collections::HashMap;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use bazaar_db::DbError;
use bazaar_db::models::{CategoryChanges, MAX_QUANTITY, NewProduct, PageRequest, ProductChanges};
use bazaar_types::api::{
    CategoryPatch, CategoryRequest, CategoryResponse, ProductPatch, ProductRequest,
    ProductResponse,
};
use bazaar_types::pagination::Paginated;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;

use crate::error::ApiError;
use crate::extract::{Payload, Principal, Viewer};
use crate::media;
use crate::pagination::Pagination;
use crate::serializers;
use crate::state::{AppState, run_db};

const MAX_NAME_LEN: usize = 100;
const MAX_PRICE_DECIMALS: u32 = 2;
/// 12 digits in total, 2 of them after the point.
const PRICE_LIMIT: i64 = 10_000_000_000;

const CATEGORY_IMAGE_DIR: &str = "category/images";
const PRODUCT_IMAGE_DIR: &str = "product/images";

// -- Categories --

pub async fn list_categories(
    State(state): State<AppState>,
    pagination: Pagination,
) -> Result<Json<Paginated<CategoryResponse>>, ApiError> {
    let page = pagination.request();
    let (rows, total) = run_db(&state, move |db| db.list_categories(page)).await?;
    let rows = rows.into_iter().map(serializers::category).collect();
    Ok(Json(pagination.finish(rows, total)?))
}

pub async fn get_category(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<CategoryResponse>, ApiError> {
    let row = run_db(&state, move |db| db.get_category(id))
        .await?
        .ok_or_else(ApiError::not_found)?;
    Ok(Json(serializers::category(row)))
}

pub async fn create_category(
    State(state): State<AppState>,
    principal: Principal,
    Payload(req): Payload<CategoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.require_staff()?;
    validate_name(&req.name)?;

    let row = run_db(&state, move |db| {
        db.create_category(req.name.trim(), req.slug.as_deref())
    })
    .await?;

    info!(category_id = row.id, "Created category {}", row.name);
    Ok((StatusCode::CREATED, Json(serializers::category(row))))
}

pub async fn replace_category(
    state: State<AppState>,
    principal: Principal,
    path: Path<i64>,
    Payload(req): Payload<CategoryRequest>,
) -> Result<Json<CategoryResponse>, ApiError> {
    let patch = CategoryPatch {
        name: Some(req.name),
        slug: req.slug,
    };
    update_category(state, principal, path, Payload(patch)).await
}

pub async fn update_category(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
    Payload(req): Payload<CategoryPatch>,
) -> Result<Json<CategoryResponse>, ApiError> {
    principal.require_staff()?;
    if let Some(name) = &req.name {
        validate_name(name)?;
    }

    let changes = CategoryChanges {
        name: req.name.map(|n| n.trim().to_string()),
        slug: req.slug,
    };
    let row = run_db(&state, move |db| db.update_category(id, &changes)).await?;
    Ok(Json(serializers::category(row)))
}

/// Deleting a category cascades to its products.
pub async fn delete_category(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    principal.require_staff()?;

    let (image, product_images) = run_db(&state, move |db| {
        let category = db.get_category(id)?.ok_or(DbError::NotFound("Category"))?;
        let (products, _) =
            db.list_products(None, Some(id), PageRequest::all())?;
        let ids: Vec<i64> = products.iter().map(|p| p.id).collect();
        let images = db.get_images_for_products(&ids)?;
        db.delete_category(id)?;
        Ok((category.image, images))
    })
    .await?;

    media::remove_file(&state.media_dir, &image).await;
    for img in product_images {
        media::remove_file(&state.media_dir, &img.path).await;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Replace the category image with the raw request body.
pub async fn upload_category_image(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CategoryResponse>, ApiError> {
    principal.require_staff()?;

    let path = media::store_image(&state.media_dir, CATEGORY_IMAGE_DIR, &headers, &body).await?;
    let stored = path.clone();
    let result = run_db(&state, move |db| {
        let previous = db.set_category_image(id, &stored)?;
        let row = db.get_category(id)?.ok_or(DbError::NotFound("Category"))?;
        Ok((previous, row))
    })
    .await;

    match result {
        Ok((previous, row)) => {
            media::remove_file(&state.media_dir, &previous).await;
            Ok(Json(serializers::category(row)))
        }
        Err(e) => {
            media::remove_file(&state.media_dir, &path).await;
            Err(e)
        }
    }
}

// -- Products --

#[derive(Debug, Deserialize)]
pub struct ProductFilter {
    pub category: Option<i64>,
}

pub async fn list_products(
    State(state): State<AppState>,
    viewer: Viewer,
    pagination: Pagination,
    filter: Result<Query<ProductFilter>, QueryRejection>,
) -> Result<Json<Paginated<ProductResponse>>, ApiError> {
    let Query(filter) = filter.map_err(|e| ApiError::Validation(e.body_text()))?;
    let page = pagination.request();
    let viewer_id = viewer.user_id();

    let (views, images, total) = run_db(&state, move |db| {
        let (views, total) = db.list_products(viewer_id, filter.category, page)?;
        let ids: Vec<i64> = views.iter().map(|p| p.id).collect();
        let images = db.get_images_for_products(&ids)?;
        Ok((views, images, total))
    })
    .await?;

    Ok(Json(pagination.finish(serializers::products(views, images), total)?))
}

pub async fn get_product(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<i64>,
) -> Result<Json<ProductResponse>, ApiError> {
    Ok(Json(load_product(&state, viewer.user_id(), id).await?))
}

pub async fn create_product(
    State(state): State<AppState>,
    principal: Principal,
    Payload(req): Payload<ProductRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.require_staff()?;
    validate_name(&req.name)?;
    validate_price(req.price)?;
    validate_stock(req.stock)?;

    let id = run_db(&state, move |db| {
        db.create_product(&NewProduct {
            category_id: req.category_id,
            name: req.name.trim(),
            description: &req.description,
            price: req.price,
            stock: req.stock,
            brand: &req.brand,
            model: &req.model,
        })
    })
    .await?;

    info!(product_id = id, "Created product");
    let product = load_product(&state, Some(principal.id), id).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn replace_product(
    state: State<AppState>,
    principal: Principal,
    path: Path<i64>,
    Payload(req): Payload<ProductRequest>,
) -> Result<Json<ProductResponse>, ApiError> {
    update_product(state, principal, path, Payload(req.into())).await
}

pub async fn update_product(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
    Payload(req): Payload<ProductPatch>,
) -> Result<Json<ProductResponse>, ApiError> {
    principal.require_staff()?;
    if let Some(name) = &req.name {
        validate_name(name)?;
    }
    if let Some(price) = req.price {
        validate_price(price)?;
    }
    if let Some(stock) = req.stock {
        validate_stock(stock)?;
    }

    let changes = ProductChanges {
        category_id: req.category_id,
        name: req.name.map(|n| n.trim().to_string()),
        description: req.description,
        price: req.price,
        stock: req.stock,
        brand: req.brand,
        model: req.model,
    };
    run_db(&state, move |db| db.update_product(id, &changes)).await?;

    Ok(Json(load_product(&state, Some(principal.id), id).await?))
}

pub async fn delete_product(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    principal.require_staff()?;

    let paths = run_db(&state, move |db| db.delete_product(id)).await?;
    for path in paths {
        media::remove_file(&state.media_dir, &path).await;
    }
    Ok(StatusCode::NO_CONTENT)
}

// -- Product images --

#[derive(Debug, Deserialize)]
pub struct ImageOrder {
    #[serde(default)]
    pub order: u32,
}

/// Attach the raw request body as a product image at the given display order.
pub async fn upload_product_image(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
    order: Result<Query<ImageOrder>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    principal.require_staff()?;
    let Query(ImageOrder { order }) = order.map_err(|e| ApiError::Validation(e.body_text()))?;

    let path = media::store_image(&state.media_dir, PRODUCT_IMAGE_DIR, &headers, &body).await?;
    let stored = path.clone();
    if let Err(e) = run_db(&state, move |db| db.add_product_image(id, &stored, order)).await {
        media::remove_file(&state.media_dir, &path).await;
        return Err(e);
    }

    let product = load_product(&state, Some(principal.id), id).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn delete_product_image(
    State(state): State<AppState>,
    principal: Principal,
    Path((product_id, image_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    principal.require_staff()?;

    let path = run_db(&state, move |db| db.delete_product_image(product_id, image_id)).await?;
    media::remove_file(&state.media_dir, &path).await;
    Ok(StatusCode::NO_CONTENT)
}

// -- Hydration --

/// Fetch and serialize a batch of products for the given viewer, keyed by id.
/// Ids that no longer exist are absent from the map.
pub(crate) async fn load_products(
    state: &AppState,
    viewer: Option<i64>,
    mut ids: Vec<i64>,
) -> Result<HashMap<i64, ProductResponse>, ApiError> {
    ids.sort_unstable();
    ids.dedup();

    let (views, images) = run_db(state, move |db| {
        let views = db.get_products_by_ids(viewer, &ids)?;
        let images = db.get_images_for_products(&ids)?;
        Ok((views, images))
    })
    .await?;

    Ok(serializers::products(views, images)
        .into_iter()
        .map(|p| (p.id, p))
        .collect())
}

pub(crate) async fn load_product(
    state: &AppState,
    viewer: Option<i64>,
    id: i64,
) -> Result<ProductResponse, ApiError> {
    load_products(state, viewer, vec![id])
        .await?
        .remove(&id)
        .ok_or_else(ApiError::not_found)
}

// -- Validation --

fn validate_name(name: &str) -> Result<(), ApiError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("This field may not be blank.".into()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ApiError::Validation(
            "Ensure this field has no more than 100 characters.".into(),
        ));
    }
    Ok(())
}

fn validate_price(price: Decimal) -> Result<(), ApiError> {
    if price.is_sign_negative() && !price.is_zero() {
        return Err(ApiError::Validation(
            "Ensure price is greater than or equal to 0.".into(),
        ));
    }
    if price.normalize().scale() > MAX_PRICE_DECIMALS {
        return Err(ApiError::Validation(
            "Ensure that there are no more than 2 decimal places.".into(),
        ));
    }
    if price.trunc() >= Decimal::from(PRICE_LIMIT) {
        return Err(ApiError::Validation(
            "Ensure that there are no more than 12 digits in total.".into(),
        ));
    }
    Ok(())
}

fn validate_stock(stock: i64) -> Result<(), ApiError> {
    if stock < 0 {
        return Err(ApiError::Validation(
            "Ensure stock is greater than or equal to 0.".into(),
        ));
    }
    if stock > MAX_QUANTITY {
        return Err(ApiError::Validation(
            "Ensure stock is less than or equal to 1000000000.".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn price_rules() {
        assert!(validate_price(dec("0")).is_ok());
        assert!(validate_price(dec("19.99")).is_ok());
        assert!(validate_price(dec("19.990")).is_ok());
        assert!(validate_price(dec("9999999999.99")).is_ok());

        assert!(validate_price(dec("-0.01")).is_err());
        assert!(validate_price(dec("1.999")).is_err());
        assert!(validate_price(dec("10000000000")).is_err());
    }

    #[test]
    fn name_rules() {
        assert!(validate_name("Phone").is_ok());
        assert!(validate_name("   ").is_err());
        assert!(validate_name(&"x".repeat(101)).is_err());
    }

    #[test]
    fn stock_must_be_in_range() {
        assert!(validate_stock(0).is_ok());
        assert!(validate_stock(-1).is_err());
        assert!(validate_stock(MAX_QUANTITY).is_ok());
        assert!(validate_stock(i64::MAX).is_err());
    }
}
