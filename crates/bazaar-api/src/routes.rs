use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
};
use serde_json::{Value, json};

use crate::state::AppState;
use crate::{auth, cache, cart, catalog, comments, favorites, likes, media, middleware};

/// Build the API router. Authentication runs on every request; the response
/// cache wraps only the resource routes.
pub fn router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/me", get(auth::me))
        .route("/auth/update", put(auth::update_me).patch(auth::update_me))
        .route("/api/token-login", post(auth::token_login))
        .route("/api/token-logout", post(auth::token_logout))
        .route("/api/jwt-login", post(auth::jwt_login))
        .route("/api/jwt-logout", post(auth::jwt_logout))
        .route("/api/token-refresh", post(auth::token_refresh));

    let uploads = Router::new()
        .route("/category/{id}/image", post(catalog::upload_category_image))
        .route("/product/{id}/images", post(catalog::upload_product_image))
        .layer(DefaultBodyLimit::max(media::MAX_UPLOAD_SIZE));

    let resources = Router::new()
        .route("/category", get(catalog::list_categories).post(catalog::create_category))
        .route(
            "/category/{id}",
            get(catalog::get_category)
                .put(catalog::replace_category)
                .patch(catalog::update_category)
                .delete(catalog::delete_category),
        )
        .route("/product", get(catalog::list_products).post(catalog::create_product))
        .route(
            "/product/{id}",
            get(catalog::get_product)
                .put(catalog::replace_product)
                .patch(catalog::update_product)
                .delete(catalog::delete_product),
        )
        .route("/product/{id}/like", post(likes::like_product))
        .route("/product/{id}/unlike", post(likes::unlike_product))
        .route("/product/{id}/images/{image_id}", delete(catalog::delete_product_image))
        .route("/liked", get(likes::list_likes).post(likes::create_like))
        .route("/liked/{id}", get(likes::get_like).delete(likes::delete_like))
        .route("/favorite", get(favorites::list_favorites).post(favorites::create_favorite))
        .route("/favorite/{id}", get(favorites::get_favorite).delete(favorites::delete_favorite))
        .route("/comment", get(comments::list_comments).post(comments::create_comment))
        .route("/comment/by_product", get(comments::by_product).post(comments::by_product))
        .route(
            "/comment/{id}",
            get(comments::get_comment)
                .put(comments::update_comment)
                .patch(comments::update_comment)
                .delete(comments::delete_comment),
        )
        .route("/comment/{id}/like", post(comments::like_comment))
        .route("/comment/{id}/unlike", post(comments::unlike_comment))
        .route("/cart", get(cart::list_carts).post(cart::create_cart))
        .route("/cart/clear_cart", post(cart::clear_cart))
        .route("/cart/{id}", get(cart::get_cart))
        .route("/cart-item", get(cart::list_items).post(cart::create_item))
        .route(
            "/cart-item/{id}",
            get(cart::get_item)
                .put(cart::update_item)
                .patch(cart::update_item)
                .delete(cart::delete_item),
        )
        .merge(uploads)
        .layer(from_fn_with_state(state.clone(), cache::cache_reads));

    Router::new()
        .merge(auth_routes)
        .merge(resources)
        .layer(from_fn_with_state(state.clone(), middleware::authenticate))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
