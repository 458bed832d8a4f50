//! Row types returned by the repository. Product and comment views arrive
//! fully hydrated: joins and aggregates are resolved in SQL, relative to the
//! viewer passed to the query.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub is_staff: bool,
    pub date_joined: DateTime<Utc>,
}

pub struct NewUser<'a> {
    pub username: &'a str,
    pub password_hash: &'a str,
    pub email: &'a str,
    pub name: &'a str,
    pub phone: Option<&'a str>,
    pub is_staff: bool,
}

#[derive(Debug, Default)]
pub struct UserChanges {
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRow {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub image: String,
}

#[derive(Debug, Default)]
pub struct CategoryChanges {
    pub name: Option<String>,
    pub slug: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProductView {
    pub id: i64,
    pub category: CategoryRow,
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub stock: i64,
    pub brand: String,
    pub model: String,
    pub like_count: u64,
    pub is_liked: bool,
}

pub struct NewProduct<'a> {
    pub category_id: i64,
    pub name: &'a str,
    pub description: &'a str,
    pub price: Decimal,
    pub stock: i64,
    pub brand: &'a str,
    pub model: &'a str,
}

#[derive(Debug, Default)]
pub struct ProductChanges {
    pub category_id: Option<i64>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub stock: Option<i64>,
    pub brand: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRow {
    pub id: i64,
    pub product_id: i64,
    pub path: String,
    pub order: u32,
}

#[derive(Debug, Clone)]
pub struct LikeRow {
    pub id: i64,
    pub user_id: i64,
    pub product_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FavoriteRow {
    pub id: i64,
    pub user_id: i64,
    pub product_id: i64,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CommentView {
    pub id: i64,
    pub user_id: i64,
    pub username: String,
    pub product_id: i64,
    pub product_name: String,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    pub like_count: u64,
    pub is_liked: bool,
}

#[derive(Debug, Clone)]
pub struct CartRow {
    pub id: i64,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartItemRow {
    pub id: i64,
    pub cart_id: i64,
    pub product_id: i64,
    pub quantity: i64,
}

/// Upper bound for a cart line quantity and for product stock. Keeps
/// `price * quantity` and stock restores far from any overflow.
pub const MAX_QUANTITY: i64 = 1_000_000_000;

/// Outcome of putting a product in a cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartWrite {
    pub item_id: i64,
    /// `false` when an existing line had its quantity replaced.
    pub created: bool,
}

/// Limit/offset window for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: u64,
    pub offset: u64,
}

impl PageRequest {
    pub fn all() -> Self {
        Self { limit: i64::MAX as u64, offset: 0 }
    }
}
