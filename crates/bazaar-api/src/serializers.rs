//! Row-to-response conversion. Viewer-relative fields (`is_liked`) are
//! resolved by the repository queries, which take the viewer explicitly.

use std::collections::HashMap;

use bazaar_db::models::{
    CartItemRow, CartRow, CategoryRow, CommentView, FavoriteRow, ImageRow, LikeRow, ProductView,
    UserRow,
};
use bazaar_types::api::{
    CartItemResponse, CartResponse, CategoryResponse, CommentResponse, FavoriteResponse,
    ImageResponse, LikeResponse, ProductResponse, UserResponse,
};
use rust_decimal::Decimal;

use crate::error::ApiError;
use crate::media::media_url;

pub fn user(row: UserRow) -> UserResponse {
    UserResponse {
        id: row.id,
        username: row.username,
        email: row.email,
        name: row.name,
        phone: row.phone,
        is_staff: row.is_staff,
        date_joined: row.date_joined,
    }
}

pub fn category(row: CategoryRow) -> CategoryResponse {
    CategoryResponse {
        id: row.id,
        category_name: row.name.to_uppercase(),
        name: row.name,
        slug: row.slug,
        image: media_url(&row.image),
    }
}

fn image(row: ImageRow) -> ImageResponse {
    ImageResponse {
        id: row.id,
        image: media_url(&row.path),
        order: row.order,
    }
}

/// `images` must already be in display order.
pub fn product(view: ProductView, images: Vec<ImageRow>) -> ProductResponse {
    let images: Vec<ImageResponse> = images.into_iter().map(image).collect();
    let image_url = images.first().map(|i| i.image.clone()).unwrap_or_default();

    ProductResponse {
        id: view.id,
        category: category(view.category),
        name: view.name,
        description: view.description,
        price: view.price,
        stock: view.stock,
        brand: view.brand,
        model: view.model,
        image_url,
        images,
        is_liked: view.is_liked,
        like_count: view.like_count,
    }
}

/// Serialize a batch of products, distributing `images` to their owners.
pub fn products(views: Vec<ProductView>, images: Vec<ImageRow>) -> Vec<ProductResponse> {
    let mut by_product: HashMap<i64, Vec<ImageRow>> = HashMap::new();
    for img in images {
        by_product.entry(img.product_id).or_default().push(img);
    }

    views
        .into_iter()
        .map(|view| {
            let images = by_product.remove(&view.id).unwrap_or_default();
            product(view, images)
        })
        .collect()
}

pub fn like(row: LikeRow, product: ProductResponse) -> LikeResponse {
    LikeResponse {
        id: row.id,
        product,
        created_at: row.created_at,
    }
}

pub fn favorite(row: FavoriteRow, product: ProductResponse) -> FavoriteResponse {
    FavoriteResponse {
        id: row.id,
        product,
        added_at: row.added_at,
    }
}

pub fn comment(view: CommentView) -> CommentResponse {
    CommentResponse {
        id: view.id,
        user: view.username,
        product: view.product_name,
        comment: view.comment,
        created_at: view.created_at,
        like_count: view.like_count,
        is_liked: view.is_liked,
    }
}

fn total_too_large() -> ApiError {
    ApiError::Validation("Cart total is too large.".into())
}

pub fn cart_item(row: CartItemRow, product: ProductResponse) -> Result<CartItemResponse, ApiError> {
    let total_price = product
        .price
        .checked_mul(Decimal::from(row.quantity))
        .ok_or_else(total_too_large)?;
    Ok(CartItemResponse {
        id: row.id,
        product,
        quantity: row.quantity,
        total_price,
    })
}

pub fn cart(row: CartRow, items: Vec<CartItemResponse>) -> Result<CartResponse, ApiError> {
    let total_price = items
        .iter()
        .try_fold(Decimal::ZERO, |acc, i| acc.checked_add(i.total_price))
        .ok_or_else(total_too_large)?;
    Ok(CartResponse {
        id: row.id,
        user: row.user_id,
        items,
        total_price,
        created_at: row.created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::str::FromStr;

    fn view(id: i64, price: &str) -> ProductView {
        ProductView {
            id,
            category: CategoryRow {
                id: 1,
                name: "Phones".into(),
                slug: "phones".into(),
                image: String::new(),
            },
            name: format!("Product {}", id),
            description: String::new(),
            price: Decimal::from_str(price).unwrap(),
            stock: 10,
            brand: "Acme".into(),
            model: "X".into(),
            like_count: 0,
            is_liked: false,
        }
    }

    fn img(id: i64, product_id: i64, order: u32) -> ImageRow {
        ImageRow {
            id,
            product_id,
            path: format!("product/images/{}.png", id),
            order,
        }
    }

    #[test]
    fn category_name_is_uppercased() {
        let c = category(CategoryRow {
            id: 1,
            name: "Home & Garden".into(),
            slug: "home-garden".into(),
            image: String::new(),
        });
        assert_eq!(c.category_name, "HOME & GARDEN");
        assert_eq!(c.image, "");
    }

    #[test]
    fn image_url_is_first_image() {
        let list = products(
            vec![view(1, "1.00"), view(2, "2.00")],
            vec![img(5, 1, 0), img(3, 1, 2), img(9, 2, 1)],
        );
        assert_eq!(list[0].image_url, "/media/product/images/5.png");
        assert_eq!(list[0].images.len(), 2);
        assert_eq!(list[1].images.len(), 1);
    }

    #[test]
    fn product_without_images_has_empty_url() {
        let p = product(view(1, "1.00"), vec![]);
        assert_eq!(p.image_url, "");
        assert!(p.images.is_empty());
    }

    #[test]
    fn cart_totals_are_computed() {
        let a = cart_item(
            CartItemRow { id: 1, cart_id: 1, product_id: 1, quantity: 3 },
            product(view(1, "19.99"), vec![]),
        )
        .unwrap();
        let b = cart_item(
            CartItemRow { id: 2, cart_id: 1, product_id: 2, quantity: 2 },
            product(view(2, "0.50"), vec![]),
        )
        .unwrap();
        assert_eq!(a.total_price.to_string(), "59.97");

        let c = cart(CartRow { id: 1, user_id: 4, created_at: Utc::now() }, vec![a, b]).unwrap();
        assert_eq!(c.total_price.to_string(), "60.97");
        assert_eq!(c.user, 4);
    }

    #[test]
    fn empty_cart_totals_zero() {
        let c = cart(CartRow { id: 1, user_id: 1, created_at: Utc::now() }, vec![]).unwrap();
        assert!(c.total_price.is_zero());
    }

    #[test]
    fn overflowing_totals_are_errors_not_panics() {
        let huge = cart_item(
            CartItemRow { id: 1, cart_id: 1, product_id: 1, quantity: i64::MAX },
            product(view(1, "9999999999.99"), vec![]),
        );
        assert!(matches!(huge, Err(ApiError::Validation(_))));

        let mut big = product(view(1, "1.00"), vec![]);
        big.price = Decimal::MAX;
        let line = |id| {
            cart_item(CartItemRow { id, cart_id: 1, product_id: 1, quantity: 1 }, big.clone()).unwrap()
        };
        let total = cart(CartRow { id: 1, user_id: 1, created_at: Utc::now() }, vec![line(1), line(2)]);
        assert!(matches!(total, Err(ApiError::Validation(_))));
    }
}
