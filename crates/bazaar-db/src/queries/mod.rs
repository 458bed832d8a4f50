mod cart;
mod catalog;
mod comments;
mod social;
mod tokens;
mod users;

pub use catalog::slugify;

use rusqlite::Row;
use rusqlite::types::Type;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::models::{CategoryRow, ProductView};

/// Columns of a hydrated product; `?1` is the viewer's user id (or NULL).
pub(crate) const PRODUCT_SELECT: &str = "
    SELECT p.id, c.id, c.name, c.slug, c.image,
           p.name, p.description, p.price, p.stock, p.brand, p.model,
           (SELECT COUNT(*) FROM likes l WHERE l.product_id = p.id),
           EXISTS(SELECT 1 FROM likes l WHERE l.product_id = p.id AND l.user_id = ?1)
    FROM products p
    JOIN categories c ON c.id = p.category_id";

pub(crate) fn product_from_row(row: &Row<'_>) -> rusqlite::Result<ProductView> {
    Ok(ProductView {
        id: row.get(0)?,
        category: CategoryRow {
            id: row.get(1)?,
            name: row.get(2)?,
            slug: row.get(3)?,
            image: row.get(4)?,
        },
        name: row.get(5)?,
        description: row.get(6)?,
        price: decimal_at(row, 7)?,
        stock: row.get(8)?,
        brand: row.get(9)?,
        model: row.get(10)?,
        like_count: row.get::<_, i64>(11)? as u64,
        is_liked: row.get(12)?,
    })
}

/// Prices are stored as TEXT to keep them exact.
pub(crate) fn decimal_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn price_to_sql(price: Decimal) -> String {
    let mut price = price;
    price.rescale(2);
    price.to_string()
}

/// `?{start}, ?{start+1}, ...` for an IN clause of `n` values.
pub(crate) fn placeholders(start: usize, n: usize) -> String {
    (start..start + n)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_numbered_from_start() {
        assert_eq!(placeholders(2, 3), "?2, ?3, ?4");
        assert_eq!(placeholders(1, 1), "?1");
    }

    #[test]
    fn prices_are_stored_with_two_places() {
        assert_eq!(price_to_sql(Decimal::new(5, 0)), "5.00");
        assert_eq!(price_to_sql(Decimal::new(1999, 2)), "19.99");
    }
}
