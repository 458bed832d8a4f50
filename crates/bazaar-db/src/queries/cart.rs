//! Carts and the stock reconciliation rule.
//!
//! Every cart-item write runs in an IMMEDIATE transaction on the writer
//! connection and adjusts product stock with a single conditional UPDATE.
//! Stock is never read into memory and written back, so concurrent
//! reservations cannot both spend the same units.

use rusqlite::{Connection, OptionalExtension, Row};
use tracing::{debug, warn};

use crate::models::{CartItemRow, CartRow, CartWrite, MAX_QUANTITY, PageRequest};
use crate::queries::placeholders;
use crate::{Database, DbError};

const CART_ITEM_COLUMNS: &str = "ci.id, ci.cart_id, ci.product_id, ci.quantity";

fn cart_from_row(row: &Row<'_>) -> rusqlite::Result<CartRow> {
    Ok(CartRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        created_at: row.get(2)?,
    })
}

fn cart_item_from_row(row: &Row<'_>) -> rusqlite::Result<CartItemRow> {
    Ok(CartItemRow {
        id: row.get(0)?,
        cart_id: row.get(1)?,
        product_id: row.get(2)?,
        quantity: row.get(3)?,
    })
}

/// Take `delta` units from a product's stock; a negative delta returns
/// units. Fails without side effects when stock would go below zero.
fn reconcile_stock(conn: &Connection, product_id: i64, delta: i64) -> Result<(), DbError> {
    if delta == 0 {
        return Ok(());
    }

    let updated = conn.execute(
        "UPDATE products SET stock = stock - ?2 WHERE id = ?1 AND stock >= ?2",
        [product_id, delta],
    )?;
    if updated == 1 {
        debug!(product_id, delta, "Reconciled product stock");
        return Ok(());
    }

    let available: Option<i64> = conn
        .query_row("SELECT stock FROM products WHERE id = ?1", [product_id], |r| r.get(0))
        .optional()?;

    match available {
        None => Err(DbError::NotFound("Product")),
        Some(available) => {
            warn!(product_id, requested = delta, available, "Insufficient stock");
            Err(DbError::InsufficientStock {
                product_id,
                requested: delta,
                available,
            })
        }
    }
}

fn cart_id_for_user(conn: &Connection, user_id: i64) -> Result<Option<i64>, DbError> {
    let id = conn
        .query_row("SELECT id FROM carts WHERE user_id = ?1", [user_id], |r| r.get(0))
        .optional()?;
    Ok(id)
}

fn owned_cart_item(conn: &Connection, user_id: i64, item_id: i64) -> Result<Option<CartItemRow>, DbError> {
    let sql = format!(
        "SELECT {} FROM cart_items ci
         JOIN carts c ON c.id = ci.cart_id
         WHERE ci.id = ?1 AND c.user_id = ?2",
        CART_ITEM_COLUMNS
    );
    let row = conn
        .query_row(&sql, [item_id, user_id], cart_item_from_row)
        .optional()?;
    Ok(row)
}

fn check_quantity(quantity: i64) -> Result<(), DbError> {
    if !(1..=MAX_QUANTITY).contains(&quantity) {
        return Err(DbError::InvalidQuantity(quantity));
    }
    Ok(())
}

impl Database {
    // -- Carts --

    pub fn get_cart_for_user(&self, user_id: i64) -> Result<Option<CartRow>, DbError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, user_id, created_at FROM carts WHERE user_id = ?1",
                    [user_id],
                    cart_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn get_cart(&self, user_id: i64, cart_id: i64) -> Result<Option<CartRow>, DbError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, user_id, created_at FROM carts WHERE id = ?1 AND user_id = ?2",
                    [cart_id, user_id],
                    cart_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn list_carts(&self, user_id: i64, page: PageRequest) -> Result<(Vec<CartRow>, u64), DbError> {
        self.with_conn(|conn| {
            let total: i64 =
                conn.query_row("SELECT COUNT(*) FROM carts WHERE user_id = ?1", [user_id], |r| {
                    r.get(0)
                })?;
            let mut stmt = conn.prepare(
                "SELECT id, user_id, created_at FROM carts
                 WHERE user_id = ?1 ORDER BY id LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map([user_id, page.limit as i64, page.offset as i64], cart_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok((rows, total as u64))
        })
    }

    /// Create a cart for a user who somehow lacks one.
    pub fn create_cart(&self, user_id: i64) -> Result<CartRow, DbError> {
        self.with_tx(|tx| {
            if cart_id_for_user(tx, user_id)?.is_some() {
                return Err(DbError::Conflict("user already has a cart".into()));
            }
            tx.execute("INSERT INTO carts (user_id) VALUES (?1)", [user_id])?;
            let row = tx.query_row(
                "SELECT id, user_id, created_at FROM carts WHERE id = ?1",
                [tx.last_insert_rowid()],
                cart_from_row,
            )?;
            Ok(row)
        })
    }

    /// Items of several carts, grouped by cart in insertion order.
    pub fn get_cart_items(&self, cart_ids: &[i64]) -> Result<Vec<CartItemRow>, DbError> {
        if cart_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM cart_items ci WHERE ci.cart_id IN ({}) ORDER BY ci.cart_id, ci.id",
                CART_ITEM_COLUMNS,
                placeholders(1, cart_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::ToSql> = cart_ids
                .iter()
                .map(|id| id as &dyn rusqlite::ToSql)
                .collect();
            let rows = stmt
                .query_map(params.as_slice(), cart_item_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Cart items --

    pub fn list_cart_items(
        &self,
        user_id: i64,
        page: PageRequest,
    ) -> Result<(Vec<CartItemRow>, u64), DbError> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM cart_items ci JOIN carts c ON c.id = ci.cart_id WHERE c.user_id = ?1",
                [user_id],
                |r| r.get(0),
            )?;
            let sql = format!(
                "SELECT {} FROM cart_items ci
                 JOIN carts c ON c.id = ci.cart_id
                 WHERE c.user_id = ?1
                 ORDER BY ci.id LIMIT ?2 OFFSET ?3",
                CART_ITEM_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id, page.limit as i64, page.offset as i64], cart_item_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok((rows, total as u64))
        })
    }

    pub fn get_cart_item(&self, user_id: i64, item_id: i64) -> Result<Option<CartItemRow>, DbError> {
        self.with_conn(|conn| owned_cart_item(conn, user_id, item_id))
    }

    /// Put `quantity` units of a product in the user's cart.
    ///
    /// A new line reserves `quantity` units. If the product is already in
    /// the cart, the line's quantity is replaced and only the difference is
    /// reserved (or returned).
    pub fn add_to_cart(&self, user_id: i64, product_id: i64, quantity: i64) -> Result<CartWrite, DbError> {
        check_quantity(quantity)?;

        self.with_tx(|tx| {
            let cart_id = cart_id_for_user(tx, user_id)?.ok_or(DbError::NotFound("Cart"))?;

            let existing: Option<(i64, i64)> = tx
                .query_row(
                    "SELECT id, quantity FROM cart_items WHERE cart_id = ?1 AND product_id = ?2",
                    [cart_id, product_id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;

            match existing {
                Some((item_id, previous)) => {
                    reconcile_stock(tx, product_id, quantity - previous)?;
                    tx.execute(
                        "UPDATE cart_items SET quantity = ?2 WHERE id = ?1",
                        [item_id, quantity],
                    )?;
                    Ok(CartWrite { item_id, created: false })
                }
                None => {
                    reconcile_stock(tx, product_id, quantity)?;
                    tx.execute(
                        "INSERT INTO cart_items (cart_id, product_id, quantity) VALUES (?1, ?2, ?3)",
                        [cart_id, product_id, quantity],
                    )?;
                    Ok(CartWrite {
                        item_id: tx.last_insert_rowid(),
                        created: true,
                    })
                }
            }
        })
    }

    /// Change a line's quantity; the difference against the stored quantity
    /// is reserved from (or returned to) the product's stock.
    pub fn set_cart_item_quantity(
        &self,
        user_id: i64,
        item_id: i64,
        quantity: i64,
    ) -> Result<CartItemRow, DbError> {
        check_quantity(quantity)?;

        self.with_tx(|tx| {
            let mut item =
                owned_cart_item(tx, user_id, item_id)?.ok_or(DbError::NotFound("Cart item"))?;

            reconcile_stock(tx, item.product_id, quantity - item.quantity)?;
            tx.execute(
                "UPDATE cart_items SET quantity = ?2 WHERE id = ?1",
                [item_id, quantity],
            )?;

            item.quantity = quantity;
            Ok(item)
        })
    }

    /// Remove a line and return its units to stock.
    pub fn remove_cart_item(&self, user_id: i64, item_id: i64) -> Result<(), DbError> {
        self.with_tx(|tx| {
            let item =
                owned_cart_item(tx, user_id, item_id)?.ok_or(DbError::NotFound("Cart item"))?;

            reconcile_stock(tx, item.product_id, -item.quantity)?;
            tx.execute("DELETE FROM cart_items WHERE id = ?1", [item_id])?;
            Ok(())
        })
    }

    /// Empty the user's cart, returning every reserved unit to stock.
    /// Returns the number of lines removed.
    pub fn clear_cart(&self, user_id: i64) -> Result<usize, DbError> {
        self.with_tx(|tx| {
            let cart_id = cart_id_for_user(tx, user_id)?.ok_or(DbError::NotFound("Cart"))?;

            let mut stmt = tx.prepare("SELECT product_id, quantity FROM cart_items WHERE cart_id = ?1")?;
            let lines = stmt
                .query_map([cart_id], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            drop(stmt);

            for (product_id, quantity) in &lines {
                reconcile_stock(tx, *product_id, -quantity)?;
            }
            tx.execute("DELETE FROM cart_items WHERE cart_id = ?1", [cart_id])?;
            Ok(lines.len())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::fixtures;
    use std::sync::Arc;

    fn stock(db: &Database, product_id: i64) -> i64 {
        db.get_product(None, product_id).unwrap().unwrap().stock
    }

    #[test]
    fn insert_reserves_stock() {
        let db = Database::open_in_memory().unwrap();
        let user = fixtures::user(&db, "alice");
        let product = fixtures::product(&db, "Kettle", "19.99", 5);

        let write = db.add_to_cart(user, product, 3).unwrap();
        assert!(write.created);
        assert_eq!(stock(&db, product), 2);
    }

    #[test]
    fn insert_beyond_stock_is_rejected_without_side_effects() {
        let db = Database::open_in_memory().unwrap();
        let user = fixtures::user(&db, "alice");
        let product = fixtures::product(&db, "Kettle", "19.99", 5);

        let err = db.add_to_cart(user, product, 6).unwrap_err();
        assert!(matches!(
            err,
            DbError::InsufficientStock { requested: 6, available: 5, .. }
        ));
        assert_eq!(stock(&db, product), 5);
        let (items, _) = db.list_cart_items(user, PageRequest::all()).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn update_beyond_remaining_stock_is_rejected() {
        // Stock 5, reserve 3 (stock 2), then ask for 6: delta 3 > 2.
        let db = Database::open_in_memory().unwrap();
        let user = fixtures::user(&db, "alice");
        let product = fixtures::product(&db, "Kettle", "19.99", 5);

        db.add_to_cart(user, product, 3).unwrap();
        let err = db.add_to_cart(user, product, 6).unwrap_err();
        assert!(matches!(err, DbError::InsufficientStock { .. }));

        assert_eq!(stock(&db, product), 2);
        let (items, _) = db.list_cart_items(user, PageRequest::all()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 3);
    }

    #[test]
    fn update_moves_stock_by_exact_delta() {
        let db = Database::open_in_memory().unwrap();
        let user = fixtures::user(&db, "alice");
        let product = fixtures::product(&db, "Kettle", "19.99", 10);

        let write = db.add_to_cart(user, product, 2).unwrap();
        db.set_cart_item_quantity(user, write.item_id, 7).unwrap();
        assert_eq!(stock(&db, product), 3);

        let item = db.set_cart_item_quantity(user, write.item_id, 4).unwrap();
        assert_eq!(item.quantity, 4);
        assert_eq!(stock(&db, product), 6);

        let again = db.add_to_cart(user, product, 5).unwrap();
        assert!(!again.created);
        assert_eq!(again.item_id, write.item_id);
        assert_eq!(stock(&db, product), 5);
    }

    #[test]
    fn update_can_consume_all_remaining_stock() {
        let db = Database::open_in_memory().unwrap();
        let user = fixtures::user(&db, "alice");
        let product = fixtures::product(&db, "Kettle", "19.99", 5);

        let write = db.add_to_cart(user, product, 3).unwrap();
        db.set_cart_item_quantity(user, write.item_id, 5).unwrap();
        assert_eq!(stock(&db, product), 0);
    }

    #[test]
    fn zero_quantity_is_invalid() {
        let db = Database::open_in_memory().unwrap();
        let user = fixtures::user(&db, "alice");
        let product = fixtures::product(&db, "Kettle", "19.99", 5);

        assert!(matches!(
            db.add_to_cart(user, product, 0),
            Err(DbError::InvalidQuantity(0))
        ));
        let write = db.add_to_cart(user, product, 1).unwrap();
        assert!(matches!(
            db.set_cart_item_quantity(user, write.item_id, -2),
            Err(DbError::InvalidQuantity(-2))
        ));
        assert_eq!(stock(&db, product), 4);
    }

    #[test]
    fn oversized_quantity_is_invalid() {
        let db = Database::open_in_memory().unwrap();
        let user = fixtures::user(&db, "alice");
        let product = fixtures::product(&db, "Kettle", "19.99", MAX_QUANTITY);

        assert!(matches!(
            db.add_to_cart(user, product, i64::MAX),
            Err(DbError::InvalidQuantity(i64::MAX))
        ));
        assert!(db.add_to_cart(user, product, MAX_QUANTITY).is_ok());
        assert_eq!(stock(&db, product), 0);
    }

    #[test]
    fn unknown_product_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let user = fixtures::user(&db, "alice");
        assert!(matches!(
            db.add_to_cart(user, 404, 1),
            Err(DbError::NotFound("Product"))
        ));
    }

    #[test]
    fn removing_an_item_restores_stock() {
        let db = Database::open_in_memory().unwrap();
        let user = fixtures::user(&db, "alice");
        let product = fixtures::product(&db, "Kettle", "19.99", 5);

        let write = db.add_to_cart(user, product, 4).unwrap();
        db.remove_cart_item(user, write.item_id).unwrap();
        assert_eq!(stock(&db, product), 5);
        assert!(db.get_cart_item(user, write.item_id).unwrap().is_none());
    }

    #[test]
    fn clear_cart_restores_every_line() {
        let db = Database::open_in_memory().unwrap();
        let user = fixtures::user(&db, "alice");
        let kettle = fixtures::product(&db, "Kettle", "19.99", 5);
        let toaster = fixtures::product(&db, "Toaster", "29.99", 2);

        db.add_to_cart(user, kettle, 3).unwrap();
        db.add_to_cart(user, toaster, 2).unwrap();

        assert_eq!(db.clear_cart(user).unwrap(), 2);
        assert_eq!(stock(&db, kettle), 5);
        assert_eq!(stock(&db, toaster), 2);
        let cart = db.get_cart_for_user(user).unwrap().unwrap();
        assert!(db.get_cart_items(&[cart.id]).unwrap().is_empty());
    }

    #[test]
    fn items_are_invisible_to_other_users() {
        let db = Database::open_in_memory().unwrap();
        let alice = fixtures::user(&db, "alice");
        let bob = fixtures::user(&db, "bob");
        let product = fixtures::product(&db, "Kettle", "19.99", 5);

        let write = db.add_to_cart(alice, product, 1).unwrap();
        assert!(db.get_cart_item(bob, write.item_id).unwrap().is_none());
        assert!(matches!(
            db.set_cart_item_quantity(bob, write.item_id, 2),
            Err(DbError::NotFound("Cart item"))
        ));
        assert!(matches!(
            db.remove_cart_item(bob, write.item_id),
            Err(DbError::NotFound("Cart item"))
        ));
        assert_eq!(stock(&db, product), 4);
    }

    #[test]
    fn second_cart_is_a_conflict() {
        let db = Database::open_in_memory().unwrap();
        let user = fixtures::user(&db, "alice");
        assert!(matches!(db.create_cart(user), Err(DbError::Conflict(_))));
        let (carts, total) = db.list_carts(user, PageRequest::all()).unwrap();
        assert_eq!((carts.len(), total), (1, 1));
    }

    #[test]
    fn concurrent_reservations_never_oversell() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let product = fixtures::product(&db, "Kettle", "19.99", 5);
        let users: Vec<i64> = (0..12)
            .map(|i| fixtures::user(&db, &format!("user{}", i)))
            .collect();

        let handles: Vec<_> = users
            .into_iter()
            .map(|user| {
                let db = db.clone();
                std::thread::spawn(move || db.add_to_cart(user, product, 1).is_ok())
            })
            .collect();

        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(accepted, 5);
        assert_eq!(stock(&db, product), 0);
    }
}
