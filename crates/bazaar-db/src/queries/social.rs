use rusqlite::{Connection, OptionalExtension, Row};

use crate::models::{FavoriteRow, LikeRow, PageRequest};
use crate::{Database, DbError};

fn ensure_product(conn: &Connection, product_id: i64) -> Result<(), DbError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM products WHERE id = ?1)",
        [product_id],
        |r| r.get(0),
    )?;
    if exists { Ok(()) } else { Err(DbError::NotFound("Product")) }
}

fn like_from_row(row: &Row<'_>) -> rusqlite::Result<LikeRow> {
    Ok(LikeRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        product_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn favorite_from_row(row: &Row<'_>) -> rusqlite::Result<FavoriteRow> {
    Ok(FavoriteRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        product_id: row.get(2)?,
        added_at: row.get(3)?,
    })
}

impl Database {
    // -- Product likes --

    /// Idempotent like. Returns the like and whether it was newly created.
    pub fn like_product(&self, user_id: i64, product_id: i64) -> Result<(LikeRow, bool), DbError> {
        self.with_tx(|tx| {
            ensure_product(tx, product_id)?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO likes (user_id, product_id) VALUES (?1, ?2)",
                [user_id, product_id],
            )?;
            let like = tx.query_row(
                "SELECT id, user_id, product_id, created_at FROM likes
                 WHERE user_id = ?1 AND product_id = ?2",
                [user_id, product_id],
                like_from_row,
            )?;
            Ok((like, inserted > 0))
        })
    }

    /// Returns `false` when there was no like to remove.
    pub fn unlike_product(&self, user_id: i64, product_id: i64) -> Result<bool, DbError> {
        self.with_tx(|tx| {
            ensure_product(tx, product_id)?;
            let deleted = tx.execute(
                "DELETE FROM likes WHERE user_id = ?1 AND product_id = ?2",
                [user_id, product_id],
            )?;
            Ok(deleted > 0)
        })
    }

    pub fn list_likes(&self, user_id: i64, page: PageRequest) -> Result<(Vec<LikeRow>, u64), DbError> {
        self.with_conn(|conn| {
            let total: i64 =
                conn.query_row("SELECT COUNT(*) FROM likes WHERE user_id = ?1", [user_id], |r| {
                    r.get(0)
                })?;
            let mut stmt = conn.prepare(
                "SELECT id, user_id, product_id, created_at FROM likes
                 WHERE user_id = ?1 ORDER BY id LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map([user_id, page.limit as i64, page.offset as i64], like_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok((rows, total as u64))
        })
    }

    /// A like owned by `user_id`; other users' likes are invisible.
    pub fn get_like(&self, user_id: i64, id: i64) -> Result<Option<LikeRow>, DbError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, user_id, product_id, created_at FROM likes WHERE id = ?1 AND user_id = ?2",
                    [id, user_id],
                    like_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn delete_like(&self, user_id: i64, id: i64) -> Result<(), DbError> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute(
                "DELETE FROM likes WHERE id = ?1 AND user_id = ?2",
                [id, user_id],
            )?;
            if deleted == 0 {
                return Err(DbError::NotFound("Like"));
            }
            Ok(())
        })
    }

    // -- Favorites --

    pub fn add_favorite(&self, user_id: i64, product_id: i64) -> Result<FavoriteRow, DbError> {
        self.with_tx(|tx| {
            ensure_product(tx, product_id)?;
            tx.execute(
                "INSERT INTO favorites (user_id, product_id) VALUES (?1, ?2)",
                [user_id, product_id],
            )
            .map_err(|e| {
                if DbError::is_constraint_violation(&e) {
                    DbError::Conflict("product is already a favorite".into())
                } else {
                    e.into()
                }
            })?;
            let row = tx.query_row(
                "SELECT id, user_id, product_id, added_at FROM favorites WHERE id = ?1",
                [tx.last_insert_rowid()],
                favorite_from_row,
            )?;
            Ok(row)
        })
    }

    pub fn list_favorites(
        &self,
        user_id: i64,
        page: PageRequest,
    ) -> Result<(Vec<FavoriteRow>, u64), DbError> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM favorites WHERE user_id = ?1",
                [user_id],
                |r| r.get(0),
            )?;
            let mut stmt = conn.prepare(
                "SELECT id, user_id, product_id, added_at FROM favorites
                 WHERE user_id = ?1 ORDER BY id LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map([user_id, page.limit as i64, page.offset as i64], favorite_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok((rows, total as u64))
        })
    }

    pub fn get_favorite(&self, user_id: i64, id: i64) -> Result<Option<FavoriteRow>, DbError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, user_id, product_id, added_at FROM favorites WHERE id = ?1 AND user_id = ?2",
                    [id, user_id],
                    favorite_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn delete_favorite(&self, user_id: i64, id: i64) -> Result<(), DbError> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute(
                "DELETE FROM favorites WHERE id = ?1 AND user_id = ?2",
                [id, user_id],
            )?;
            if deleted == 0 {
                return Err(DbError::NotFound("Favorite"));
            }
            Ok(())
        })
    }
}
