use rusqlite::{Connection, OptionalExtension, Row};

use crate::models::{CommentView, PageRequest};
use crate::{Database, DbError};

/// Hydrated comment columns; `?1` is the viewer's user id (or NULL).
const COMMENT_SELECT: &str = "
    SELECT c.id, c.user_id, u.username, c.product_id, p.name, c.comment, c.created_at,
           (SELECT COUNT(*) FROM comment_likes cl WHERE cl.comment_id = c.id),
           EXISTS(SELECT 1 FROM comment_likes cl WHERE cl.comment_id = c.id AND cl.user_id = ?1)
    FROM comments c
    JOIN users u ON u.id = c.user_id
    JOIN products p ON p.id = c.product_id";

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<CommentView> {
    Ok(CommentView {
        id: row.get(0)?,
        user_id: row.get(1)?,
        username: row.get(2)?,
        product_id: row.get(3)?,
        product_name: row.get(4)?,
        comment: row.get(5)?,
        created_at: row.get(6)?,
        like_count: row.get::<_, i64>(7)? as u64,
        is_liked: row.get(8)?,
    })
}

fn query_comment(
    conn: &Connection,
    viewer: Option<i64>,
    id: i64,
) -> Result<Option<CommentView>, DbError> {
    let sql = format!("{} WHERE c.id = ?2", COMMENT_SELECT);
    let row = conn
        .query_row(&sql, rusqlite::params![viewer, id], comment_from_row)
        .optional()?;
    Ok(row)
}

fn ensure_comment(conn: &Connection, id: i64) -> Result<(), DbError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM comments WHERE id = ?1)",
        [id],
        |r| r.get(0),
    )?;
    if exists { Ok(()) } else { Err(DbError::NotFound("Comment")) }
}

impl Database {
    pub fn create_comment(
        &self,
        user_id: i64,
        product_id: i64,
        body: &str,
    ) -> Result<CommentView, DbError> {
        self.with_tx(|tx| {
            let product_exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM products WHERE id = ?1)",
                [product_id],
                |r| r.get(0),
            )?;
            if !product_exists {
                return Err(DbError::NotFound("Product"));
            }

            tx.execute(
                "INSERT INTO comments (user_id, product_id, comment) VALUES (?1, ?2, ?3)",
                rusqlite::params![user_id, product_id, body],
            )?;
            query_comment(tx, Some(user_id), tx.last_insert_rowid())?
                .ok_or(DbError::NotFound("Comment"))
        })
    }

    pub fn get_comment(&self, viewer: Option<i64>, id: i64) -> Result<Option<CommentView>, DbError> {
        self.with_conn(|conn| query_comment(conn, viewer, id))
    }

    pub fn list_comments(
        &self,
        viewer: Option<i64>,
        page: PageRequest,
    ) -> Result<(Vec<CommentView>, u64), DbError> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row("SELECT COUNT(*) FROM comments", [], |r| r.get(0))?;
            let sql = format!("{} ORDER BY c.id LIMIT ?2 OFFSET ?3", COMMENT_SELECT);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![viewer, page.limit as i64, page.offset as i64],
                    comment_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok((rows, total as u64))
        })
    }

    /// All comments on one product, oldest first. An unknown product simply
    /// has no comments.
    pub fn comments_for_product(
        &self,
        viewer: Option<i64>,
        product_id: i64,
    ) -> Result<Vec<CommentView>, DbError> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE c.product_id = ?2 ORDER BY c.id", COMMENT_SELECT);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![viewer, product_id], comment_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_comment(&self, id: i64, body: &str) -> Result<(), DbError> {
        self.with_conn_mut(|conn| {
            let updated = conn.execute(
                "UPDATE comments SET comment = ?2 WHERE id = ?1",
                rusqlite::params![id, body],
            )?;
            if updated == 0 {
                return Err(DbError::NotFound("Comment"));
            }
            Ok(())
        })
    }

    pub fn delete_comment(&self, id: i64) -> Result<(), DbError> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute("DELETE FROM comments WHERE id = ?1", [id])?;
            if deleted == 0 {
                return Err(DbError::NotFound("Comment"));
            }
            Ok(())
        })
    }

    // -- Comment likes --

    /// Idempotent; returns whether a new like was stored.
    pub fn like_comment(&self, user_id: i64, comment_id: i64) -> Result<bool, DbError> {
        self.with_tx(|tx| {
            ensure_comment(tx, comment_id)?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO comment_likes (user_id, comment_id) VALUES (?1, ?2)",
                [user_id, comment_id],
            )?;
            Ok(inserted > 0)
        })
    }

    /// Returns `false` when there was no like to remove.
    pub fn unlike_comment(&self, user_id: i64, comment_id: i64) -> Result<bool, DbError> {
        self.with_tx(|tx| {
            ensure_comment(tx, comment_id)?;
            let deleted = tx.execute(
                "DELETE FROM comment_likes WHERE user_id = ?1 AND comment_id = ?2",
                [user_id, comment_id],
            )?;
            Ok(deleted > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::fixtures;

    #[test]
    fn comment_view_carries_names_and_like_state() {
        let db = Database::open_in_memory().unwrap();
        let alice = fixtures::user(&db, "alice");
        let bob = fixtures::user(&db, "bob");
        let product = fixtures::product(&db, "Kettle", "19.99", 5);

        let comment = db.create_comment(alice, product, "Boils fast").unwrap();
        assert_eq!(comment.username, "alice");
        assert_eq!(comment.product_name, "Kettle");
        assert_eq!(comment.like_count, 0);

        assert!(db.like_comment(bob, comment.id).unwrap());
        assert!(!db.like_comment(bob, comment.id).unwrap());

        let for_bob = db.get_comment(Some(bob), comment.id).unwrap().unwrap();
        assert!(for_bob.is_liked);
        assert_eq!(for_bob.like_count, 1);

        let for_alice = db.get_comment(Some(alice), comment.id).unwrap().unwrap();
        assert!(!for_alice.is_liked);

        assert!(db.unlike_comment(bob, comment.id).unwrap());
        assert!(!db.unlike_comment(bob, comment.id).unwrap());
    }

    #[test]
    fn comment_likes_are_independent_of_product_likes() {
        let db = Database::open_in_memory().unwrap();
        let alice = fixtures::user(&db, "alice");
        let product = fixtures::product(&db, "Kettle", "19.99", 5);
        let comment = db.create_comment(alice, product, "Nice").unwrap();

        db.like_comment(alice, comment.id).unwrap();
        let view = db.get_product(Some(alice), product).unwrap().unwrap();
        assert!(!view.is_liked);
        assert_eq!(view.like_count, 0);
    }

    #[test]
    fn comments_filter_by_product() {
        let db = Database::open_in_memory().unwrap();
        let alice = fixtures::user(&db, "alice");
        let kettle = fixtures::product(&db, "Kettle", "19.99", 5);
        let toaster = fixtures::product(&db, "Toaster", "29.99", 5);

        db.create_comment(alice, kettle, "one").unwrap();
        db.create_comment(alice, toaster, "two").unwrap();
        db.create_comment(alice, kettle, "three").unwrap();

        let bodies: Vec<_> = db
            .comments_for_product(None, kettle)
            .unwrap()
            .into_iter()
            .map(|c| c.comment)
            .collect();
        assert_eq!(bodies, ["one", "three"]);
        assert!(db.comments_for_product(None, 999).unwrap().is_empty());

        let (_, total) = db.list_comments(None, PageRequest::all()).unwrap();
        assert_eq!(total, 3);
    }

    #[test]
    fn commenting_on_missing_product_fails() {
        let db = Database::open_in_memory().unwrap();
        let alice = fixtures::user(&db, "alice");
        assert!(matches!(
            db.create_comment(alice, 7, "hello"),
            Err(DbError::NotFound("Product"))
        ));
    }
}
