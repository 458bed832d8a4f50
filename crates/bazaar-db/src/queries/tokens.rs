use rusqlite::OptionalExtension;

use crate::models::UserRow;
use crate::queries::users::user_from_row;
use crate::{Database, DbError};

impl Database {
    /// Returns the user's opaque token, inserting `candidate` if they have
    /// none yet. The flag reports whether a new token was stored.
    pub fn get_or_create_auth_token(
        &self,
        user_id: i64,
        candidate: &str,
    ) -> Result<(String, bool), DbError> {
        self.with_tx(|tx| {
            let existing: Option<String> = tx
                .query_row(
                    "SELECT key FROM auth_tokens WHERE user_id = ?1",
                    [user_id],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(key) = existing {
                return Ok((key, false));
            }

            tx.execute(
                "INSERT INTO auth_tokens (key, user_id) VALUES (?1, ?2)",
                rusqlite::params![candidate, user_id],
            )?;
            Ok((candidate.to_string(), true))
        })
    }

    pub fn get_user_by_auth_token(&self, key: &str) -> Result<Option<UserRow>, DbError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT u.id, u.username, u.password, u.email, u.name, u.phone, u.is_staff, u.date_joined
                     FROM auth_tokens t
                     JOIN users u ON u.id = t.user_id
                     WHERE t.key = ?1",
                    [key],
                    user_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Returns `false` when the user had no token.
    pub fn delete_auth_token(&self, user_id: i64) -> Result<bool, DbError> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute("DELETE FROM auth_tokens WHERE user_id = ?1", [user_id])?;
            Ok(deleted > 0)
        })
    }

    /// Blacklist a refresh token id. Expired entries are pruned on the way.
    pub fn blacklist_refresh_token(
        &self,
        jti: &str,
        user_id: i64,
        expires_at: i64,
    ) -> Result<(), DbError> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "DELETE FROM blacklisted_tokens WHERE expires_at < ?1",
                [chrono::Utc::now().timestamp()],
            )?;
            conn.execute(
                "INSERT OR IGNORE INTO blacklisted_tokens (jti, user_id, expires_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![jti, user_id, expires_at],
            )?;
            Ok(())
        })
    }

    pub fn is_refresh_token_blacklisted(&self, jti: &str) -> Result<bool, DbError> {
        self.with_conn(|conn| {
            let found: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM blacklisted_tokens WHERE jti = ?1)",
                [jti],
                |row| row.get(0),
            )?;
            Ok(found)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::fixtures;

    #[test]
    fn auth_token_is_created_once() {
        let db = Database::open_in_memory().unwrap();
        let id = fixtures::user(&db, "alice");

        let (first, created) = db.get_or_create_auth_token(id, "aaaa").unwrap();
        assert!(created);
        assert_eq!(first, "aaaa");

        let (second, created) = db.get_or_create_auth_token(id, "bbbb").unwrap();
        assert!(!created);
        assert_eq!(second, "aaaa");

        let user = db.get_user_by_auth_token("aaaa").unwrap().unwrap();
        assert_eq!(user.id, id);
        assert!(db.get_user_by_auth_token("bbbb").unwrap().is_none());
    }

    #[test]
    fn deleting_token_logs_out() {
        let db = Database::open_in_memory().unwrap();
        let id = fixtures::user(&db, "alice");
        db.get_or_create_auth_token(id, "aaaa").unwrap();

        assert!(db.delete_auth_token(id).unwrap());
        assert!(!db.delete_auth_token(id).unwrap());
        assert!(db.get_user_by_auth_token("aaaa").unwrap().is_none());
    }

    #[test]
    fn blacklist_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let id = fixtures::user(&db, "alice");
        let exp = chrono::Utc::now().timestamp() + 3600;

        assert!(!db.is_refresh_token_blacklisted("jti-1").unwrap());
        db.blacklist_refresh_token("jti-1", id, exp).unwrap();
        db.blacklist_refresh_token("jti-1", id, exp).unwrap();
        assert!(db.is_refresh_token_blacklisted("jti-1").unwrap());
    }
}
