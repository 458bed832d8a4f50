use rusqlite::{Connection, OptionalExtension, Row};
use tracing::info;

use crate::models::{NewUser, UserChanges, UserRow};
use crate::{Database, DbError};

const USER_SELECT: &str =
    "SELECT id, username, password, email, name, phone, is_staff, date_joined FROM users";

impl Database {
    /// Insert a user together with its cart. Both rows commit or neither does,
    /// so every user owns exactly one cart from the moment it exists.
    pub fn create_user(&self, new: &NewUser<'_>) -> Result<UserRow, DbError> {
        let user = self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO users (username, password, email, name, phone, is_staff)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    new.username,
                    new.password_hash,
                    new.email,
                    new.name,
                    new.phone,
                    new.is_staff
                ],
            )
            .map_err(|e| {
                if DbError::is_constraint_violation(&e) {
                    DbError::Conflict(format!("username '{}' is taken", new.username))
                } else {
                    e.into()
                }
            })?;
            let user_id = tx.last_insert_rowid();

            tx.execute("INSERT INTO carts (user_id) VALUES (?1)", [user_id])?;

            query_user(tx, "WHERE id = ?1", user_id)?.ok_or(DbError::NotFound("User"))
        })?;

        info!(user_id = user.id, "Created user '{}' with cart", user.username);
        Ok(user)
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>, DbError> {
        self.with_conn(|conn| query_user(conn, "WHERE username = ?1", username))
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>, DbError> {
        self.with_conn(|conn| query_user(conn, "WHERE id = ?1", id))
    }

    /// Apply profile changes. Never touches the user's cart.
    pub fn update_user(&self, id: i64, changes: &UserChanges) -> Result<UserRow, DbError> {
        self.with_tx(|tx| {
            let updated = tx.execute(
                "UPDATE users SET
                    email = COALESCE(?2, email),
                    name  = COALESCE(?3, name),
                    phone = COALESCE(?4, phone)
                 WHERE id = ?1",
                rusqlite::params![id, changes.email, changes.name, changes.phone],
            )?;
            if updated == 0 {
                return Err(DbError::NotFound("User"));
            }
            query_user(tx, "WHERE id = ?1", id)?.ok_or(DbError::NotFound("User"))
        })
    }

    pub fn set_staff(&self, id: i64, is_staff: bool) -> Result<(), DbError> {
        self.with_conn_mut(|conn| {
            let updated = conn.execute(
                "UPDATE users SET is_staff = ?2 WHERE id = ?1",
                rusqlite::params![id, is_staff],
            )?;
            if updated == 0 {
                return Err(DbError::NotFound("User"));
            }
            Ok(())
        })
    }
}

fn query_user<P: rusqlite::ToSql>(
    conn: &Connection,
    filter: &str,
    param: P,
) -> Result<Option<UserRow>, DbError> {
    let mut stmt = conn.prepare(&format!("{} {}", USER_SELECT, filter))?;
    let row = stmt.query_row([param], user_from_row).optional()?;
    Ok(row)
}

pub(crate) fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        email: row.get(3)?,
        name: row.get(4)?,
        phone: row.get(5)?,
        is_staff: row.get(6)?,
        date_joined: row.get(7)?,
    })
}
