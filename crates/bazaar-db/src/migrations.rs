use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                username    TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                email       TEXT NOT NULL DEFAULT '',
                name        TEXT NOT NULL DEFAULT '',
                phone       TEXT,
                is_staff    INTEGER NOT NULL DEFAULT 0,
                date_joined TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_users_name ON users(name);
            CREATE INDEX idx_users_phone ON users(phone);

            CREATE TABLE auth_tokens (
                key         TEXT PRIMARY KEY,
                user_id     INTEGER NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE blacklisted_tokens (
                jti             TEXT PRIMARY KEY,
                user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                expires_at      INTEGER NOT NULL,
                blacklisted_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE categories (
                id      INTEGER PRIMARY KEY AUTOINCREMENT,
                name    TEXT NOT NULL,
                slug    TEXT NOT NULL UNIQUE,
                image   TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX idx_categories_name_slug ON categories(name, slug);

            CREATE TABLE products (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
                name        TEXT NOT NULL,
                description TEXT NOT NULL,
                price       TEXT NOT NULL,
                stock       INTEGER NOT NULL CHECK (stock >= 0),
                brand       TEXT NOT NULL,
                model       TEXT NOT NULL
            );

            CREATE INDEX idx_products_category ON products(category_id);

            CREATE TABLE images (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                product_id  INTEGER NOT NULL REFERENCES products(id) ON DELETE CASCADE,
                path        TEXT NOT NULL,
                sort_order  INTEGER NOT NULL DEFAULT 0 CHECK (sort_order >= 0)
            );

            CREATE INDEX idx_images_product ON images(product_id, sort_order);

            CREATE TABLE likes (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                product_id  INTEGER NOT NULL REFERENCES products(id) ON DELETE CASCADE,
                created_at  TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(user_id, product_id)
            );

            CREATE INDEX idx_likes_product ON likes(product_id);

            CREATE TABLE favorites (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                product_id  INTEGER NOT NULL REFERENCES products(id) ON DELETE CASCADE,
                added_at    TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(user_id, product_id)
            );

            CREATE TABLE comments (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                product_id  INTEGER NOT NULL REFERENCES products(id) ON DELETE CASCADE,
                comment     TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_comments_product ON comments(product_id);

            CREATE TABLE comment_likes (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                comment_id  INTEGER NOT NULL REFERENCES comments(id) ON DELETE CASCADE,
                created_at  TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(user_id, comment_id)
            );

            CREATE INDEX idx_comment_likes_comment ON comment_likes(comment_id);

            CREATE TABLE carts (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     INTEGER NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE cart_items (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                cart_id     INTEGER NOT NULL REFERENCES carts(id) ON DELETE CASCADE,
                product_id  INTEGER NOT NULL REFERENCES products(id) ON DELETE CASCADE,
                quantity    INTEGER NOT NULL CHECK (quantity > 0),
                UNIQUE(cart_id, product_id)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
