mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{ServiceExt, extract::Request};
use tower::Layer;
use tower_http::cors::CorsLayer;
use tower_http::normalize_path::NormalizePathLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use bazaar_api::auth::hash_password;
use bazaar_api::cache::ResponseCache;
use bazaar_api::{AppState, AppStateInner, JwtSettings};
use bazaar_db::Database;
use bazaar_db::models::NewUser;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bazaar=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database and media storage
    let db = Database::open(&config.db_path)?;
    if let Some((username, password)) = &config.bootstrap_admin {
        ensure_admin(&db, username, password)?;
    }
    tokio::fs::create_dir_all(&config.media_dir).await?;

    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt: JwtSettings {
            secret: config.jwt_secret.clone(),
            access_ttl: chrono::Duration::minutes(config.access_token_minutes),
            refresh_ttl: chrono::Duration::hours(config.refresh_token_hours),
        },
        media_dir: config.media_dir.clone(),
        public_url: config.public_url.clone(),
        cache: ResponseCache::new(config.cache_ttl),
    });

    let app = bazaar_api::router(state)
        .nest_service("/media", ServeDir::new(&config.media_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());
    let app = NormalizePathLayer::trim_trailing_slash().layer(app);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Bazaar listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, ServiceExt::<Request>::into_make_service(app))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Create the bootstrap staff account, or promote it if it already exists.
fn ensure_admin(db: &Database, username: &str, password: &str) -> anyhow::Result<()> {
    match db.get_user_by_username(username)? {
        Some(user) if user.is_staff => {}
        Some(user) => {
            db.set_staff(user.id, true)?;
            info!("Promoted {} to staff", username);
        }
        None => {
            let password_hash =
                hash_password(password).map_err(|e| anyhow::anyhow!("hashing password: {}", e))?;
            db.create_user(&NewUser {
                username,
                password_hash: &password_hash,
                email: "",
                name: "",
                phone: None,
                is_staff: true,
            })?;
            info!("Created staff account {}", username);
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(_) => {
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_api::auth::verify_password;

    #[test]
    fn bootstrap_admin_is_created_once() {
        let db = Database::open_in_memory().unwrap();
        ensure_admin(&db, "root", "hunter22").unwrap();
        ensure_admin(&db, "root", "other-password").unwrap();

        let user = db.get_user_by_username("root").unwrap().unwrap();
        assert!(user.is_staff);
        assert!(verify_password("hunter22", &user.password));
    }

    #[test]
    fn existing_user_is_promoted() {
        let db = Database::open_in_memory().unwrap();
        let user = db
            .create_user(&NewUser {
                username: "ops",
                password_hash: "x",
                email: "",
                name: "",
                phone: None,
                is_staff: false,
            })
            .unwrap();

        ensure_admin(&db, "ops", "ignored").unwrap();
        assert!(db.get_user_by_id(user.id).unwrap().unwrap().is_staff);
    }
}
