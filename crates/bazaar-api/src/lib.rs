pub mod auth;
pub mod cache;
pub mod cart;
pub mod catalog;
pub mod comments;
pub mod error;
pub mod extract;
pub mod favorites;
pub mod likes;
pub mod media;
pub mod middleware;
pub mod pagination;
pub mod routes;
pub mod serializers;
pub mod state;

pub use error::ApiError;
pub use routes::router;
pub use state::{AppState, AppStateInner, JwtSettings};
