// Middleware modules for the headshot backend

pub mod auth;
pub mod auth_middleware;

pub use auth::{AuthenticatedUser, MaybeUser};
pub use auth_middleware::{auth_middleware, resolve_user};
