//! Authentication and authorization
//!
//! Admin accounts, argon2 password hashing, the three-tier role hierarchy
//! and the failed-login limiter.

pub mod auth;
pub mod rate_limit;
pub mod roles;

pub use auth::{AdminUser, Authenticator, BootstrapOutcome};
pub use rate_limit::LoginRateLimiter;
pub use roles::Role;
