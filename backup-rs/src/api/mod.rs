//! REST API
//!
//! All authorization decisions live here on the server side; clients only
//! ever see the results.

pub mod admin;
pub mod auth;
pub mod backup;
pub mod domains;
pub mod emails;
pub mod exports;
pub mod handlers;
pub mod server;
pub mod users;

pub use server::ApiServer;
