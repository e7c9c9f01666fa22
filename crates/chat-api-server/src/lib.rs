pub mod auth;
pub mod config;
pub mod document;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod state;
pub mod utils;
