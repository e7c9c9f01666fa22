pub mod auth;
pub mod chat;
pub mod document;
pub mod export;
pub mod health;
pub mod upload;
pub mod vision;
