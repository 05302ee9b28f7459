pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod relay;
pub mod storage;
