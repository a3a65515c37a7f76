pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod live;
pub mod model;
pub mod protocol;
pub mod sync;
