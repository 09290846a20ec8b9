pub mod cache;
pub mod config;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod github;
pub mod group;
pub mod http;
pub mod model;
pub mod normalize;
pub mod render;
pub mod retry;
pub mod runtime;
pub mod services;
pub mod session;
pub mod store;
