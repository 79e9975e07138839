pub mod app;
pub mod batch;
pub mod builder;
pub mod cache_key;
pub mod config;
pub mod domain;
pub mod error;
pub mod expression;
pub mod memo;
pub mod output;
pub mod resolver;
pub mod schema;
pub mod store;
pub mod stringdb;
