pub mod app;
pub mod chunk;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod output;
pub mod remap;
pub mod store;
