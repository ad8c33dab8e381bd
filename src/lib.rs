pub mod config;
pub mod conversation;
pub mod error;
pub mod expansion;
pub mod file_tree;
pub mod gateway;
pub mod handlers;
pub mod models;
pub mod project_store;
pub mod session;
pub mod utils;
