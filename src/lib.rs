pub mod catalog;
pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod response;
pub mod server;
pub mod tools;
pub mod usage;
