pub mod availability;
pub mod config;
pub mod error;
pub mod gateway;
pub mod parser;
pub mod resolver;
pub mod scheduler;
pub mod types;
