pub mod blob;
pub mod config;
pub mod naming;
pub mod types;
