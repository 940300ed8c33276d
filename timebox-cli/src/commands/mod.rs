pub mod alerts;
pub mod config;
pub mod resource;
pub mod tick;
