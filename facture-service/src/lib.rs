pub mod config;
pub mod dtos;
pub mod error;
pub mod export;
pub mod handlers;
pub mod models;
pub mod rendering;
pub mod services;
pub mod startup;

pub use startup::{AppState, Application};
