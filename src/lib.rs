pub mod constants;
pub mod db;
pub mod handlers;
pub mod health;
pub mod logging;
pub mod main_helper;
pub mod persistence;
pub mod redaction;
pub mod registry;
pub mod specs;
pub mod store;
pub mod streaming;
pub mod translator;
pub mod types;
pub mod upstream;

pub use types::*;

pub use main_helper::{AppState, Args};
