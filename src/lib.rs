pub mod client;
pub mod config;
pub mod credential;
pub mod error;
pub mod metadata;
pub mod model;
pub mod names;
pub mod services;
pub mod settings;
pub mod site;
pub mod updater;

pub use error::{Result, SharePointError};
