pub mod config;
pub mod document;
pub mod entity;
pub mod error;
pub mod merge;

pub use config::Config;
pub use document::*;
pub use entity::*;
pub use error::*;
