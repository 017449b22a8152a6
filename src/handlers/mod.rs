pub mod config;
pub mod rooms;

pub use config::*;
pub use rooms::*;
