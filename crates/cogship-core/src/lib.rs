pub mod config;
pub mod credential;
pub mod dispatch;
pub mod error;
pub mod io;
pub mod orchestrator;
pub mod paths;
pub mod push_tool;
pub mod registry;
pub mod render;
pub mod types;

pub use error::{CogshipError, Result};
