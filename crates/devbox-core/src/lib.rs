pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod io;
pub mod machine;
pub mod paths;
pub mod render;
pub mod sequence;
pub mod step;
pub mod tools;
pub mod vars;

pub use error::{DevboxError, Result};
