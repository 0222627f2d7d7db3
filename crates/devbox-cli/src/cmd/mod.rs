pub mod apply;
pub mod config;
pub mod init;
pub mod plan;
pub mod vagrant;
pub mod vault;
