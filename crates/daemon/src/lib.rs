pub mod cli;
pub mod config;
#[cfg(feature = "fuse")]
pub mod fuse;
pub mod logging;

pub use cli::Cli;
pub use config::{ConfigError, FileConfig, MountConfig};
