// NoteVault Core - Domain Logic & Ports
// NO infrastructure dependencies (Hexagonal Architecture)

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod port;

pub use config::{BackupConfig, NotevaultConfig, PoolConfig};
pub use error::{AppError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
