//! Database initialization and song persistence

pub mod init;
pub mod songs;

pub use init::*;
pub use songs::*;
