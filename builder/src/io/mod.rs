//! I/O adapters for builder commands: configuration, sandbox, code memory,
//! oracle bridge and transcripts.

pub mod code_store;
pub mod config;
pub mod init;
pub mod oracle;
pub mod process;
pub mod prompt;
pub mod sandbox;
pub mod transcript;
