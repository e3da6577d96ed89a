pub mod backup;
pub mod common;
pub mod completions;
pub mod config;
pub mod import;
pub mod status;
pub mod sync;
pub mod watch;
