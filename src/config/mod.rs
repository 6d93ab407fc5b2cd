//! Configuration helpers shared by the CLI commands.

mod duration;

pub use duration::parse_duration;
