//! Subcommands of the `lion-lease` binary

pub mod gaze;
pub mod locks;
pub mod scenario;
