//! CLI Commands

pub mod artifact;
pub mod process;
