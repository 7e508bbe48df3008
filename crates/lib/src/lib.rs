//! Skillrt core library: skill scanning, manifest validation, handler resolution,
//! the live tool registry, dispatch, and runtime tool authoring.

pub mod config;
pub mod exec;
pub mod init;
pub mod runtime;
pub mod skills;
pub mod tools;

pub use runtime::{LoadReport, RuntimeOptions, SkillRuntime};
