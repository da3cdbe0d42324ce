//! Shared utilities.

pub mod files;
