//! Pimedia library exports for testing.
//!
//! This module exposes internal components for integration testing.

pub mod clean;
pub mod common;
pub mod config;
pub mod diskutil;
pub mod download;
pub mod firmware;
pub mod initramfs;
pub mod media;
pub mod osimage;
pub mod partition;
pub mod preflight;
pub mod process;
pub mod scripts;
pub mod validate;
