//! hoist CLI - publish application bundles to OCI registries.

pub mod commands;
pub mod output;
