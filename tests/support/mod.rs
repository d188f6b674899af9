//! Shared test support: rstest fixtures and workspace helpers.

pub mod helpers;

pub mod fixtures;
