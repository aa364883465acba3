//! Geo-ranked mosque directory resolver.

pub mod config;
pub mod entity;
pub mod geo;
pub mod server;
