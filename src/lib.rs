//! Declarative provisioning of a static website: a private bucket fronted by
//! a distribution that reads it through an access identity, with content
//! publishing and a local edge emulator.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
