//! deploygate — approval gating engine, exposed as a library crate for
//! integration testing and embedding.

pub mod config;
pub mod engine;
pub mod errors;
pub mod jobs;
pub mod lock;
pub mod models;
pub mod notification;
pub mod store;
