//! Request handlers

pub mod collections;
pub mod health;
pub mod runs;
