//! Domain layer records and validation.

pub mod entities;
pub mod error;
