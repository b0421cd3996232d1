//! # txguard-core
//! Foundation types and traits shared by the txguard policy layer and the
//! access-control service.

pub mod address;
pub mod clock;
pub mod constants;
pub mod error;
pub mod traits;
pub mod types;
