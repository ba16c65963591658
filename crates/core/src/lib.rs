//! Identifiers and marker traits shared by every clipcredit crate.
//!
//! Pure domain primitives only: no IO, no async, no persistence concerns.

pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use entity::Entity;
pub use error::DomainError;
pub use id::{PaymentId, ProjectId, TransactionId, UploadId, UserId};
pub use value_object::ValueObject;
