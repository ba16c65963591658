//! Payment domain: token packages, payment records and their status machine.
//!
//! Pure domain logic only. Talking to a payment provider and persisting
//! records is done by `clipcredit-infra`.

pub mod catalog;
pub mod record;

pub use catalog::{Currency, Money, TokenPackage, find_package, list_packages};
pub use record::{
    CaptureOutcome, NewPayment, PaymentProvider, PaymentRecord, PaymentStatus, TransitionError,
};
