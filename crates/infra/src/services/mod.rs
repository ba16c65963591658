//! Application services over the datastore, gateway and storage capabilities.

pub mod payments;
pub mod tokens;
