//! Helpers shared between the OCI private CA issuer components.

pub mod pem;
