//! CRDs owned by other projects, that we only read and update.

pub mod cert_manager;
