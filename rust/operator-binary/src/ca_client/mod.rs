//! The operations we need from the external certificate authority service.
//!
//! Implementations make exactly one remote call per operation, and never retry.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use snafu::Snafu;
use stackable_operator::k8s_openapi::chrono::{DateTime, Utc};
use strum::IntoStaticStr;

use crate::crd::IssuerConfig;

pub mod oci;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateAuthority {
    pub id: String,
    pub compartment_id: Option<String>,
    pub name: Option<String>,
}

/// Request to sign a CSR with an existing certificate authority.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateCertificate {
    pub issuer_authority_id: String,
    /// Compartment that will own the certificate, left out of the request when unset.
    pub compartment_id: Option<String>,
    /// Name of the created certificate, also used as the name of its first version.
    pub name: String,
    pub csr_pem: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub tags: BTreeMap<String, String>,
}

/// Reference to a certificate created by [`CertificateAuthorityClient::create_certificate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateHandle {
    pub id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoStaticStr)]
pub enum CertificateBundleType {
    #[strum(serialize = "CERTIFICATE_CONTENT_WITH_PRIVATE_KEY")]
    WithPrivateKey,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("failed to build request to {url}"))]
    BuildRequest { source: reqwest::Error, url: String },

    #[snafu(display("failed to sign request to {url}"))]
    SignRequest {
        source: openssl::error::ErrorStack,
        url: String,
    },

    #[snafu(display("request to {url} contained an invalid header"))]
    InvalidHeader {
        source: reqwest::header::InvalidHeaderValue,
        url: String,
    },

    #[snafu(display("failed to serialize request body"))]
    SerializeBody { source: serde_json::Error },

    #[snafu(display("failed to send request to {url}"))]
    Send { source: reqwest::Error, url: String },

    #[snafu(display("failed to read response from {url}"))]
    ReadResponse { source: reqwest::Error, url: String },

    #[snafu(display("{url} responded with {status} ({code}): {message}"))]
    Service {
        url: String,
        status: u16,
        code: String,
        message: String,
    },

    #[snafu(display("failed to parse response from {url}"))]
    ParseResponse {
        source: serde_json::Error,
        url: String,
    },

    #[snafu(display("certificate bundle for {certificate_id} contains no certificates"))]
    EmptyBundle { certificate_id: String },
}

#[async_trait]
pub trait CertificateAuthorityClient: Send + Sync {
    async fn get_certificate_authority(
        &self,
        authority_id: &str,
    ) -> Result<CertificateAuthority, Error>;

    async fn create_certificate(
        &self,
        request: &CreateCertificate,
    ) -> Result<CertificateHandle, Error>;

    /// Returns the PEM-encoded certificate chain of one version of a certificate, leaf first.
    async fn get_certificate_bundle(
        &self,
        certificate: &CertificateHandle,
        version_name: &str,
        bundle_type: CertificateBundleType,
    ) -> Result<String, Error>;
}

#[derive(Debug, Snafu)]
pub enum BuildError {
    #[snafu(display("failed to build OCI client"), context(false))]
    Oci { source: oci::NewError },
}

/// Creates [`CertificateAuthorityClient`]s that authenticate with an issuer's credentials.
pub trait CertificateAuthorityClientBuilder: Send + Sync {
    fn build(
        &self,
        config: &IssuerConfig,
    ) -> Result<Arc<dyn CertificateAuthorityClient>, BuildError>;
}
