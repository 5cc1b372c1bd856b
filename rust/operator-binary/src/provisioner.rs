//! Signs CSRs with the certificate authority configured by one issuer.

use std::{
    collections::{BTreeMap, HashMap},
    fmt::Debug,
    sync::{Arc, OnceLock, PoisonError, RwLock},
    time::Duration,
};

use openssl::x509::X509Req;
use snafu::{ensure, OptionExt as _, ResultExt as _, Snafu};
use stackable_operator::k8s_openapi::chrono;
use tracing::{debug, info};

use crate::{
    ca_client::{
        self, BuildError, CertificateAuthorityClient, CertificateAuthorityClientBuilder,
        CertificateBundleType, CreateCertificate,
    },
    crd::{IssuerConfig, IssuerKey},
    utils::Clock,
};

/// Lifetime of issued certificates when the request does not ask for one.
pub const DEFAULT_DURATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Tag attached to every certificate created in the CA, marking who manages it.
pub const MANAGED_BY_TAG: (&str, &str) = ("cert-manager", "true");

#[derive(Debug, Snafu)]
pub enum ValidateError {
    #[snafu(display("failed to get certificate authority {authority_id}"))]
    GetAuthority {
        source: ca_client::Error,
        authority_id: String,
    },

    #[snafu(display("certificate authority {expected} was returned as {actual}"))]
    AuthorityMismatch { expected: String, actual: String },
}

#[derive(Debug, Snafu)]
pub enum SignError {
    #[snafu(display("failed to decode CSR"))]
    DecodeCsr { source: openssl::error::ErrorStack },

    #[snafu(display("failed to encode CSR"))]
    EncodeCsr { source: openssl::error::ErrorStack },

    #[snafu(display("requested certificate lifetime {duration:?} is out of range"))]
    DurationOutOfRange { duration: Duration },

    #[snafu(display("failed to create certificate {name}"))]
    CreateCertificate {
        source: ca_client::Error,
        name: String,
    },

    #[snafu(display("failed to get certificate bundle of {certificate_id}"))]
    GetCertificateBundle {
        source: ca_client::Error,
        certificate_id: String,
    },
}

/// Signs certificates on behalf of one issuer.
///
/// Immutable once built. A changed issuer configuration gets a new provisioner, see
/// [`ProvisionerCollection::get_or_build`].
pub struct Provisioner {
    client: Arc<dyn CertificateAuthorityClient>,
    config: IssuerConfig,
    clock: Arc<dyn Clock>,
    /// Compartment of the certificate authority, learned by [`Self::validate`].
    authority_compartment: OnceLock<String>,
}

impl Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("authority_id", &self.config.authority_id)
            .finish_non_exhaustive()
    }
}

impl Provisioner {
    pub fn new(
        client: Arc<dyn CertificateAuthorityClient>,
        config: IssuerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            config,
            clock,
            authority_compartment: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &IssuerConfig {
        &self.config
    }

    /// Checks that the configured certificate authority is reachable with our credentials.
    pub async fn validate(&self) -> Result<(), ValidateError> {
        let authority_id = &self.config.authority_id;
        let authority = self
            .client
            .get_certificate_authority(authority_id)
            .await
            .context(GetAuthoritySnafu { authority_id })?;
        ensure!(
            &authority.id == authority_id,
            AuthorityMismatchSnafu {
                expected: authority_id,
                actual: authority.id,
            }
        );
        if let Some(compartment_id) = authority.compartment_id {
            let _ = self.authority_compartment.set(compartment_id);
        }
        Ok(())
    }

    /// Compartment for new certificates: the configured one, else the authority's own (once
    /// known).
    fn compartment_id(&self) -> Option<String> {
        self.config
            .compartment_id
            .clone()
            .or_else(|| self.authority_compartment.get().cloned())
    }

    /// Signs `csr_pem`, returning the PEM-encoded certificate chain (leaf first).
    ///
    /// `name` names both the certificate and its version in the CA, and must be unique within
    /// the compartment.
    pub async fn sign(
        &self,
        csr_pem: &[u8],
        name: &str,
        duration: Option<Duration>,
    ) -> Result<Vec<u8>, SignError> {
        let csr = X509Req::from_pem(csr_pem).context(DecodeCsrSnafu)?;
        let csr_pem = String::from_utf8_lossy(&csr.to_pem().context(EncodeCsrSnafu)?).into_owned();

        let duration = duration.unwrap_or(DEFAULT_DURATION);
        let not_before = self.clock.now();
        let not_after = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|lifetime| not_before.checked_add_signed(lifetime))
            .context(DurationOutOfRangeSnafu { duration })?;

        let certificate = self
            .client
            .create_certificate(&CreateCertificate {
                issuer_authority_id: self.config.authority_id.clone(),
                compartment_id: self.compartment_id(),
                name: name.to_string(),
                csr_pem,
                not_before,
                not_after,
                tags: BTreeMap::from([(
                    MANAGED_BY_TAG.0.to_string(),
                    MANAGED_BY_TAG.1.to_string(),
                )]),
            })
            .await
            .context(CreateCertificateSnafu { name })?;
        debug!(certificate_id = %certificate.id, %not_after, "created certificate");

        let chain = self
            .client
            .get_certificate_bundle(&certificate, name, CertificateBundleType::WithPrivateKey)
            .await
            .context(GetCertificateBundleSnafu {
                certificate_id: &certificate.id,
            })?;
        Ok(chain.into_bytes())
    }
}

/// The [`Provisioner`] of every known issuer.
#[derive(Debug, Default)]
pub struct ProvisionerCollection {
    provisioners: RwLock<HashMap<IssuerKey, Arc<Provisioner>>>,
}

impl ProvisionerCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &IssuerKey) -> Option<Arc<Provisioner>> {
        self.provisioners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Registers `provisioner` for `key`, replacing any previous one.
    pub fn store(&self, key: IssuerKey, provisioner: Arc<Provisioner>) {
        self.provisioners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, provisioner);
    }

    pub fn remove(&self, key: &IssuerKey) -> Option<Arc<Provisioner>> {
        self.provisioners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Returns the provisioner for `key`, building a new one if there is none or if it was built
    /// from a different configuration.
    pub fn get_or_build(
        &self,
        key: &IssuerKey,
        config: &IssuerConfig,
        builder: &dyn CertificateAuthorityClientBuilder,
        clock: &Arc<dyn Clock>,
    ) -> Result<Arc<Provisioner>, BuildError> {
        if let Some(provisioner) = self.get(key).filter(|p| &p.config == config) {
            return Ok(provisioner);
        }

        let mut provisioners = self
            .provisioners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        // Another reconciler may have built it while we waited for the lock.
        if let Some(provisioner) = provisioners.get(key).filter(|p| &p.config == config) {
            return Ok(provisioner.clone());
        }
        let replaced = provisioners.contains_key(key);
        let provisioner = Arc::new(Provisioner::new(
            builder.build(config)?,
            config.clone(),
            clock.clone(),
        ));
        provisioners.insert(key.clone(), provisioner.clone());
        info!(issuer = %key, replaced, "built provisioner");
        Ok(provisioner)
    }
}
