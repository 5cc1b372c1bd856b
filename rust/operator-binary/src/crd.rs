use std::fmt::{Debug, Display};

use serde::{Deserialize, Serialize};
use snafu::{ensure, Snafu};
use stackable_operator::{
    k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition,
    kube::{
        api::DynamicObject, runtime::reflector::ObjectRef, CustomResource, Resource,
    },
    schemars::{self, JsonSchema},
};

/// API group of the issuer resources, which `CertificateRequest`s must reference to be signed by us.
pub const GROUP: &str = "ocica.cert-manager.io";
pub const ISSUER_KIND: &str = "OCICAIssuer";
pub const CLUSTER_ISSUER_KIND: &str = "OCICAClusterIssuer";

/// A namespaced issuer, only usable by `CertificateRequest`s in the same namespace.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "ocica.cert-manager.io",
    version = "v1alpha1",
    kind = "OCICAIssuer",
    struct = "OciCaIssuer",
    namespaced,
    status = "IssuerStatus",
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct OciCaIssuerSpec {
    #[serde(flatten)]
    pub config: IssuerConfig,
}

/// A cluster-scoped issuer, usable by `CertificateRequest`s in any namespace.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "ocica.cert-manager.io",
    version = "v1alpha1",
    kind = "OCICAClusterIssuer",
    struct = "OciCaClusterIssuer",
    status = "IssuerStatus",
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct OciCaClusterIssuerSpec {
    #[serde(flatten)]
    pub config: IssuerConfig,
}

/// Identifies one OCI certificate authority and the API credentials used to reach it.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssuerConfig {
    /// OCID of the private certificate authority.
    #[serde(default)]
    pub authority_id: String,

    /// Compartment that issued certificates are created in.
    /// Defaults to the compartment of the certificate authority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compartment_id: Option<String>,

    #[serde(default)]
    pub secret_ref: OciCredentials,
}

/// OCI API signing key credentials.
#[derive(Serialize, Deserialize, Clone, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OciCredentials {
    #[serde(default)]
    pub tenancy: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub fingerprint: String,
    /// PEM-encoded API signing key.
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub private_key_passphrase: String,
}

impl Debug for OciCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OciCredentials")
            .field("tenancy", &self.tenancy)
            .field("user", &self.user)
            .field("region", &self.region)
            .field("fingerprint", &self.fingerprint)
            .field("private_key", &"<redacted>")
            .field("private_key_passphrase", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum ValidateError {
    #[snafu(display("{field} can not be empty in the issuer configuration"))]
    EmptyField { field: &'static str },
}

impl IssuerConfig {
    /// Checks that every field required to reach the certificate authority is set.
    ///
    /// Reports the first empty field, in schema order.
    pub fn validate(&self) -> Result<(), ValidateError> {
        let creds = &self.secret_ref;
        for (field, value) in [
            ("authorityId", &self.authority_id),
            ("tenancy", &creds.tenancy),
            ("user", &creds.user),
            ("region", &creds.region),
            ("fingerprint", &creds.fingerprint),
            ("privateKey", &creds.private_key),
            ("privateKeyPassphrase", &creds.private_key_passphrase),
        ] {
            ensure!(!value.is_empty(), EmptyFieldSnafu { field });
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssuerStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Common view over [`OciCaIssuer`] and [`OciCaClusterIssuer`].
pub trait Issuer:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + Send + Sync + 'static
{
    fn config(&self) -> &IssuerConfig;

    fn status_mut(&mut self) -> &mut IssuerStatus;
}

impl Issuer for OciCaIssuer {
    fn config(&self) -> &IssuerConfig {
        &self.spec.config
    }

    fn status_mut(&mut self) -> &mut IssuerStatus {
        self.status.get_or_insert_with(IssuerStatus::default)
    }
}

impl Issuer for OciCaClusterIssuer {
    fn config(&self) -> &IssuerConfig {
        &self.spec.config
    }

    fn status_mut(&mut self) -> &mut IssuerStatus {
        self.status.get_or_insert_with(IssuerStatus::default)
    }
}

/// Identity of an issuer resource. Cluster-scoped issuers have no namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IssuerKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl IssuerKey {
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn for_object<K: Resource>(issuer: &ObjectRef<K>) -> Self {
        Self {
            namespace: issuer.namespace.clone(),
            name: issuer.name.clone(),
        }
    }

    /// Reference to the issuer object, of the kind implied by the presence of a namespace.
    pub fn object_ref(&self) -> ObjectRef<DynamicObject> {
        match &self.namespace {
            Some(namespace) => ObjectRef::<OciCaIssuer>::new(&self.name)
                .within(namespace)
                .erase(),
            None => ObjectRef::<OciCaClusterIssuer>::new(&self.name).erase(),
        }
    }
}

impl Display for IssuerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}
