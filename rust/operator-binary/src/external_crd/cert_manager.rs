//! CRDs owned by [cert-manager](https://cert-manager.io/), see [their API docs](https://cert-manager.io/docs/reference/api-docs/).

use serde::{Deserialize, Serialize};
use stackable_operator::{
    k8s_openapi::{apimachinery::pkg::apis::meta::v1::Time, ByteString},
    kube::CustomResource,
    schemars::{self, JsonSchema},
};
use strum::{AsRefStr, Display};

use crate::conditions::{self, StatusCondition};

pub const CONDITION_APPROVED: &str = "Approved";
pub const CONDITION_DENIED: &str = "Denied";

pub const REASON_ISSUED: &str = "Issued";
pub const REASON_FAILED: &str = "Failed";
pub const REASON_DENIED: &str = "Denied";

/// See <https://cert-manager.io/docs/reference/api-docs/#cert-manager.io/v1.CertificateRequest>.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "CertificateRequest",
    namespaced,
    status = "CertificateRequestStatus",
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequestSpec {
    /// PEM-encoded CSR.
    pub request: ByteString,
    /// Requested certificate lifetime, in Go's duration format (such as `2160h0m0s`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    pub issuer_ref: ObjectReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_ca: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub usages: Vec<String>,
}

/// See <https://cert-manager.io/docs/reference/api-docs/#meta.cert-manager.io/v1.ObjectReference>.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    pub name: String,
    pub kind: Option<String>,
    pub group: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequestStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<CertificateRequestCondition>,
    /// PEM-encoded certificate chain, leaf first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<ByteString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<ByteString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_time: Option<Time>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequestCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, AsRefStr, Display,
)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl StatusCondition for CertificateRequestCondition {
    fn condition_type(&self) -> &str {
        &self.type_
    }

    fn status(&self) -> &str {
        self.status.as_ref()
    }

    fn last_transition_time(&self) -> Option<&Time> {
        self.last_transition_time.as_ref()
    }

    fn set_last_transition_time(&mut self, time: Time) {
        self.last_transition_time = Some(time);
    }
}

impl CertificateRequest {
    fn conditions(&self) -> &[CertificateRequestCondition] {
        self.status
            .as_ref()
            .map(|status| status.conditions.as_slice())
            .unwrap_or_default()
    }

    /// Returns whether a condition of `condition_type` with `status` exists.
    ///
    /// The reason is only compared if `reason` is given.
    pub fn has_condition(
        &self,
        condition_type: &str,
        status: ConditionStatus,
        reason: Option<&str>,
    ) -> bool {
        self.conditions().iter().any(|condition| {
            condition.type_ == condition_type
                && condition.status == status
                && reason.map_or(true, |reason| condition.reason.as_deref() == Some(reason))
        })
    }

    pub fn is_approved(&self) -> bool {
        self.has_condition(CONDITION_APPROVED, ConditionStatus::True, None)
    }

    pub fn is_denied(&self) -> bool {
        self.has_condition(CONDITION_DENIED, ConditionStatus::True, None)
    }

    /// Returns the signed certificate, if any has been written yet.
    pub fn certificate(&self) -> Option<&[u8]> {
        self.status
            .as_ref()
            .and_then(|status| status.certificate.as_ref())
            .map(|ByteString(cert)| cert.as_slice())
            .filter(|cert| !cert.is_empty())
    }

    pub fn status_mut(&mut self) -> &mut CertificateRequestStatus {
        self.status
            .get_or_insert_with(CertificateRequestStatus::default)
    }

    /// Sets the `Ready` condition, keeping the transition time if `status` did not change.
    pub fn set_ready_condition(
        &mut self,
        status: ConditionStatus,
        reason: &str,
        message: &str,
        now: Time,
    ) {
        let condition = CertificateRequestCondition {
            type_: conditions::TYPE_READY.to_string(),
            status,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            last_transition_time: None,
            observed_generation: self.metadata.generation,
        };
        conditions::set_condition(&mut self.status_mut().conditions, condition, now);
    }
}
