//! Signs cert-manager [`CertificateRequest`]s that refer to one of our issuers.

use std::{sync::Arc, time::Duration};

use const_format::concatcp;
use futures::StreamExt;
use oci_privateca_issuer_utils::pem;
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use stackable_operator::{
    k8s_openapi::ByteString,
    kube::{
        api::DynamicObject,
        core::{error_boundary, DeserializeGuard},
        runtime::{
            controller,
            events::{EventType, Recorder, Reporter},
            reflector::ObjectRef,
            watcher, Controller,
        },
        Resource, ResourceExt,
    },
    logging::controller::{report_controller_reconciled, ReconcilerError},
    namespace::WatchNamespace,
};
use strum::{EnumDiscriminants, IntoStaticStr};
use tracing::{debug, info, warn};

use crate::{
    ca_client::{BuildError, CertificateAuthorityClientBuilder},
    conditions,
    crd::{self, IssuerConfig, IssuerKey, OciCaClusterIssuer, OciCaIssuer, ValidateError},
    external_crd::cert_manager::{
        self, CertificateRequest, ConditionStatus, REASON_DENIED, REASON_FAILED, REASON_ISSUED,
    },
    provisioner::{self, ProvisionerCollection},
    store::{self, EventPublisher, ObjectStore},
    utils::Clock,
    OPERATOR_NAME,
};

const CONTROLLER_NAME: &str = "certificaterequest";
pub const FULL_CONTROLLER_NAME: &str = concatcp!(CONTROLLER_NAME, ".", OPERATOR_NAME);

const MESSAGE_DENIED: &str = "The CertificateRequest was denied by an approval controller";
const MESSAGE_ISSUED: &str = "certificate issued";

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("CertificateRequest object is invalid"))]
    InvalidCertificateRequest {
        source: error_boundary::InvalidObject,
    },

    #[snafu(display("failed to get CertificateRequest"))]
    GetCertificateRequest { source: store::Error },

    #[snafu(display("CertificateRequest has no namespace, so it can not use namespaced issuer {issuer_name:?}"))]
    NoNamespace { issuer_name: String },

    #[snafu(display("failed to get issuer {issuer}"))]
    GetIssuer {
        source: store::Error,
        issuer: IssuerKey,
    },

    #[snafu(display("issuer {issuer} does not exist"))]
    IssuerNotFound { issuer: IssuerKey },

    #[snafu(display("issuer {issuer} is misconfigured"))]
    InvalidIssuerConfig {
        source: ValidateError,
        issuer: IssuerKey,
    },

    #[snafu(display("failed to build provisioner for {issuer}"))]
    BuildProvisioner {
        source: BuildError,
        issuer: IssuerKey,
    },

    #[snafu(display("failed to parse requested duration {duration:?}"))]
    ParseDuration {
        source: humantime::DurationError,
        duration: String,
    },

    #[snafu(display("failed to sign certificate with {issuer}"))]
    Sign {
        source: provisioner::SignError,
        issuer: IssuerKey,
    },

    #[snafu(display("failed to update CertificateRequest status"))]
    UpdateStatus { source: store::Error },
}
type Result<T, E = Error> = std::result::Result<T, E>;
impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }

    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        match self {
            Error::InvalidCertificateRequest { .. } => None,
            Error::GetCertificateRequest { .. } => None,
            Error::NoNamespace { .. } => None,
            Error::GetIssuer { issuer, .. } => Some(issuer.object_ref()),
            Error::IssuerNotFound { issuer } => Some(issuer.object_ref()),
            Error::InvalidIssuerConfig { issuer, .. } => Some(issuer.object_ref()),
            Error::BuildProvisioner { issuer, .. } => Some(issuer.object_ref()),
            Error::ParseDuration { .. } => None,
            Error::Sign { issuer, .. } => Some(issuer.object_ref()),
            Error::UpdateStatus { .. } => None,
        }
    }
}

pub struct Ctx {
    pub certificate_requests: Arc<dyn ObjectStore<CertificateRequest>>,
    pub issuers: Arc<dyn ObjectStore<OciCaIssuer>>,
    pub cluster_issuers: Arc<dyn ObjectStore<OciCaClusterIssuer>>,
    pub provisioners: Arc<ProvisionerCollection>,
    pub ca_clients: Arc<dyn CertificateAuthorityClientBuilder>,
    pub events: Arc<dyn EventPublisher>,
    pub clock: Arc<dyn Clock>,
    /// Only sign requests that have been approved by an approval controller.
    pub check_approved_condition: bool,
}

pub async fn start(
    client: &stackable_operator::client::Client,
    watch_namespace: &WatchNamespace,
    ctx: Ctx,
    max_concurrent_reconciles: usize,
) {
    let event_recorder = Arc::new(Recorder::new(
        client.as_kube_client(),
        Reporter {
            controller: FULL_CONTROLLER_NAME.to_string(),
            instance: None,
        },
    ));
    Controller::new(
        watch_namespace.get_api::<DeserializeGuard<CertificateRequest>>(client),
        watcher::Config::default(),
    )
    .run(reconcile, error_policy, Arc::new(ctx))
    .for_each_concurrent(max_concurrent_reconciles, move |res| {
        let event_recorder = event_recorder.clone();
        async move {
            report_controller_reconciled(&event_recorder, FULL_CONTROLLER_NAME, &res).await
        }
    })
    .await;
}

async fn reconcile(
    cr: Arc<DeserializeGuard<CertificateRequest>>,
    ctx: Arc<Ctx>,
) -> Result<controller::Action> {
    let cr = cr
        .0
        .as_ref()
        .map_err(error_boundary::InvalidObject::clone)
        .context(InvalidCertificateRequestSnafu)?;
    reconcile_certificate_request(&ObjectRef::from_obj(cr), &ctx).await
}

/// Signs the [`CertificateRequest`] referred to by `cr_ref`, if it is ours to sign and still
/// needs signing.
pub async fn reconcile_certificate_request(
    cr_ref: &ObjectRef<CertificateRequest>,
    ctx: &Ctx,
) -> Result<controller::Action> {
    let done = controller::Action::await_change();
    let Some(mut cr) = ctx
        .certificate_requests
        .get(cr_ref)
        .await
        .context(GetCertificateRequestSnafu)?
    else {
        return Ok(done);
    };

    let issuer_ref = &cr.spec.issuer_ref;
    if issuer_ref.group.as_deref() != Some(crd::GROUP) {
        debug!(
            issuer.group = ?issuer_ref.group,
            "CertificateRequest refers to a foreign issuer group, ignoring"
        );
        return Ok(done);
    }

    if cr.has_condition(conditions::TYPE_READY, ConditionStatus::True, None) {
        debug!("CertificateRequest is Ready, ignoring");
        return Ok(done);
    }
    if cr.has_condition(
        conditions::TYPE_READY,
        ConditionStatus::False,
        Some(REASON_FAILED),
    ) {
        debug!("CertificateRequest is Failed, ignoring");
        return Ok(done);
    }
    if cr.has_condition(
        conditions::TYPE_READY,
        ConditionStatus::False,
        Some(REASON_DENIED),
    ) {
        debug!("CertificateRequest is already marked as Denied, ignoring");
        return Ok(done);
    }

    if cr.is_denied() {
        info!("CertificateRequest has been denied, marking it as failed");
        let status = cr.status_mut();
        if status.failure_time.is_none() {
            status.failure_time = Some(ctx.clock.now_time());
        }
        set_ready(
            ctx,
            &mut cr,
            ConditionStatus::False,
            REASON_DENIED,
            MESSAGE_DENIED,
        )
        .await?;
        return Ok(done);
    }

    if ctx.check_approved_condition && !cr.is_approved() {
        debug!("CertificateRequest has not been approved yet");
        return Ok(done);
    }

    if cr.certificate().is_some() {
        debug!("CertificateRequest has already been signed");
        return Ok(done);
    }

    let issuer = issuer_key(&cr)?;
    let config = get_issuer_config(ctx, &issuer).await?;
    config
        .validate()
        .with_context(|_| InvalidIssuerConfigSnafu {
            issuer: issuer.clone(),
        })?;
    let provisioner = ctx
        .provisioners
        .get_or_build(&issuer, &config, ctx.ca_clients.as_ref(), &ctx.clock)
        .with_context(|_| BuildProvisionerSnafu {
            issuer: issuer.clone(),
        })?;
    let duration = cr
        .spec
        .duration
        .as_deref()
        .map(|duration| {
            humantime::parse_duration(duration).context(ParseDurationSnafu { duration })
        })
        .transpose()?;

    let chain = provisioner
        .sign(&cr.spec.request.0, &cr.name_any(), duration)
        .await
        .with_context(|_| SignSnafu {
            issuer: issuer.clone(),
        })?;
    let ca = pem::chain_root(&chain).map(|root| {
        let mut root = root.to_vec();
        root.push(b'\n');
        ByteString(root)
    });
    let status = cr.status_mut();
    status.certificate = Some(ByteString(chain));
    status.ca = ca;
    set_ready(
        ctx,
        &mut cr,
        ConditionStatus::True,
        REASON_ISSUED,
        MESSAGE_ISSUED,
    )
    .await?;
    info!(%issuer, "signed CertificateRequest");
    Ok(done)
}

/// Identifies the issuer that `cr` asks to be signed by.
///
/// Cluster issuers are not namespaced, even though the request itself is.
fn issuer_key(cr: &CertificateRequest) -> Result<IssuerKey> {
    let issuer_ref = &cr.spec.issuer_ref;
    if issuer_ref.kind.as_deref() == Some(crd::CLUSTER_ISSUER_KIND) {
        return Ok(IssuerKey::cluster(&issuer_ref.name));
    }
    let namespace = cr.namespace().with_context(|| NoNamespaceSnafu {
        issuer_name: &issuer_ref.name,
    })?;
    Ok(IssuerKey::namespaced(namespace, &issuer_ref.name))
}

async fn get_issuer_config(ctx: &Ctx, issuer: &IssuerKey) -> Result<IssuerConfig> {
    let config = match &issuer.namespace {
        Some(namespace) => ctx
            .issuers
            .get(&ObjectRef::new(&issuer.name).within(namespace))
            .await
            .map(|issuer| issuer.map(|issuer| issuer.spec.config)),
        None => ctx
            .cluster_issuers
            .get(&ObjectRef::new(&issuer.name))
            .await
            .map(|issuer| issuer.map(|issuer| issuer.spec.config)),
    };
    config
        .with_context(|_| GetIssuerSnafu {
            issuer: issuer.clone(),
        })?
        .with_context(|| IssuerNotFoundSnafu {
            issuer: issuer.clone(),
        })
}

/// Sets the `Ready` condition, persists the status, and records a matching event.
async fn set_ready(
    ctx: &Ctx,
    cr: &mut CertificateRequest,
    status: ConditionStatus,
    reason: &str,
    message: &str,
) -> Result<()> {
    cr.set_ready_condition(status, reason, message, ctx.clock.now_time());
    ctx.certificate_requests
        .update_status(cr)
        .await
        .context(UpdateStatusSnafu)?;

    let event_type = match status {
        ConditionStatus::True => EventType::Normal,
        ConditionStatus::False | ConditionStatus::Unknown => EventType::Warning,
    };
    if let Err(err) = ctx
        .events
        .publish(&cr.object_ref(&()), event_type, reason, message)
        .await
    {
        warn!(
            error = &err as &dyn std::error::Error,
            reason, "failed to publish event for CertificateRequest"
        );
    }
    Ok(())
}

fn error_policy(
    _obj: Arc<DeserializeGuard<CertificateRequest>>,
    _error: &Error,
    _ctx: Arc<Ctx>,
) -> controller::Action {
    controller::Action::requeue(Duration::from_secs(5))
}

#[cfg(test)]
mod tests {
    use stackable_operator::k8s_openapi::{apimachinery::pkg::apis::meta::v1::Time, chrono};

    use super::*;
    use crate::{
        ca_client::testing::{Call, FakeCa, FakeCaBuilder, CHAIN},
        crd::{tests::valid_config, OciCaClusterIssuerSpec, OciCaIssuerSpec},
        external_crd::cert_manager::{
            CertificateRequestCondition, CertificateRequestSpec, CertificateRequestStatus,
            CONDITION_APPROVED, CONDITION_DENIED,
        },
        provisioner::testing::csr_pem,
        store::testing::{MemoryStore, PublishedEvent, RecordingPublisher},
        utils::testing::FixedClock,
    };

    struct Harness {
        requests: Arc<MemoryStore<CertificateRequest>>,
        builder: Arc<FakeCaBuilder>,
        events: Arc<RecordingPublisher>,
        clock: Arc<FixedClock>,
        ctx: Ctx,
    }

    impl Harness {
        fn new(requests: impl IntoIterator<Item = CertificateRequest>) -> Self {
            Self::with_ca(requests, FakeCa::default())
        }

        fn with_ca(requests: impl IntoIterator<Item = CertificateRequest>, ca: FakeCa) -> Self {
            let requests = Arc::new(MemoryStore::with(requests));
            let mut namespaced = OciCaIssuer::new(
                "oci-ca",
                OciCaIssuerSpec {
                    config: valid_config(),
                },
            );
            namespaced.metadata.namespace = Some("team-a".to_string());
            let cluster = OciCaClusterIssuer::new(
                "oci-ca",
                OciCaClusterIssuerSpec {
                    config: valid_config(),
                },
            );
            let builder = Arc::new(FakeCaBuilder::new(ca));
            let events = Arc::new(RecordingPublisher::default());
            let clock = Arc::new(FixedClock::at(1_000));
            Self {
                ctx: Ctx {
                    certificate_requests: requests.clone(),
                    issuers: Arc::new(MemoryStore::with([namespaced])),
                    cluster_issuers: Arc::new(MemoryStore::with([cluster])),
                    provisioners: Arc::new(ProvisionerCollection::new()),
                    ca_clients: builder.clone(),
                    events: events.clone(),
                    clock: clock.clone(),
                    check_approved_condition: true,
                },
                requests,
                builder,
                events,
                clock,
            }
        }

        async fn reconcile(&self, name: &str) -> Result<controller::Action> {
            reconcile_certificate_request(&ObjectRef::new(name).within("team-a"), &self.ctx).await
        }

        fn current(&self, name: &str) -> CertificateRequest {
            self.requests.current(Some("team-a"), name).unwrap()
        }
    }

    fn condition(type_: &str, status: ConditionStatus, reason: &str) -> CertificateRequestCondition {
        CertificateRequestCondition {
            type_: type_.to_string(),
            status,
            reason: Some(reason.to_string()),
            message: None,
            last_transition_time: None,
            observed_generation: None,
        }
    }

    fn approved() -> CertificateRequestCondition {
        condition(CONDITION_APPROVED, ConditionStatus::True, "cert-manager.io")
    }

    fn request(
        name: &str,
        issuer_kind: &str,
        conditions: Vec<CertificateRequestCondition>,
    ) -> CertificateRequest {
        let mut cr = CertificateRequest::new(
            name,
            CertificateRequestSpec {
                request: ByteString(csr_pem("web.example.com")),
                duration: None,
                issuer_ref: cert_manager::ObjectReference {
                    name: "oci-ca".to_string(),
                    kind: Some(issuer_kind.to_string()),
                    group: Some(crd::GROUP.to_string()),
                },
                is_ca: None,
                usages: Vec::new(),
            },
        );
        cr.metadata.namespace = Some("team-a".to_string());
        cr.status = Some(CertificateRequestStatus {
            conditions,
            ..CertificateRequestStatus::default()
        });
        cr
    }

    fn ready_condition(cr: &CertificateRequest) -> CertificateRequestCondition {
        cr.status
            .as_ref()
            .unwrap()
            .conditions
            .iter()
            .find(|c| c.type_ == conditions::TYPE_READY)
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn signs_request_for_cluster_issuer() {
        let h = Harness::new([request(
            "web-1",
            crd::CLUSTER_ISSUER_KIND,
            vec![approved()],
        )]);
        h.reconcile("web-1").await.unwrap();

        let cr = h.current("web-1");
        let status = cr.status.as_ref().unwrap();
        assert_eq!(status.certificate, Some(ByteString(CHAIN.as_bytes().to_vec())));
        assert_eq!(
            status.ca,
            Some(ByteString(
                b"-----BEGIN CERTIFICATE-----\ncm9vdA==\n-----END CERTIFICATE-----\n".to_vec()
            ))
        );
        let ready = ready_condition(&cr);
        assert_eq!(ready.status, ConditionStatus::True);
        assert_eq!(ready.reason.as_deref(), Some(REASON_ISSUED));
        assert_eq!(ready.message.as_deref(), Some(MESSAGE_ISSUED));
        assert_eq!(ready.last_transition_time, Some(h.clock.now_time()));

        let calls = h.builder.ca.calls();
        assert_eq!(calls.len(), 2, "{calls:?}");
        let Call::CreateCertificate(create) = &calls[0] else {
            panic!("expected create call first, got {calls:?}");
        };
        assert_eq!(create.name, "web-1");
        assert_eq!(
            create.not_after - create.not_before,
            chrono::Duration::days(7)
        );
        assert!(matches!(calls[1], Call::GetCertificateBundle { .. }));

        assert!(h
            .ctx
            .provisioners
            .get(&IssuerKey::cluster("oci-ca"))
            .is_some());
        assert!(h
            .ctx
            .provisioners
            .get(&IssuerKey::namespaced("team-a", "oci-ca"))
            .is_none());
        assert_eq!(
            h.events.events(),
            vec![PublishedEvent {
                object_name: Some("web-1".to_string()),
                event_type: EventType::Normal,
                reason: REASON_ISSUED.to_string(),
                message: MESSAGE_ISSUED.to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn signs_request_for_namespaced_issuer_with_duration() {
        let mut cr = request("web-1", crd::ISSUER_KIND, vec![approved()]);
        cr.spec.duration = Some("2160h0m0s".to_string());
        let h = Harness::new([cr]);
        h.reconcile("web-1").await.unwrap();

        assert_eq!(ready_condition(&h.current("web-1")).status, ConditionStatus::True);
        assert!(h
            .ctx
            .provisioners
            .get(&IssuerKey::namespaced("team-a", "oci-ca"))
            .is_some());
        let Call::CreateCertificate(create) = &h.builder.ca.calls()[0] else {
            panic!("expected create call");
        };
        assert_eq!(
            create.not_after - create.not_before,
            chrono::Duration::hours(2160)
        );
    }

    #[tokio::test]
    async fn ignores_foreign_issuer_group() {
        let mut cr = request("web-1", crd::CLUSTER_ISSUER_KIND, vec![approved()]);
        cr.spec.issuer_ref.group = Some("cert-manager.io".to_string());
        let h = Harness::new([cr]);
        h.reconcile("web-1").await.unwrap();

        assert!(h.requests.status_updates().is_empty());
        assert!(h.builder.ca.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_request_is_not_an_error() {
        let h = Harness::new([]);
        assert_eq!(
            h.reconcile("web-1").await.unwrap(),
            controller::Action::await_change()
        );
    }

    #[tokio::test]
    async fn terminal_requests_are_left_alone() {
        let terminal = [
            condition(conditions::TYPE_READY, ConditionStatus::True, REASON_ISSUED),
            condition(conditions::TYPE_READY, ConditionStatus::False, REASON_FAILED),
            condition(conditions::TYPE_READY, ConditionStatus::False, REASON_DENIED),
        ];
        for ready in terminal {
            let h = Harness::new([request(
                "web-1",
                crd::CLUSTER_ISSUER_KIND,
                vec![approved(), ready.clone()],
            )]);
            h.reconcile("web-1").await.unwrap();

            assert!(h.requests.status_updates().is_empty(), "{ready:?}");
            assert!(h.builder.ca.calls().is_empty(), "{ready:?}");
            assert!(h.events.events().is_empty(), "{ready:?}");
            assert_eq!(ready_condition(&h.current("web-1")), ready);
        }
    }

    #[tokio::test]
    async fn pending_ready_condition_does_not_block_signing() {
        let h = Harness::new([request(
            "web-1",
            crd::CLUSTER_ISSUER_KIND,
            vec![
                approved(),
                condition(conditions::TYPE_READY, ConditionStatus::False, "Pending"),
            ],
        )]);
        h.reconcile("web-1").await.unwrap();
        let ready = ready_condition(&h.current("web-1"));
        assert_eq!(ready.status, ConditionStatus::True);
        assert_eq!(ready.reason.as_deref(), Some(REASON_ISSUED));
    }

    #[tokio::test]
    async fn denied_request_is_stamped_once() {
        let h = Harness::new([request(
            "web-1",
            crd::CLUSTER_ISSUER_KIND,
            vec![condition(CONDITION_DENIED, ConditionStatus::True, "Foo")],
        )]);
        h.reconcile("web-1").await.unwrap();

        let cr = h.current("web-1");
        let failure_time = cr.status.as_ref().unwrap().failure_time.clone();
        assert_eq!(failure_time, Some(h.clock.now_time()));
        let ready = ready_condition(&cr);
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason.as_deref(), Some(REASON_DENIED));
        assert_eq!(ready.message.as_deref(), Some(MESSAGE_DENIED));
        assert_eq!(h.events.events()[0].event_type, EventType::Warning);

        h.clock.advance(chrono::Duration::minutes(10));
        h.reconcile("web-1").await.unwrap();
        let cr = h.current("web-1");
        assert_eq!(cr.status.as_ref().unwrap().failure_time, failure_time);
        assert_eq!(h.requests.status_updates().len(), 1);
        assert_eq!(h.events.events().len(), 1);
        assert!(h.builder.ca.calls().is_empty());
    }

    #[tokio::test]
    async fn denied_request_keeps_existing_failure_time() {
        let mut cr = request(
            "web-1",
            crd::CLUSTER_ISSUER_KIND,
            vec![condition(CONDITION_DENIED, ConditionStatus::True, "Foo")],
        );
        let earlier = Time(chrono::DateTime::from_timestamp(10, 0).unwrap());
        cr.status_mut().failure_time = Some(earlier.clone());
        let h = Harness::new([cr]);
        h.reconcile("web-1").await.unwrap();

        let cr = h.current("web-1");
        assert_eq!(cr.status.as_ref().unwrap().failure_time, Some(earlier));
        assert_eq!(
            ready_condition(&cr).reason.as_deref(),
            Some(REASON_DENIED)
        );
    }

    #[tokio::test]
    async fn unapproved_request_waits_for_approval() {
        let h = Harness::new([request("web-1", crd::CLUSTER_ISSUER_KIND, Vec::new())]);
        h.reconcile("web-1").await.unwrap();
        assert!(h.requests.status_updates().is_empty());
        assert!(h.builder.ca.calls().is_empty());
    }

    #[tokio::test]
    async fn approval_check_can_be_disabled() {
        let mut h = Harness::new([request("web-1", crd::CLUSTER_ISSUER_KIND, Vec::new())]);
        h.ctx.check_approved_condition = false;
        h.reconcile("web-1").await.unwrap();
        assert_eq!(
            ready_condition(&h.current("web-1")).reason.as_deref(),
            Some(REASON_ISSUED)
        );
    }

    #[tokio::test]
    async fn signed_request_never_calls_the_ca_again() {
        let mut cr = request("web-1", crd::CLUSTER_ISSUER_KIND, vec![approved()]);
        cr.status_mut().certificate = Some(ByteString(CHAIN.as_bytes().to_vec()));
        let h = Harness::new([cr]);
        h.reconcile("web-1").await.unwrap();
        assert!(h.builder.ca.calls().is_empty());
        assert!(h.requests.status_updates().is_empty());
    }

    #[tokio::test]
    async fn malformed_csr_fails_before_any_remote_call() {
        let mut cr = request("web-1", crd::CLUSTER_ISSUER_KIND, vec![approved()]);
        cr.spec.request = ByteString(b"garbage".to_vec());
        let h = Harness::new([cr]);

        let err = h.reconcile("web-1").await.unwrap_err();
        assert!(
            matches!(
                err,
                Error::Sign {
                    source: provisioner::SignError::DecodeCsr { .. },
                    ..
                }
            ),
            "{err:?}"
        );
        assert_eq!(err.category(), "Sign");
        assert!(h.builder.ca.calls().is_empty());
        assert!(h.requests.status_updates().is_empty());
        assert_eq!(h.current("web-1").certificate(), None);
    }

    #[tokio::test]
    async fn ca_failure_is_retried() {
        let h = Harness::with_ca(
            [request("web-1", crd::CLUSTER_ISSUER_KIND, vec![approved()])],
            FakeCa {
                fail_bundle: true,
                ..FakeCa::default()
            },
        );
        let err = h.reconcile("web-1").await.unwrap_err();
        assert!(matches!(err, Error::Sign { .. }), "{err:?}");
        assert_eq!(
            err.secondary_object(),
            Some(IssuerKey::cluster("oci-ca").object_ref())
        );
        assert!(h.requests.status_updates().is_empty());
    }

    #[tokio::test]
    async fn unknown_issuer_is_retried() {
        let mut cr = request("web-1", crd::CLUSTER_ISSUER_KIND, vec![approved()]);
        cr.spec.issuer_ref.name = "other-ca".to_string();
        let h = Harness::new([cr]);
        let err = h.reconcile("web-1").await.unwrap_err();
        assert!(
            matches!(err, Error::IssuerNotFound { ref issuer } if *issuer == IssuerKey::cluster("other-ca")),
            "{err:?}"
        );
        assert!(h.builder.ca.calls().is_empty());
    }

    #[tokio::test]
    async fn invalid_duration_is_reported() {
        let mut cr = request("web-1", crd::CLUSTER_ISSUER_KIND, vec![approved()]);
        cr.spec.duration = Some("forever".to_string());
        let h = Harness::new([cr]);
        let err = h.reconcile("web-1").await.unwrap_err();
        assert!(matches!(err, Error::ParseDuration { .. }), "{err:?}");
        assert!(h.builder.ca.calls().is_empty());
    }

    #[test]
    fn issuer_identity_depends_on_kind() {
        let cluster = request("web-1", crd::CLUSTER_ISSUER_KIND, Vec::new());
        assert_eq!(issuer_key(&cluster).unwrap(), IssuerKey::cluster("oci-ca"));

        let namespaced = request("web-1", crd::ISSUER_KIND, Vec::new());
        assert_eq!(
            issuer_key(&namespaced).unwrap(),
            IssuerKey::namespaced("team-a", "oci-ca")
        );

        let mut orphan = request("web-1", crd::ISSUER_KIND, Vec::new());
        orphan.metadata.namespace = None;
        assert!(matches!(
            issuer_key(&orphan),
            Err(Error::NoNamespace { .. })
        ));
    }
}
