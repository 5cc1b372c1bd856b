//! Verifies [`OciCaIssuer`](crate::crd::OciCaIssuer)s and
//! [`OciCaClusterIssuer`](crate::crd::OciCaClusterIssuer)s, and marks them as ready once their
//! certificate authority is reachable.

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use serde::de::DeserializeOwned;
use snafu::{ResultExt as _, Snafu};
use stackable_operator::{
    k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition,
    kube::{
        api::DynamicObject,
        core::{error_boundary, DeserializeGuard},
        runtime::{
            controller,
            events::{Recorder, Reporter},
            reflector::ObjectRef,
            watcher, Controller,
        },
        Api, Resource,
    },
    logging::controller::{report_controller_reconciled, ReconcilerError},
};
use strum::{EnumDiscriminants, IntoStaticStr};
use tracing::{debug, info};

use crate::{
    ca_client::{BuildError, CertificateAuthorityClientBuilder},
    conditions::{self, set_condition},
    crd::{Issuer, IssuerKey, ValidateError},
    provisioner::{self, ProvisionerCollection},
    store::{self, ObjectStore},
    utils::Clock,
    OPERATOR_NAME,
};

pub const REASON_VERIFIED: &str = "Verified";
const MESSAGE_VERIFIED: &str = "Issuer verified and ready to sign certificates";

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("issuer object is invalid"))]
    InvalidIssuer {
        source: error_boundary::InvalidObject,
    },

    #[snafu(display("failed to get issuer"))]
    GetIssuer { source: store::Error },

    #[snafu(display("issuer {issuer} is misconfigured"))]
    InvalidConfig {
        source: ValidateError,
        issuer: IssuerKey,
    },

    #[snafu(display("failed to build provisioner for {issuer}"))]
    BuildProvisioner {
        source: BuildError,
        issuer: IssuerKey,
    },

    #[snafu(display("failed to verify certificate authority of {issuer}"))]
    VerifyAuthority {
        source: provisioner::ValidateError,
        issuer: IssuerKey,
    },

    #[snafu(display("failed to update issuer status"))]
    UpdateStatus { source: store::Error },
}
type Result<T, E = Error> = std::result::Result<T, E>;
impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }

    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        match self {
            Error::InvalidIssuer { .. } => None,
            Error::GetIssuer { .. } => None,
            Error::InvalidConfig { .. } => None,
            Error::BuildProvisioner { .. } => None,
            Error::VerifyAuthority { .. } => None,
            Error::UpdateStatus { .. } => None,
        }
    }
}

pub struct Ctx<K: Resource> {
    pub issuers: Arc<dyn ObjectStore<K>>,
    pub provisioners: Arc<ProvisionerCollection>,
    pub ca_clients: Arc<dyn CertificateAuthorityClientBuilder>,
    pub clock: Arc<dyn Clock>,
}

/// Runs the issuer controller for the issuer kind `K` until the watch ends.
pub async fn start<K>(
    client: &stackable_operator::client::Client,
    api: Api<DeserializeGuard<K>>,
    ctx: Ctx<K>,
    max_concurrent_reconciles: usize,
) where
    K: Issuer + DeserializeOwned,
{
    let controller_name = format!("{}.{OPERATOR_NAME}", K::kind(&()).to_lowercase());
    let event_recorder = Arc::new(Recorder::new(
        client.as_kube_client(),
        Reporter {
            controller: controller_name.clone(),
            instance: None,
        },
    ));
    let provisioners = ctx.provisioners.clone();
    Controller::new(api, watcher::Config::default())
        .run(reconcile, error_policy, Arc::new(ctx))
        .for_each_concurrent(max_concurrent_reconciles, move |res| {
            let event_recorder = event_recorder.clone();
            let provisioners = provisioners.clone();
            let controller_name = controller_name.clone();
            async move {
                // Deleted issuers are never passed to reconcile, so they are only noticed here.
                if let Err(controller::Error::ObjectNotFound(issuer)) = &res {
                    forget_issuer(&provisioners, &IssuerKey::for_object(issuer));
                }
                report_controller_reconciled(&event_recorder, &controller_name, &res).await
            }
        })
        .await;
}

async fn reconcile<K: Issuer>(
    issuer: Arc<DeserializeGuard<K>>,
    ctx: Arc<Ctx<K>>,
) -> Result<controller::Action> {
    let issuer = issuer
        .0
        .as_ref()
        .map_err(error_boundary::InvalidObject::clone)
        .context(InvalidIssuerSnafu)?;
    reconcile_issuer(&ObjectRef::from_obj(issuer), &ctx).await
}

/// Brings the `Ready` condition of the issuer referred to by `issuer_ref` up to date.
pub async fn reconcile_issuer<K: Issuer>(
    issuer_ref: &ObjectRef<K>,
    ctx: &Ctx<K>,
) -> Result<controller::Action> {
    let key = IssuerKey::for_object(issuer_ref);
    let Some(mut issuer) = ctx.issuers.get(issuer_ref).await.context(GetIssuerSnafu)? else {
        forget_issuer(&ctx.provisioners, &key);
        return Ok(controller::Action::await_change());
    };

    issuer
        .config()
        .validate()
        .with_context(|_| InvalidConfigSnafu { issuer: key.clone() })?;
    let provisioner = ctx
        .provisioners
        .get_or_build(&key, issuer.config(), ctx.ca_clients.as_ref(), &ctx.clock)
        .with_context(|_| BuildProvisionerSnafu { issuer: key.clone() })?;
    provisioner
        .validate()
        .await
        .with_context(|_| VerifyAuthoritySnafu { issuer: key.clone() })?;

    let generation = issuer.meta().generation;
    set_condition(
        &mut issuer.status_mut().conditions,
        Condition {
            type_: conditions::TYPE_READY.to_string(),
            status: conditions::STATUS_TRUE.to_string(),
            reason: REASON_VERIFIED.to_string(),
            message: MESSAGE_VERIFIED.to_string(),
            last_transition_time: ctx.clock.now_time(),
            observed_generation: generation,
        },
        ctx.clock.now_time(),
    );
    ctx.issuers
        .update_status(&issuer)
        .await
        .context(UpdateStatusSnafu)?;
    debug!(issuer = %key, "issuer verified");
    Ok(controller::Action::await_change())
}

fn forget_issuer(provisioners: &ProvisionerCollection, key: &IssuerKey) {
    if provisioners.remove(key).is_some() {
        info!(issuer = %key, "issuer was deleted, dropped its provisioner");
    }
}

fn error_policy<K: Resource>(
    _obj: Arc<DeserializeGuard<K>>,
    _error: &Error,
    _ctx: Arc<Ctx<K>>,
) -> controller::Action {
    controller::Action::requeue(Duration::from_secs(5))
}
