use std::{sync::Arc, time::Duration};

use clap::{crate_description, crate_version, Parser};
use oci_privateca_issuer::{
    ca_client::{oci::OciClientBuilder, CertificateAuthorityClientBuilder},
    certificate_request_controller,
    crd::{OciCaClusterIssuer, OciCaIssuer},
    external_crd::cert_manager::CertificateRequest,
    issuer_controller,
    provisioner::ProvisionerCollection,
    store::KubeStore,
    utils::{Clock, SystemClock},
    OPERATOR_NAME,
};
use stackable_operator::{
    kube::{
        core::DeserializeGuard,
        runtime::events::{Recorder, Reporter},
        CustomResourceExt,
    },
    logging::TracingTarget,
    namespace::WatchNamespace,
};

const APP_NAME: &str = "oci-privateca-issuer";
const ENV_VAR_LOGGING: &str = "OCI_PRIVATECA_ISSUER_LOG";

#[derive(clap::Parser)]
#[clap(about = crate_description!(), author, version)]
struct Opts {
    #[clap(subcommand)]
    cmd: stackable_operator::cli::Command<IssuerRun>,
}

#[derive(clap::Parser)]
struct IssuerRun {
    /// Only watch CertificateRequests and OCICAIssuers in this namespace (default: all namespaces)
    #[arg(long, env, default_value = "")]
    watch_namespace: WatchNamespace,

    /// Only sign CertificateRequests that have been approved
    #[arg(long, env, default_value_t = true, action = clap::ArgAction::Set)]
    check_approved_condition: bool,

    /// Timeout for each call to the OCI Certificates API
    #[arg(long, env, default_value = "30s", value_parser = humantime::parse_duration)]
    ca_request_timeout: Duration,

    /// Maximum number of objects reconciled concurrently, per controller
    #[arg(long, env, default_value_t = 16)]
    max_concurrent_reconciles: usize,

    /// Domain of the OCI realm that hosts the certificate authorities
    #[arg(long, env, default_value = "oraclecloud.com")]
    oci_domain: String,

    /// Tracing log collector system
    #[arg(long, env, default_value_t, value_enum)]
    tracing_target: TracingTarget,
}

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    match opts.cmd {
        stackable_operator::cli::Command::Crd => {
            for crd in [OciCaIssuer::crd(), OciCaClusterIssuer::crd()] {
                print!("---\n{}", serde_yaml::to_string(&crd)?);
            }
        }
        stackable_operator::cli::Command::Run(IssuerRun {
            watch_namespace,
            check_approved_condition,
            ca_request_timeout,
            max_concurrent_reconciles,
            oci_domain,
            tracing_target,
        }) => {
            stackable_operator::logging::initialize_logging(
                ENV_VAR_LOGGING,
                APP_NAME,
                tracing_target,
            );
            stackable_operator::utils::print_startup_string(
                crate_description!(),
                crate_version!(),
                built_info::GIT_VERSION,
                built_info::TARGET,
                built_info::BUILT_TIME_UTC,
                built_info::RUSTC_VERSION,
            );

            let client =
                stackable_operator::client::create_client(Some(OPERATOR_NAME.to_string())).await?;
            let kube_client = client.as_kube_client();

            let issuers = Arc::new(KubeStore::<OciCaIssuer>::namespaced(kube_client.clone()));
            let cluster_issuers =
                Arc::new(KubeStore::<OciCaClusterIssuer>::cluster(kube_client.clone()));
            let provisioners = Arc::new(ProvisionerCollection::new());
            let ca_clients: Arc<dyn CertificateAuthorityClientBuilder> =
                Arc::new(OciClientBuilder {
                    domain: oci_domain,
                    request_timeout: ca_request_timeout,
                });
            let clock: Arc<dyn Clock> = Arc::new(SystemClock);

            let issuer_controller = issuer_controller::start(
                &client,
                watch_namespace.get_api::<DeserializeGuard<OciCaIssuer>>(&client),
                issuer_controller::Ctx {
                    issuers: issuers.clone(),
                    provisioners: provisioners.clone(),
                    ca_clients: ca_clients.clone(),
                    clock: clock.clone(),
                },
                max_concurrent_reconciles,
            );
            let cluster_issuer_controller = issuer_controller::start(
                &client,
                client.get_api::<DeserializeGuard<OciCaClusterIssuer>>(&()),
                issuer_controller::Ctx {
                    issuers: cluster_issuers.clone(),
                    provisioners: provisioners.clone(),
                    ca_clients: ca_clients.clone(),
                    clock: clock.clone(),
                },
                max_concurrent_reconciles,
            );
            let certificate_request_controller = certificate_request_controller::start(
                &client,
                &watch_namespace,
                certificate_request_controller::Ctx {
                    certificate_requests: Arc::new(KubeStore::<CertificateRequest>::namespaced(
                        kube_client.clone(),
                    )),
                    issuers,
                    cluster_issuers,
                    provisioners,
                    ca_clients,
                    events: Arc::new(Recorder::new(
                        kube_client,
                        Reporter {
                            controller: certificate_request_controller::FULL_CONTROLLER_NAME
                                .to_string(),
                            instance: None,
                        },
                    )),
                    clock,
                    check_approved_condition,
                },
                max_concurrent_reconciles,
            );
            futures::join!(
                issuer_controller,
                cluster_issuer_controller,
                certificate_request_controller
            );
        }
    }
    Ok(())
}
