pub mod ca_client;
pub mod certificate_request_controller;
pub mod conditions;
pub mod crd;
pub mod external_crd;
pub mod issuer_controller;
pub mod provisioner;
pub mod store;
pub mod utils;

pub const OPERATOR_NAME: &str = "ocica.cert-manager.io";
