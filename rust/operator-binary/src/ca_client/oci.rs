//! [`CertificateAuthorityClient`] for the [OCI Certificates](https://docs.oracle.com/en-us/iaas/Content/certificates/home.htm) service.
//!
//! Certificates are created through the `certificatesmanagement` API, and their content is
//! fetched from the separate `certificates` (retrieval) API. All requests are authenticated with
//! [OCI request signatures](https://docs.oracle.com/en-us/iaas/Content/API/Concepts/signingrequests.htm).

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use openssl::{
    hash::MessageDigest,
    pkey::{PKey, Private},
    sign::Signer,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use stackable_operator::k8s_openapi::chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;

use super::{
    BuildRequestSnafu, CertificateAuthority, CertificateAuthorityClient,
    CertificateAuthorityClientBuilder, CertificateBundleType, CertificateHandle,
    CreateCertificate, EmptyBundleSnafu, Error, InvalidHeaderSnafu, ParseResponseSnafu,
    ReadResponseSnafu, SendSnafu, SerializeBodySnafu, ServiceSnafu, SignRequestSnafu,
};
use crate::{crd::IssuerConfig, utils::Unloggable};

const API_VERSION: &str = "20210224";
const CONFIG_TYPE_ISSUED_BY_INTERNAL_CA: &str = "MANAGED_EXTERNALLY_ISSUED_BY_INTERNAL_CA";

#[derive(Debug, Snafu)]
pub enum NewError {
    #[snafu(display("failed to load API signing key"))]
    LoadSigningKey { source: openssl::error::ErrorStack },

    #[snafu(display("failed to build HTTP client"))]
    BuildHttpClient { source: reqwest::Error },
}

/// Builds an [`OciClient`] per issuer.
#[derive(Clone, Debug)]
pub struct OciClientBuilder {
    /// Second-level domain of the OCI realm, such as `oraclecloud.com`.
    pub domain: String,
    pub request_timeout: Duration,
}

impl CertificateAuthorityClientBuilder for OciClientBuilder {
    fn build(
        &self,
        config: &IssuerConfig,
    ) -> Result<Arc<dyn CertificateAuthorityClient>, super::BuildError> {
        Ok(Arc::new(OciClient::new(
            config,
            &self.domain,
            self.request_timeout,
        )?))
    }
}

#[derive(Debug)]
pub struct OciClient {
    http: reqwest::Client,
    signer: RequestSigner,
    management_endpoint: String,
    retrieval_endpoint: String,
}

impl OciClient {
    pub fn new(
        config: &IssuerConfig,
        domain: &str,
        request_timeout: Duration,
    ) -> Result<Self, NewError> {
        let creds = &config.secret_ref;
        let key = PKey::private_key_from_pem_passphrase(
            creds.private_key.as_bytes(),
            creds.private_key_passphrase.as_bytes(),
        )
        .context(LoadSigningKeySnafu)?;
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context(BuildHttpClientSnafu)?;
        Ok(Self {
            http,
            signer: RequestSigner {
                key_id: format!("{}/{}/{}", creds.tenancy, creds.user, creds.fingerprint),
                key: Unloggable(key),
            },
            management_endpoint: format!(
                "https://certificatesmanagement.{}.{domain}/{API_VERSION}",
                creds.region
            ),
            retrieval_endpoint: format!(
                "https://certificates.{}.{domain}/{API_VERSION}",
                creds.region
            ),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        body: Option<Vec<u8>>,
    ) -> Result<T, Error> {
        let mut request = request.build().context(BuildRequestSnafu {
            url: "<unknown>".to_string(),
        })?;
        let url = request.url().clone();
        let url_str = url.as_str().to_string();

        let mut target = format!("{} {}", request.method().as_str().to_lowercase(), url.path());
        if let Some(query) = url.query() {
            target.push('?');
            target.push_str(query);
        }
        let mut signed_headers = vec![
            ("date", http_date(Utc::now())),
            ("(request-target)", target),
            ("host", url.host_str().unwrap_or_default().to_string()),
        ];
        if let Some(body) = &body {
            signed_headers.extend([
                ("content-length", body.len().to_string()),
                ("content-type", "application/json".to_string()),
                (
                    "x-content-sha256",
                    openssl::base64::encode_block(&openssl::sha::sha256(body)),
                ),
            ]);
        }
        let authorization = self
            .signer
            .authorization(&signed_headers)
            .with_context(|_| SignRequestSnafu { url: &url_str })?;

        let headers = request.headers_mut();
        // Host and the pseudo-header are filled in by reqwest from the URL.
        for (name, value) in signed_headers
            .iter()
            .filter(|(name, _)| !matches!(*name, "host" | "(request-target)"))
        {
            headers.insert(
                *name,
                value
                    .parse()
                    .with_context(|_| InvalidHeaderSnafu { url: &url_str })?,
            );
        }
        headers.insert(
            reqwest::header::AUTHORIZATION,
            authorization
                .parse()
                .with_context(|_| InvalidHeaderSnafu { url: &url_str })?,
        );
        if let Some(body) = body {
            *request.body_mut() = Some(body.into());
        }

        debug!(method = %request.method(), url = url_str, "calling OCI");
        let response = self
            .http
            .execute(request)
            .await
            .with_context(|_| SendSnafu { url: &url_str })?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .with_context(|_| ReadResponseSnafu { url: &url_str })?;
        if !status.is_success() {
            let ServiceErrorBody { code, message } = ServiceErrorBody::parse(&bytes);
            return ServiceSnafu {
                url: url_str,
                status: status.as_u16(),
                code,
                message,
            }
            .fail();
        }
        serde_json::from_slice(&bytes).context(ParseResponseSnafu { url: url_str })
    }
}

#[async_trait]
impl CertificateAuthorityClient for OciClient {
    async fn get_certificate_authority(
        &self,
        authority_id: &str,
    ) -> Result<CertificateAuthority, Error> {
        let body: CertificateAuthorityBody = self
            .call(
                self.http.get(format!(
                    "{}/certificateAuthorities/{authority_id}",
                    self.management_endpoint
                )),
                None,
            )
            .await?;
        Ok(CertificateAuthority {
            id: body.id,
            compartment_id: body.compartment_id,
            name: body.name,
        })
    }

    async fn create_certificate(
        &self,
        request: &CreateCertificate,
    ) -> Result<CertificateHandle, Error> {
        let body = serde_json::to_vec(&CreateCertificateDetails {
            name: &request.name,
            compartment_id: request.compartment_id.as_deref(),
            description: &request.name,
            certificate_config: CertificateConfig {
                config_type: CONFIG_TYPE_ISSUED_BY_INTERNAL_CA,
                issuer_certificate_authority_id: &request.issuer_authority_id,
                csr_pem: &request.csr_pem,
                version_name: &request.name,
                validity: Validity {
                    time_of_validity_not_before: request
                        .not_before
                        .to_rfc3339_opts(SecondsFormat::Millis, true),
                    time_of_validity_not_after: request
                        .not_after
                        .to_rfc3339_opts(SecondsFormat::Millis, true),
                },
            },
            freeform_tags: &request.tags,
        })
        .context(SerializeBodySnafu)?;
        let created: CertificateBody = self
            .call(
                self.http
                    .post(format!("{}/certificates", self.management_endpoint)),
                Some(body),
            )
            .await?;
        Ok(CertificateHandle { id: created.id })
    }

    async fn get_certificate_bundle(
        &self,
        certificate: &CertificateHandle,
        version_name: &str,
        bundle_type: CertificateBundleType,
    ) -> Result<String, Error> {
        let bundle_type: &'static str = bundle_type.into();
        let bundle: CertificateBundleBody = self
            .call(
                self.http
                    .get(format!(
                        "{}/certificateBundles/{}",
                        self.retrieval_endpoint, certificate.id
                    ))
                    .query(&[
                        ("versionName", version_name),
                        ("certificateBundleType", bundle_type),
                    ]),
                None,
            )
            .await?;
        bundle.into_chain().context(EmptyBundleSnafu {
            certificate_id: &certificate.id,
        })
    }
}

/// Signs requests on behalf of one API user.
#[derive(Debug)]
struct RequestSigner {
    key_id: String,
    key: Unloggable<PKey<Private>>,
}

impl RequestSigner {
    /// Builds the `Authorization` header value covering `headers`, in order.
    fn authorization(
        &self,
        headers: &[(&str, String)],
    ) -> Result<String, openssl::error::ErrorStack> {
        let mut signer = Signer::new(MessageDigest::sha256(), &self.key)?;
        signer.update(signing_string(headers).as_bytes())?;
        let signature = openssl::base64::encode_block(&signer.sign_to_vec()?);
        let header_names = headers
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(" ");
        Ok(format!(
            r#"Signature version="1",keyId="{}",algorithm="rsa-sha256",headers="{header_names}",signature="{signature}""#,
            self.key_id
        ))
    }
}

fn signing_string(headers: &[(&str, String)]) -> String {
    headers
        .iter()
        .map(|(name, value)| format!("{name}: {value}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Formats `time` as an RFC 7231 HTTP date.
fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CertificateAuthorityBody {
    id: String,
    compartment_id: Option<String>,
    name: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateCertificateDetails<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    compartment_id: Option<&'a str>,
    description: &'a str,
    certificate_config: CertificateConfig<'a>,
    freeform_tags: &'a BTreeMap<String, String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CertificateConfig<'a> {
    config_type: &'static str,
    issuer_certificate_authority_id: &'a str,
    csr_pem: &'a str,
    version_name: &'a str,
    validity: Validity,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Validity {
    time_of_validity_not_before: String,
    time_of_validity_not_after: String,
}

#[derive(Deserialize)]
struct CertificateBody {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CertificateBundleBody {
    certificate_pem: Option<String>,
    cert_chain_pem: Option<String>,
}

impl CertificateBundleBody {
    /// Joins the leaf certificate and its issuer chain into a single PEM chain.
    fn into_chain(self) -> Option<String> {
        let parts = [self.certificate_pem, self.cert_chain_pem]
            .into_iter()
            .flatten()
            .map(|pem| pem.trim().to_string())
            .filter(|pem| !pem.is_empty())
            .collect::<Vec<_>>();
        (!parts.is_empty()).then(|| parts.join("\n") + "\n")
    }
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
struct ServiceErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl ServiceErrorBody {
    /// Error bodies that are not OCI error documents (such as proxy error pages) are kept as the
    /// message.
    fn parse(bytes: &[u8]) -> Self {
        serde_json::from_slice(bytes).unwrap_or_else(|_| Self {
            code: String::new(),
            message: String::from_utf8_lossy(bytes).trim().to_string(),
        })
    }
}
