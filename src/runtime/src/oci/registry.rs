//! OCI registry client for pushing and pulling artifacts.
//!
//! Uses the `oci-distribution` crate for the distribution API and `reqwest`
//! for manifest deletion, which `oci-distribution` does not expose.

use std::collections::HashMap;
use std::sync::Arc;

use a3s_ocm_core::error::{OcmError, Result};
use oci_distribution::client::{ClientConfig, ClientProtocol, Config, ImageLayer};
use oci_distribution::errors::OciDistributionError;
use oci_distribution::manifest::{OciDescriptor, OciImageManifest};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};
use reqwest::header::WWW_AUTHENTICATE;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::io::AsyncWrite;

use super::credentials::{CredentialSource, Credentials};
use super::reference::ImageReference;

/// A blob to push together with its media type.
#[derive(Debug, Clone)]
pub struct ArtifactBlob {
    pub data: Vec<u8>,
    pub media_type: String,
}

impl ArtifactBlob {
    pub fn new(data: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            data,
            media_type: media_type.into(),
        }
    }
}

/// Result of a successful artifact push.
#[derive(Debug, Clone)]
pub struct PushedArtifact {
    /// URL of the pushed manifest.
    pub manifest_url: String,
    /// Digests of the pushed layers, in push order.
    pub layer_digests: Vec<String>,
}

/// Registry client with per-host credentials.
pub struct RegistryClient {
    client: Client,
    http: reqwest::Client,
    credentials: Arc<dyn CredentialSource>,
    insecure: bool,
}

impl RegistryClient {
    /// Create a client; `insecure` selects plain HTTP.
    pub fn new(credentials: Arc<dyn CredentialSource>, insecure: bool) -> Self {
        let config = ClientConfig {
            protocol: if insecure {
                ClientProtocol::Http
            } else {
                ClientProtocol::Https
            },
            ..Default::default()
        };
        Self {
            client: Client::new(config),
            http: reqwest::Client::new(),
            credentials,
            insecure,
        }
    }

    /// Push a config blob and layers, then a manifest under the reference's tag.
    pub async fn push_artifact(
        &self,
        reference: &ImageReference,
        config: ArtifactBlob,
        layers: Vec<ArtifactBlob>,
    ) -> Result<PushedArtifact> {
        let oci_ref = to_oci_reference(reference)?;
        let auth = self.auth_for(&reference.registry)?;

        let layers: Vec<ImageLayer> = layers
            .into_iter()
            .map(|blob| ImageLayer::new(blob.data, blob.media_type, None))
            .collect();
        let layer_digests = layers.iter().map(|l| l.sha256_digest()).collect();
        let config = Config::new(config.data, config.media_type, None);

        tracing::debug!(
            reference = %reference,
            layers = layers.len(),
            "Pushing artifact"
        );

        let response = self
            .client
            .push(&oci_ref, &layers, config, &auth, None)
            .await
            .map_err(|e| classify(&reference.registry, "push artifact", e))?;

        Ok(PushedArtifact {
            manifest_url: response.manifest_url,
            layer_digests,
        })
    }

    /// Pull the image manifest and its digest.
    pub async fn pull_manifest(
        &self,
        reference: &ImageReference,
    ) -> Result<(OciImageManifest, String)> {
        let oci_ref = to_oci_reference(reference)?;
        let auth = self.auth_for(&reference.registry)?;
        self.client
            .pull_image_manifest(&oci_ref, &auth)
            .await
            .map_err(|e| classify(&reference.registry, "pull manifest", e))
    }

    /// Stream a blob of the reference's repository into `out`.
    pub async fn pull_blob_to<W>(
        &self,
        reference: &ImageReference,
        digest: &str,
        out: &mut W,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let oci_ref = to_oci_reference(reference)?;
        let auth = self.auth_for(&reference.registry)?;
        self.client
            .auth(&oci_ref, &auth, RegistryOperation::Pull)
            .await
            .map_err(|e| classify(&reference.registry, "authenticate", e))?;

        let descriptor = OciDescriptor {
            digest: digest.to_string(),
            ..Default::default()
        };
        self.client
            .pull_blob(&oci_ref, &descriptor, out)
            .await
            .map_err(|e| classify(&reference.registry, &format!("pull blob {}", digest), e))
    }

    /// Pull a blob fully into memory.
    pub async fn pull_blob(&self, reference: &ImageReference, digest: &str) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.pull_blob_to(reference, digest, &mut data).await?;
        Ok(data)
    }

    /// Pull the first layer of an artifact.
    pub async fn pull_first_layer(&self, reference: &ImageReference) -> Result<Vec<u8>> {
        let (manifest, _digest) = self.pull_manifest(reference).await?;
        let layer = manifest.layers.first().ok_or_else(|| {
            OcmError::ValidationError(format!("Artifact {} has no layers", reference))
        })?;
        self.pull_blob(reference, &layer.digest).await
    }

    /// List the tags of the reference's repository.
    pub async fn list_tags(&self, reference: &ImageReference) -> Result<Vec<String>> {
        let oci_ref = to_oci_reference(reference)?;
        let auth = self.auth_for(&reference.registry)?;
        let response = self
            .client
            .list_tags(&oci_ref, &auth, None, None)
            .await
            .map_err(|e| classify(&reference.registry, "list tags", e))?;
        Ok(response.tags)
    }

    /// Resolve a tag to its manifest digest; `None` if the manifest is absent.
    pub async fn manifest_digest(&self, reference: &ImageReference) -> Result<Option<String>> {
        let oci_ref = to_oci_reference(reference)?;
        let auth = self.auth_for(&reference.registry)?;
        match self.client.fetch_manifest_digest(&oci_ref, &auth).await {
            Ok(digest) => Ok(Some(digest)),
            Err(e) => match classify(&reference.registry, "fetch manifest digest", e) {
                OcmError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    /// Delete the manifest a tag points to.
    ///
    /// Returns `false` when there was nothing to delete.
    pub async fn delete_manifest(&self, reference: &ImageReference) -> Result<bool> {
        let Some(digest) = self.manifest_digest(reference).await? else {
            return Ok(false);
        };

        let url = format!(
            "{}://{}/v2/{}/manifests/{}",
            self.scheme(),
            registry_endpoint(&reference.registry),
            reference.repository,
            digest
        );
        let credentials = self.credentials.credentials(&reference.registry)?;

        let mut request = self.http.delete(&url);
        if let Some(c) = &credentials {
            request = request.basic_auth(&c.username, Some(&c.password));
        }
        let mut response = request
            .send()
            .await
            .map_err(|e| transport_error(&reference.registry, e))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let challenge = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .and_then(BearerChallenge::parse)
                .ok_or_else(|| {
                    OcmError::AuthError(format!(
                        "{} rejected manifest deletion without a bearer challenge",
                        reference.registry
                    ))
                })?;
            let token = self
                .fetch_token(&challenge, &reference.repository, credentials.as_ref())
                .await?;
            response = self
                .http
                .delete(&url)
                .bearer_auth(token)
                .send()
                .await
                .map_err(|e| transport_error(&reference.registry, e))?;
        }

        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(OcmError::AuthError(format!(
                "{} denied deleting {}",
                reference.registry, reference
            ))),
            status => Err(OcmError::RegistryError {
                registry: reference.registry.clone(),
                message: format!("Failed to delete manifest {}: HTTP {}", digest, status),
            }),
        }
    }

    async fn fetch_token(
        &self,
        challenge: &BearerChallenge,
        repository: &str,
        credentials: Option<&Credentials>,
    ) -> Result<String> {
        #[derive(Deserialize)]
        struct TokenResponse {
            token: Option<String>,
            access_token: Option<String>,
        }

        let scope = format!("repository:{}:delete,pull", repository);
        let mut request = self
            .http
            .get(&challenge.realm)
            .query(&[("scope", scope.as_str())]);
        if let Some(service) = &challenge.service {
            request = request.query(&[("service", service.as_str())]);
        }
        if let Some(c) = credentials {
            request = request.basic_auth(&c.username, Some(&c.password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| OcmError::AuthError(format!("Token request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(OcmError::AuthError(format!(
                "Token endpoint {} returned HTTP {}",
                challenge.realm,
                response.status()
            )));
        }
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| OcmError::AuthError(format!("Invalid token response: {}", e)))?;
        body.token
            .or(body.access_token)
            .ok_or_else(|| OcmError::AuthError("Token response without token".to_string()))
    }

    fn auth_for(&self, registry: &str) -> Result<RegistryAuth> {
        Ok(match self.credentials.credentials(registry)? {
            Some(c) => RegistryAuth::Basic(c.username, c.password),
            None => RegistryAuth::Anonymous,
        })
    }

    fn scheme(&self) -> &'static str {
        if self.insecure {
            "http"
        } else {
            "https"
        }
    }
}

/// Convert an ImageReference to an oci-distribution Reference.
fn to_oci_reference(reference: &ImageReference) -> Result<Reference> {
    let ref_str = match (&reference.tag, &reference.digest) {
        (_, Some(digest)) => format!("{}@{}", reference.repository_url(), digest),
        (Some(tag), None) => format!("{}:{}", reference.repository_url(), tag),
        (None, None) => format!("{}:latest", reference.repository_url()),
    };
    ref_str.parse::<Reference>().map_err(|e| {
        OcmError::ValidationError(format!("Invalid OCI reference '{}': {}", ref_str, e))
    })
}

/// Docker Hub serves the API from a different host than its name.
fn registry_endpoint(registry: &str) -> &str {
    match registry {
        "docker.io" | "index.docker.io" => "registry-1.docker.io",
        other => other,
    }
}

/// Map a distribution error onto the error taxonomy.
fn classify(registry: &str, operation: &str, err: OciDistributionError) -> OcmError {
    if let OciDistributionError::ImageManifestNotFoundError(ref what) = err {
        return OcmError::NotFound(format!("{}: {}", registry, what));
    }
    let message = err.to_string();
    let lower = message.to_lowercase();
    if lower.contains("manifest_unknown")
        || lower.contains("name_unknown")
        || lower.contains("blob_unknown")
        || lower.contains("not found")
        || lower.contains("404")
    {
        OcmError::NotFound(format!("{} {}: {}", registry, operation, message))
    } else if lower.contains("unauthorized") || lower.contains("denied") || lower.contains("401")
    {
        OcmError::AuthError(format!("{} {}: {}", registry, operation, message))
    } else {
        OcmError::RegistryError {
            registry: registry.to_string(),
            message: format!("Failed to {}: {}", operation, message),
        }
    }
}

fn transport_error(registry: &str, err: reqwest::Error) -> OcmError {
    OcmError::RegistryError {
        registry: registry.to_string(),
        message: err.to_string(),
    }
}

/// Parsed `WWW-Authenticate: Bearer ...` challenge.
#[derive(Debug, PartialEq)]
struct BearerChallenge {
    realm: String,
    service: Option<String>,
}

impl BearerChallenge {
    fn parse(header: &str) -> Option<Self> {
        let params = header.trim().strip_prefix("Bearer ")?;
        let mut fields = HashMap::new();
        let mut rest = params.trim();
        while !rest.is_empty() {
            let (key, after_key) = rest.split_once('=')?;
            let after_key = after_key.trim_start();
            let (value, remainder) = if let Some(quoted) = after_key.strip_prefix('"') {
                let end = quoted.find('"')?;
                (&quoted[..end], &quoted[end + 1..])
            } else {
                match after_key.find(',') {
                    Some(end) => (&after_key[..end], &after_key[end..]),
                    None => (after_key, ""),
                }
            };
            fields.insert(key.trim().to_lowercase(), value.to_string());
            rest = remainder.trim_start_matches(',').trim_start();
        }
        Some(Self {
            realm: fields.remove("realm")?,
            service: fields.remove("service"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::credentials::{Anonymous, StaticCredentials};

    #[test]
    fn test_to_oci_reference_with_tag() {
        let r = ImageReference::parse("ghcr.io/acme/web:v0.1.0").unwrap();
        assert_eq!(
            to_oci_reference(&r).unwrap().to_string(),
            "ghcr.io/acme/web:v0.1.0"
        );
    }

    #[test]
    fn test_to_oci_reference_prefers_digest() {
        let r = ImageReference::parse(
            "localhost:5000/sha-1:v1@sha256:abcdef1234567890abcdef1234567890abcdef1234567890abcdef1234567890",
        )
        .unwrap();
        let oci = to_oci_reference(&r).unwrap().to_string();
        assert!(oci.contains("@sha256:"));
        assert!(!oci.contains(":v1"));
    }

    #[test]
    fn test_auth_from_credentials() {
        let source = StaticCredentials::new().with("ghcr.io", Credentials::new("u", "p"));
        let client = RegistryClient::new(Arc::new(source), false);
        assert!(matches!(
            client.auth_for("ghcr.io").unwrap(),
            RegistryAuth::Basic(_, _)
        ));
        assert!(matches!(
            client.auth_for("quay.io").unwrap(),
            RegistryAuth::Anonymous
        ));
    }

    #[test]
    fn test_scheme() {
        assert_eq!(RegistryClient::new(Arc::new(Anonymous), true).scheme(), "http");
        assert_eq!(RegistryClient::new(Arc::new(Anonymous), false).scheme(), "https");
    }

    #[test]
    fn test_registry_endpoint() {
        assert_eq!(registry_endpoint("docker.io"), "registry-1.docker.io");
        assert_eq!(registry_endpoint("ghcr.io"), "ghcr.io");
    }

    #[test]
    fn test_bearer_challenge_parse() {
        let challenge = BearerChallenge::parse(
            r#"Bearer realm="https://auth.example.com/token",service="registry.example.com",scope="repository:a:pull""#,
        )
        .unwrap();
        assert_eq!(challenge.realm, "https://auth.example.com/token");
        assert_eq!(challenge.service.as_deref(), Some("registry.example.com"));
    }

    #[test]
    fn test_bearer_challenge_rejects_basic() {
        assert!(BearerChallenge::parse(r#"Basic realm="registry""#).is_none());
        assert!(BearerChallenge::parse("Bearer service=\"x\"").is_none());
    }

    #[test]
    fn test_classify_manifest_not_found() {
        let err = classify(
            "ghcr.io",
            "pull manifest",
            OciDistributionError::ImageManifestNotFoundError("acme/web:1".to_string()),
        );
        assert!(matches!(err, OcmError::NotFound(_)));
    }
}
