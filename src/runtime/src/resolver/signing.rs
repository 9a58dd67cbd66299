//! Component descriptor digests and RSA signatures.
//!
//! The digest is SHA-256 over a canonical JSON rendering of the component
//! (object keys sorted, arrays in order) with the fields that change when a
//! component is transported removed: access specifications, repository
//! contexts and labels not marked for signing.

use a3s_ocm_core::descriptor::{DigestSpec, Signature, SignatureSpec};
use a3s_ocm_core::error::{OcmError, Result};
use a3s_ocm_core::ComponentDescriptor;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub const HASH_ALGORITHM: &str = "SHA-256";
pub const NORMALISATION_ALGORITHM: &str = "jsonNormalisation/a3s-v1";
pub const SIGNATURE_ALGORITHM: &str = "RSASSA-PKCS1-V1_5";
pub const SIGNATURE_MEDIA_TYPE: &str = "application/vnd.ocm.signature.rsa";

/// Canonical bytes the descriptor digest is computed over.
pub fn normalise(descriptor: &ComponentDescriptor) -> Result<Vec<u8>> {
    let mut component = serde_json::to_value(&descriptor.component)?;
    if let Value::Object(map) = &mut component {
        map.remove("repositoryContexts");
        retain_signing_labels(map);
        for key in ["resources", "sources"] {
            if let Some(Value::Array(items)) = map.get_mut(key) {
                for item in items.iter_mut().filter_map(Value::as_object_mut) {
                    item.remove("access");
                    retain_signing_labels(item);
                }
            }
        }
        if let Some(Value::Array(refs)) = map.get_mut("componentReferences") {
            for item in refs.iter_mut().filter_map(Value::as_object_mut) {
                retain_signing_labels(item);
            }
        }
    }

    let mut root = Map::new();
    root.insert("component".to_string(), component);
    Ok(serde_json::to_vec(&canonicalize(&Value::Object(root)))?)
}

/// Hex SHA-256 digest of the normalised descriptor.
pub fn digest(descriptor: &ComponentDescriptor) -> Result<String> {
    Ok(hex::encode(Sha256::digest(normalise(descriptor)?)))
}

/// Sign a descriptor with a PEM private key (PKCS#1 or PKCS#8).
pub fn sign(descriptor: &ComponentDescriptor, name: &str, private_key_pem: &str) -> Result<Signature> {
    let key = RsaPrivateKey::from_pkcs1_pem(private_key_pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(private_key_pem))
        .map_err(|e| OcmError::ValidationError(format!("Invalid RSA private key: {}", e)))?;

    let digest_hex = digest(descriptor)?;
    let digest_bytes = hex::decode(&digest_hex)
        .map_err(|e| OcmError::Invariant(format!("digest is not hex: {}", e)))?;
    let signature = key
        .sign(Pkcs1v15Sign::new::<Sha256>(), &digest_bytes)
        .map_err(|e| OcmError::Other(format!("Signing failed: {}", e)))?;

    Ok(Signature {
        name: name.to_string(),
        digest: DigestSpec {
            hash_algorithm: HASH_ALGORITHM.to_string(),
            normalisation_algorithm: NORMALISATION_ALGORITHM.to_string(),
            value: digest_hex,
        },
        signature: SignatureSpec {
            algorithm: SIGNATURE_ALGORITHM.to_string(),
            value: hex::encode(signature),
            media_type: SIGNATURE_MEDIA_TYPE.to_string(),
        },
    })
}

/// Decode a PEM public key (PKCS#1 or SubjectPublicKeyInfo).
pub fn decode_public_key(pem: &str) -> Result<RsaPublicKey> {
    RsaPublicKey::from_pkcs1_pem(pem)
        .or_else(|_| RsaPublicKey::from_public_key_pem(pem))
        .map_err(|e| OcmError::ValidationError(format!("Invalid RSA public key: {}", e)))
}

/// Check one named signature.
///
/// A digest mismatch or a signature that does not verify is `Ok(false)`;
/// only an undecodable key or a missing signature is an error.
pub fn verify(descriptor: &ComponentDescriptor, name: &str, public_key_pem: &str) -> Result<bool> {
    let key = decode_public_key(public_key_pem)?;
    let signature = descriptor.signature(name).ok_or_else(|| {
        OcmError::ValidationError(format!(
            "Component {}:{} has no signature named '{}'",
            descriptor.name(),
            descriptor.version(),
            name
        ))
    })?;

    if signature.digest.hash_algorithm != HASH_ALGORITHM
        || signature.digest.normalisation_algorithm != NORMALISATION_ALGORITHM
    {
        tracing::warn!(
            signature = %name,
            hash = %signature.digest.hash_algorithm,
            normalisation = %signature.digest.normalisation_algorithm,
            "Unsupported signature digest"
        );
        return Ok(false);
    }

    let actual = digest(descriptor)?;
    if !actual.eq_ignore_ascii_case(&signature.digest.value) {
        tracing::debug!(
            signature = %name,
            expected = %signature.digest.value,
            actual = %actual,
            "Descriptor digest mismatch"
        );
        return Ok(false);
    }

    let (Ok(digest_bytes), Ok(sig_bytes)) = (
        hex::decode(&actual),
        hex::decode(&signature.signature.value),
    ) else {
        return Ok(false);
    };
    Ok(key
        .verify(Pkcs1v15Sign::new::<Sha256>(), &digest_bytes, &sig_bytes)
        .is_ok())
}

fn retain_signing_labels(object: &mut Map<String, Value>) {
    if let Some(Value::Array(labels)) = object.get_mut("labels") {
        labels.retain(|label| label.get("signing").and_then(Value::as_bool) == Some(true));
        if labels.is_empty() {
            object.remove("labels");
        }
    }
}

/// Rebuild every object with keys inserted in sorted order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    out.insert(key.clone(), canonicalize(v));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
