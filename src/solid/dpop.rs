//! DPoP (Demonstrating Proof of Possession) proofs
//!
//! Implements RFC 9449 proofs binding each request to an ephemeral P-256 key.

use crate::error::{Error, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use jsonwebtoken::jwk::{
    AlgorithmParameters, CommonParameters, EllipticCurve, EllipticCurveKeyParameters,
    EllipticCurveKeyType, Jwk,
};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::EncodePrivateKey;
use p256::SecretKey;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Ephemeral P-256 key a session's tokens are bound to
#[derive(Clone)]
pub struct DPoPKey {
    secret: SecretKey,
}

impl DPoPKey {
    /// Generate a new key pair
    pub fn generate() -> Self {
        Self {
            secret: SecretKey::random(&mut OsRng),
        }
    }

    /// Parse a private key serialized with [`DPoPKey::to_jwk_string`]
    pub fn from_jwk_str(jwk: &str) -> Result<Self> {
        let secret =
            SecretKey::from_jwk_str(jwk).map_err(|e| Error::InvalidSigningKey(e.to_string()))?;
        Ok(Self { secret })
    }

    /// Serialize the full private key as a JWK
    pub fn to_jwk_string(&self) -> String {
        self.secret.to_jwk_string().to_string()
    }

    /// Public half as a JWK for the proof header
    pub fn public_jwk(&self) -> Result<Jwk> {
        let point = self.secret.public_key().to_encoded_point(false);
        let (x, y) = match (point.x(), point.y()) {
            (Some(x), Some(y)) => (URL_SAFE_NO_PAD.encode(x), URL_SAFE_NO_PAD.encode(y)),
            _ => {
                return Err(Error::InvalidSigningKey(
                    "public key is the identity point".into(),
                ))
            }
        };

        Ok(Jwk {
            common: CommonParameters::default(),
            algorithm: AlgorithmParameters::EllipticCurve(EllipticCurveKeyParameters {
                key_type: EllipticCurveKeyType::EC,
                curve: EllipticCurve::P256,
                x,
                y,
            }),
        })
    }

    /// Create a proof for one HTTP request
    ///
    /// # Arguments
    /// * `method` - HTTP method, upper-cased into `htm`
    /// * `url` - Full target URL
    /// * `access_token` - Present for resource requests; its hash becomes `ath`
    pub fn proof(&self, method: &str, url: &str, access_token: Option<&str>) -> Result<String> {
        let mut header = Header::new(Algorithm::ES256);
        header.typ = Some("dpop+jwt".to_string());
        header.jwk = Some(self.public_jwk()?);

        let claims = DPoPClaims {
            jti: Uuid::new_v4().to_string(),
            htm: method.to_ascii_uppercase(),
            htu: url.to_string(),
            iat: Utc::now().timestamp(),
            ath: access_token.map(compute_ath),
        };

        let der = self
            .secret
            .to_pkcs8_der()
            .map_err(|e| Error::InvalidSigningKey(e.to_string()))?;
        let encoding_key = EncodingKey::from_ec_der(der.as_bytes());

        Ok(encode(&header, &claims, &encoding_key)?)
    }
}

impl std::fmt::Debug for DPoPKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DPoPKey").finish_non_exhaustive()
    }
}

/// Build a proof from a stored JWK string
///
/// Fails with [`Error::InvalidSigningKey`] if `signer` is not a P-256 private key.
pub fn build_proof(
    method: &str,
    url: &str,
    signer: &str,
    access_token: Option<&str>,
) -> Result<String> {
    DPoPKey::from_jwk_str(signer)?.proof(method, url, access_token)
}

/// SHA-256 of the access token, base64url without padding
pub fn compute_ath(access_token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(access_token.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// DPoP proof claims (JWT payload)
#[derive(Debug, Serialize, Deserialize)]
struct DPoPClaims {
    /// Unique proof ID (prevents replay)
    jti: String,
    /// HTTP method
    htm: String,
    /// HTTP URI
    htu: String,
    /// Issued at (Unix timestamp)
    iat: i64,
    /// Access token hash (for resource server requests)
    #[serde(skip_serializing_if = "Option::is_none")]
    ath: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
    use std::collections::HashSet;

    fn verify(proof: &str, key: &DPoPKey) -> DPoPClaims {
        let jwk = key.public_jwk().unwrap();
        let AlgorithmParameters::EllipticCurve(params) = jwk.algorithm else {
            panic!("expected EC key");
        };
        let decoding_key = DecodingKey::from_ec_components(&params.x, &params.y).unwrap();
        let mut validation = Validation::new(Algorithm::ES256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        decode::<DPoPClaims>(proof, &decoding_key, &validation)
            .unwrap()
            .claims
    }

    #[test]
    fn test_proof_header() {
        let key = DPoPKey::generate();
        let proof = key
            .proof("post", "https://idp.example/token", None)
            .unwrap();

        let header = decode_header(&proof).unwrap();
        assert_eq!(header.alg, Algorithm::ES256);
        assert_eq!(header.typ.as_deref(), Some("dpop+jwt"));
        let jwk = header.jwk.unwrap();
        assert!(matches!(
            jwk.algorithm,
            AlgorithmParameters::EllipticCurve(EllipticCurveKeyParameters {
                curve: EllipticCurve::P256,
                ..
            })
        ));
    }

    #[test]
    fn test_token_endpoint_proof_has_no_ath() {
        let key = DPoPKey::generate();
        let proof = key
            .proof("post", "https://idp.example/token", None)
            .unwrap();

        let claims = verify(&proof, &key);
        assert_eq!(claims.htm, "POST");
        assert_eq!(claims.htu, "https://idp.example/token");
        assert!(claims.ath.is_none());
    }

    #[test]
    fn test_resource_proof_binds_access_token() {
        let key = DPoPKey::generate();
        let proof = key
            .proof("GET", "https://alice.example/data", Some("at-1"))
            .unwrap();

        let claims = verify(&proof, &key);
        assert_eq!(claims.ath.as_deref(), Some(compute_ath("at-1").as_str()));
    }

    #[test]
    fn test_proof_ids_are_unique() {
        let key = DPoPKey::generate();
        let ids: HashSet<String> = (0..50)
            .map(|_| {
                let proof = key.proof("GET", "https://alice.example/", None).unwrap();
                verify(&proof, &key).jti
            })
            .collect();
        assert_eq!(ids.len(), 50);
    }

    #[test]
    fn test_jwk_round_trip() {
        let key = DPoPKey::generate();
        let restored = DPoPKey::from_jwk_str(&key.to_jwk_string()).unwrap();

        let proof = restored
            .proof("GET", "https://alice.example/", None)
            .unwrap();
        verify(&proof, &key);
    }

    #[test]
    fn test_unparsable_key_is_an_error() {
        let err = build_proof("GET", "https://alice.example/", "not a jwk", None).unwrap_err();
        assert!(matches!(err, Error::InvalidSigningKey(_)));
    }

    #[test]
    fn test_ath_is_base64url() {
        let ath = compute_ath("test_access_token");
        assert!(!ath.contains('+'));
        assert!(!ath.contains('/'));
        assert!(!ath.contains('='));
        assert_eq!(ath.len(), 43);
    }
}
