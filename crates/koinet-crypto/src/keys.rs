//! ECDSA P-256 keypairs for envelope signing.
//!
//! Private keys are stored as PKCS#8 PEM on disk. Public keys travel
//! inside node profiles as base64-encoded SPKI DER strings, and
//! signatures as base64-encoded raw `r || s` bytes (64 bytes before
//! encoding) — both match the WebCrypto conventions of peer
//! implementations. Signing hashes the message with SHA-256 internally.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use koinet_types::{KoiNetError, Result};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rand::rngs::OsRng;

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

/// ECDSA P-256 verifying key.
#[derive(Clone, Debug)]
pub struct PublicKey {
    verifying_key: VerifyingKey,
}

impl PublicKey {
    /// Parses a public key from a base64-encoded SPKI DER string, the
    /// form carried in node profiles.
    pub fn from_der_b64(der_b64: &str) -> Result<Self> {
        let der = BASE64.decode(der_b64).map_err(|e| KoiNetError::CryptoError {
            reason: format!("public key is not valid base64: {e}"),
        })?;
        let verifying_key =
            VerifyingKey::from_public_key_der(&der).map_err(|e| KoiNetError::CryptoError {
                reason: format!("public key is not valid SPKI DER: {e}"),
            })?;
        Ok(Self { verifying_key })
    }

    /// Encodes this key as a base64 SPKI DER string.
    pub fn to_der_b64(&self) -> Result<String> {
        let doc = self
            .verifying_key
            .to_public_key_der()
            .map_err(|e| KoiNetError::CryptoError {
                reason: format!("failed to encode public key: {e}"),
            })?;
        Ok(BASE64.encode(doc.as_bytes()))
    }

    /// Verifies a base64-encoded signature over `message`.
    ///
    /// Returns [`KoiNetError::InvalidSignature`] if the signature bytes
    /// are malformed or verification fails.
    pub fn verify(&self, message: &[u8], signature_b64: &str) -> Result<()> {
        let sig_bytes = BASE64
            .decode(signature_b64)
            .map_err(|e| KoiNetError::InvalidSignature {
                reason: format!("signature is not valid base64: {e}"),
            })?;
        let signature =
            Signature::from_slice(&sig_bytes).map_err(|e| KoiNetError::InvalidSignature {
                reason: format!("malformed signature bytes: {e}"),
            })?;
        self.verifying_key
            .verify(message, &signature)
            .map_err(|e| KoiNetError::InvalidSignature {
                reason: format!("verification failed: {e}"),
            })
    }
}

// ---------------------------------------------------------------------------
// Keypair
// ---------------------------------------------------------------------------

/// ECDSA P-256 signing keypair.
///
/// Intentionally implements neither `Clone` nor `Debug`, so the private
/// key cannot leak through logs or accidental copies.
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generates a new random keypair using OS-level entropy.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Loads a keypair from a PKCS#8 PEM document.
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self> {
        let signing_key =
            SigningKey::from_pkcs8_pem(pem).map_err(|e| KoiNetError::CryptoError {
                reason: format!("failed to parse private key PEM: {e}"),
            })?;
        Ok(Self { signing_key })
    }

    /// Encodes the private key as PKCS#8 PEM for persistence.
    pub fn to_pkcs8_pem(&self) -> Result<String> {
        let pem = self
            .signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KoiNetError::CryptoError {
                reason: format!("failed to encode private key: {e}"),
            })?;
        Ok(pem.to_string())
    }

    /// Returns the public half of this keypair.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: *self.signing_key.verifying_key(),
        }
    }

    /// Convenience: the base64 SPKI DER form of the public key, as
    /// embedded in node profiles.
    pub fn public_key_der_b64(&self) -> Result<String> {
        self.public_key().to_der_b64()
    }

    /// Signs a message and returns the base64-encoded signature.
    pub fn sign(&self, message: &[u8]) -> String {
        let signature: Signature = self.signing_key.sign(message);
        BASE64.encode(signature.to_bytes())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() -> Result<()> {
        let kp = Keypair::generate();
        let msg = b"test message";
        let sig = kp.sign(msg);
        kp.public_key().verify(msg, &sig)
    }

    #[test]
    fn wrong_message_fails_verification() {
        let kp = Keypair::generate();
        let sig = kp.sign(b"correct message");
        assert!(kp.public_key().verify(b"wrong message", &sig).is_err());
    }

    #[test]
    fn wrong_key_fails_verification() {
        let kp1 = Keypair::generate();
        let kp2 = Keypair::generate();
        let sig = kp1.sign(b"test");
        assert!(kp2.public_key().verify(b"test", &sig).is_err());
    }

    #[test]
    fn corrupted_signature_fails_verification() {
        let kp = Keypair::generate();
        let sig = kp.sign(b"test");
        let mut raw = base64::engine::general_purpose::STANDARD
            .decode(&sig)
            .unwrap_or_default();
        raw[0] ^= 0x01;
        let corrupted = base64::engine::general_purpose::STANDARD.encode(&raw);
        assert!(kp.public_key().verify(b"test", &corrupted).is_err());
    }

    #[test]
    fn public_key_der_roundtrip() -> Result<()> {
        let kp = Keypair::generate();
        let der = kp.public_key_der_b64()?;
        let parsed = PublicKey::from_der_b64(&der)?;
        assert_eq!(parsed.to_der_b64()?, der);
        Ok(())
    }

    #[test]
    fn pkcs8_pem_roundtrip_preserves_identity() -> Result<()> {
        let kp = Keypair::generate();
        let pem = kp.to_pkcs8_pem()?;
        let restored = Keypair::from_pkcs8_pem(&pem)?;
        assert_eq!(
            kp.public_key_der_b64()?,
            restored.public_key_der_b64()?
        );
        // A signature from the restored key verifies under the original.
        let sig = restored.sign(b"persisted");
        kp.public_key().verify(b"persisted", &sig)
    }

    #[test]
    fn garbage_public_key_rejected() {
        assert!(PublicKey::from_der_b64("not base64 !!!").is_err());
        let valid_b64_bad_der = base64::engine::general_purpose::STANDARD.encode(b"junk");
        assert!(PublicKey::from_der_b64(&valid_b64_bad_der).is_err());
    }
}
