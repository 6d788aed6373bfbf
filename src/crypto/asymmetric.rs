//! Machine key pairs and master-key wrapping.
//!
//! Every machine holds an RSA-4096 key pair. The private key never leaves
//! the machine's home directory; the public key travels inside the machine
//! record so that any member can wrap a master key for it.
//!
//! ## Formats
//!
//! - Private key: PEM, PKCS#1 (`RSA PRIVATE KEY`)
//! - Public key: PEM, SubjectPublicKeyInfo (`PUBLIC KEY`)
//! - Fingerprint: `SHA256:` followed by base64 of SHA-256 over the
//!   SubjectPublicKeyInfo DER
//!
//! Decoders additionally accept a base64-wrapped PEM produced by old
//! clients; writers always emit raw PEM.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::rngs::OsRng;
use rsa::{
    pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey},
    pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding},
    traits::PublicKeyParts,
    Oaep, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey,
};
use sha2::{Digest, Sha256};
use zeroize::{Zeroizing, ZeroizeOnDrop};

use crate::error::{VaultError, VaultResult};

/// RSA modulus size in bits.
pub const RSA_KEY_BITS: usize = 4096;

/// Prefix of every public-key fingerprint.
pub const FINGERPRINT_PREFIX: &str = "SHA256:";

/// SHA-256 output length, used when computing the OAEP payload capacity.
const OAEP_HASH_LEN: usize = 32;

/// An RSA-4096 machine key pair.
#[derive(ZeroizeOnDrop)]
pub struct MachineKeyPair {
    private_key: RsaPrivateKey,
    #[zeroize(skip)]
    public_key: RsaPublicKey,
}

impl MachineKeyPair {
    /// Generate a new 4096-bit key pair. Takes a few seconds.
    pub fn generate() -> VaultResult<Self> {
        let mut rng = OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
            .map_err(|e| VaultError::KeyGenerationFailed(e.to_string()))?;
        let public_key = private_key.to_public_key();

        Ok(Self {
            private_key,
            public_key,
        })
    }

    /// The public half of this key pair.
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// Serialize the private key to PKCS#1 PEM (`RSA PRIVATE KEY`).
    ///
    /// The returned string is zeroized on drop.
    pub fn private_key_to_pem(&self) -> VaultResult<Zeroizing<String>> {
        self.private_key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| VaultError::KeyGenerationFailed(format!("private key encode: {e}")))
    }

    /// Serialize the public key to SubjectPublicKeyInfo PEM (`PUBLIC KEY`).
    pub fn public_key_to_pem(&self) -> VaultResult<String> {
        public_key_to_pem(&self.public_key)
    }

    /// Load a key pair from a PKCS#1 private-key PEM.
    pub fn from_private_pem(pem: &str) -> VaultResult<Self> {
        let text = normalize_pem(pem);
        let private_key = RsaPrivateKey::from_pkcs1_pem(&text)
            .map_err(|e| VaultError::KeyGenerationFailed(format!("private key decode: {e}")))?;
        let public_key = private_key.to_public_key();

        Ok(Self {
            private_key,
            public_key,
        })
    }

    /// Unwrap a master key that was wrapped for this machine.
    ///
    /// The returned buffer is zeroized on drop.
    pub fn unwrap_key(&self, wrapped: &[u8]) -> VaultResult<Zeroizing<Vec<u8>>> {
        self.private_key
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map(Zeroizing::new)
            .map_err(|_| VaultError::DecryptionFailed)
    }

    /// Sign a message with PKCS#1 v1.5 over its SHA-256 digest.
    ///
    /// Only used by the silent-login challenge flow.
    pub fn sign(&self, message: &[u8]) -> VaultResult<Vec<u8>> {
        let digest = Sha256::digest(message);
        self.private_key
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .map_err(|e| VaultError::EncryptionFailed(format!("signing failed: {e}")))
    }
}

impl std::fmt::Debug for MachineKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineKeyPair")
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// Serialize a public key to SubjectPublicKeyInfo PEM.
pub fn public_key_to_pem(public_key: &RsaPublicKey) -> VaultResult<String> {
    public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| VaultError::KeyGenerationFailed(format!("public key encode: {e}")))
}

/// Parse a public key from SubjectPublicKeyInfo PEM, accepting the legacy
/// base64-wrapped form.
pub fn public_key_from_pem(pem: &str) -> VaultResult<RsaPublicKey> {
    let text = normalize_pem(pem);
    RsaPublicKey::from_public_key_pem(&text).map_err(|e| VaultError::InvalidInput {
        field: "public_key",
        reason: format!("not a valid public key PEM: {e}"),
    })
}

/// Compute the fingerprint of a public key.
///
/// The fingerprint is `SHA256:` plus base64 of SHA-256 over the
/// SubjectPublicKeyInfo DER, and is stable across serializations of the
/// same key.
pub fn fingerprint(public_key: &RsaPublicKey) -> VaultResult<String> {
    let der = public_key
        .to_public_key_der()
        .map_err(|e| VaultError::KeyGenerationFailed(format!("public key encode: {e}")))?;
    let hash = Sha256::digest(der.as_bytes());
    Ok(format!("{}{}", FINGERPRINT_PREFIX, BASE64.encode(hash)))
}

/// Wrap a payload (normally a 32-byte master key) under a public key with
/// RSA-OAEP/SHA-256.
pub fn wrap_key(public_key: &RsaPublicKey, payload: &[u8]) -> VaultResult<Vec<u8>> {
    let max = public_key.size() - 2 * OAEP_HASH_LEN - 2;
    if payload.len() > max {
        return Err(VaultError::InputTooLarge {
            size: payload.len(),
            max,
        });
    }

    let mut rng = OsRng;
    public_key
        .encrypt(&mut rng, Oaep::new::<Sha256>(), payload)
        .map_err(|e| VaultError::EncryptionFailed(format!("key wrap: {e}")))
}

/// Verify a PKCS#1 v1.5 signature over the SHA-256 digest of `message`.
pub fn verify_signature(
    public_key: &RsaPublicKey,
    message: &[u8],
    signature: &[u8],
) -> VaultResult<()> {
    let digest = Sha256::digest(message);
    public_key
        .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
        .map_err(|_| VaultError::IntegrityFailed)
}

/// Accept both raw PEM and the legacy base64-of-PEM wrapping.
///
/// Old clients stored public keys as a single base64 line with the PEM
/// armor inside. New writes are always raw PEM.
fn normalize_pem(input: &str) -> Zeroizing<String> {
    let trimmed = input.trim();
    if trimmed.contains("-----BEGIN") {
        return Zeroizing::new(trimmed.to_string());
    }

    if let Ok(decoded) = BASE64.decode(trimmed.as_bytes()) {
        if let Ok(text) = String::from_utf8(decoded) {
            if text.contains("-----BEGIN") {
                return Zeroizing::new(text);
            }
        }
    }

    Zeroizing::new(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::symmetric::MasterKey;

    // 4096-bit generation is slow; share one key pair across tests.
    fn test_keypair() -> &'static MachineKeyPair {
        use std::sync::OnceLock;
        static KEYPAIR: OnceLock<MachineKeyPair> = OnceLock::new();
        KEYPAIR.get_or_init(|| MachineKeyPair::generate().unwrap())
    }

    #[test]
    fn test_private_pem_roundtrip() {
        let keypair = test_keypair();
        let pem = keypair.private_key_to_pem().unwrap();

        assert!(pem.contains("BEGIN RSA PRIVATE KEY"));
        assert!(pem.contains("END RSA PRIVATE KEY"));

        let restored = MachineKeyPair::from_private_pem(&pem).unwrap();
        assert_eq!(
            fingerprint(keypair.public_key()).unwrap(),
            fingerprint(restored.public_key()).unwrap()
        );
    }

    #[test]
    fn test_public_pem_roundtrip() {
        let keypair = test_keypair();
        let pem = keypair.public_key_to_pem().unwrap();

        assert!(pem.contains("BEGIN PUBLIC KEY"));

        let restored = public_key_from_pem(&pem).unwrap();
        assert_eq!(&restored, keypair.public_key());
    }

    #[test]
    fn test_legacy_base64_wrapped_pem() {
        let keypair = test_keypair();
        let pem = keypair.public_key_to_pem().unwrap();
        let wrapped = BASE64.encode(pem.as_bytes());

        let restored = public_key_from_pem(&wrapped).unwrap();
        assert_eq!(&restored, keypair.public_key());
    }

    #[test]
    fn test_fingerprint_stable_across_serializations() {
        let keypair = test_keypair();
        let fp1 = fingerprint(keypair.public_key()).unwrap();

        let pem = keypair.public_key_to_pem().unwrap();
        let restored = public_key_from_pem(&pem).unwrap();
        let fp2 = fingerprint(&restored).unwrap();

        assert_eq!(fp1, fp2);
        assert!(fp1.starts_with("SHA256:"));
    }

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let keypair = test_keypair();
        let master = MasterKey::generate();

        let wrapped = wrap_key(keypair.public_key(), master.as_bytes()).unwrap();
        let unwrapped = keypair.unwrap_key(&wrapped).unwrap();

        assert_eq!(master.as_bytes(), unwrapped.as_slice());
    }

    #[test]
    fn test_wrap_rejects_oversized_payload() {
        let keypair = test_keypair();
        let payload = vec![0u8; 4096];

        let result = wrap_key(keypair.public_key(), &payload);
        assert!(matches!(result, Err(VaultError::InputTooLarge { .. })));
    }

    #[test]
    fn test_unwrap_with_wrong_key_fails() {
        let keypair = test_keypair();
        let other = MachineKeyPair::generate().unwrap();

        let wrapped = wrap_key(keypair.public_key(), b"0123456789abcdef").unwrap();
        let result = other.unwrap_key(&wrapped);

        assert!(matches!(result, Err(VaultError::DecryptionFailed)));
    }

    #[test]
    fn test_sign_verify() {
        let keypair = test_keypair();
        let message = b"challenge-nonce-1234";

        let signature = keypair.sign(message).unwrap();
        verify_signature(keypair.public_key(), message, &signature).unwrap();
    }

    #[test]
    fn test_verify_rejects_altered_message() {
        let keypair = test_keypair();
        let signature = keypair.sign(b"original").unwrap();

        let result = verify_signature(keypair.public_key(), b"altered", &signature);
        assert!(result.is_err());
    }
}
