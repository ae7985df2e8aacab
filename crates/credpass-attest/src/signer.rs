//! The attestation signing key.

use std::fmt;

use credpass_core::error::AttestationError;
use credpass_core::types::Address;
use ed25519_dalek::{Signer, SigningKey};
use zeroize::Zeroizing;

use crate::envelope::{signer_address, AttestationCall, SignedAttestation, UnsignedAttestation};

/// Ed25519 key that signs attestation transactions.
///
/// The underlying [`SigningKey`] zeroizes itself on drop; seed material
/// passed through this type is held in [`Zeroizing`] buffers.
pub struct AttestationSigner {
    signing_key: SigningKey,
}

impl AttestationSigner {
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            signing_key: SigningKey::generate(&mut csprng),
        }
    }

    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let seed = Zeroizing::new(bytes);
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    /// Parse a 32-byte hex seed, with or without `0x`.
    pub fn from_hex(secret: &str) -> Result<Self, AttestationError> {
        let trimmed = secret.trim();
        let body = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = Zeroizing::new(
            hex::decode(body).map_err(|_| AttestationError::Encoding("signer key is not hex".into()))?,
        );
        let mut seed = Zeroizing::new([0u8; 32]);
        if bytes.len() != seed.len() {
            return Err(AttestationError::Encoding(format!(
                "signer key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        seed.copy_from_slice(&bytes);
        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// The ledger identity of this key.
    pub fn address(&self) -> Address {
        signer_address(&self.public_key_bytes())
    }

    pub fn sign(&self, nonce: u64, call: AttestationCall) -> Result<SignedAttestation, AttestationError> {
        let unsigned = UnsignedAttestation {
            signer: self.public_key_bytes(),
            nonce,
            call,
        };
        let hash = unsigned.tx_hash()?;
        Ok(SignedAttestation {
            unsigned,
            signature: self.signing_key.sign(hash.as_bytes()).to_bytes(),
        })
    }
}

impl fmt::Debug for AttestationSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttestationSigner")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}
