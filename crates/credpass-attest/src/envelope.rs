//! Attestation transactions.
//!
//! An [`UnsignedAttestation`] is bincode-encoded (standard config) and hashed
//! with BLAKE3 to give the transaction hash. The Ed25519 signature covers
//! that hash. The ledger identifies the signer by [`signer_address`], the
//! last 20 bytes of the BLAKE3 hash of the public key.

use credpass_core::error::{AttestationError, LedgerRejection};
use credpass_core::types::{Address, Hash256, RiskBand};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

/// The `mintOrUpdate(account, score, riskBand)` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct AttestationCall {
    pub account: Address,
    pub score: u32,
    pub risk_band: RiskBand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct UnsignedAttestation {
    /// Ed25519 public key of the signer.
    pub signer: [u8; 32],
    pub nonce: u64,
    pub call: AttestationCall,
}

impl UnsignedAttestation {
    pub fn encode(&self) -> Result<Vec<u8>, AttestationError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| AttestationError::Encoding(e.to_string()))
    }

    pub fn tx_hash(&self) -> Result<Hash256, AttestationError> {
        Ok(Hash256(*blake3::hash(&self.encode()?).as_bytes()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct SignedAttestation {
    pub unsigned: UnsignedAttestation,
    pub signature: [u8; 64],
}

impl SignedAttestation {
    pub fn tx_hash(&self) -> Result<Hash256, AttestationError> {
        self.unsigned.tx_hash()
    }

    pub fn signer_address(&self) -> Address {
        signer_address(&self.unsigned.signer)
    }

    /// Check the signature against the embedded public key.
    pub fn verify(&self) -> Result<Hash256, LedgerRejection> {
        let hash = self.tx_hash().map_err(|_| LedgerRejection::InvalidSignature)?;
        let key = VerifyingKey::from_bytes(&self.unsigned.signer).map_err(|_| LedgerRejection::InvalidSignature)?;
        key.verify(hash.as_bytes(), &Signature::from_bytes(&self.signature))
            .map_err(|_| LedgerRejection::InvalidSignature)?;
        Ok(hash)
    }

    /// Hex of the bincode encoding, as sent over JSON-RPC.
    pub fn to_hex(&self) -> Result<String, AttestationError> {
        let bytes = bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| AttestationError::Encoding(e.to_string()))?;
        Ok(hex::encode(bytes))
    }

    pub fn from_hex(s: &str) -> Result<Self, String> {
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(|e| format!("invalid hex: {e}"))?;
        let (tx, read) = bincode::decode_from_slice::<Self, _>(&bytes, bincode::config::standard())
            .map_err(|e| format!("invalid attestation: {e}"))?;
        if read != bytes.len() {
            return Err(format!("{} trailing bytes", bytes.len() - read));
        }
        Ok(tx)
    }
}

/// Ledger identity of an Ed25519 public key.
pub fn signer_address(public_key: &[u8; 32]) -> Address {
    let h = blake3::hash(public_key);
    let mut a = [0u8; 20];
    a.copy_from_slice(&h.as_bytes()[12..]);
    Address(a)
}
