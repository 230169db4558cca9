//! Signature entries and the hashing/recovery primitives they rely on

use crate::codec::RlpItem;
use crate::error::{VesError, VesResult};

use ethers::types::{Address, Signature, H256};
use ethers::utils::to_checksum;
use sha3::{Digest, Keccak256};
use std::str::FromStr;

/// Length of a raw `r || s || v` signature
pub const SIGNATURE_LENGTH: usize = 65;

/// keccak-256 of arbitrary bytes
pub fn content_hash(data: &[u8]) -> H256 {
    H256::from_slice(&Keccak256::digest(data))
}

/// Recover the identity that produced `signature` over `digest`.
///
/// Signatures use the Ethereum personal-message scheme over the 32 digest
/// bytes, matching what `Signer::sign_message` produces.
pub fn recover_signer(signature: &Signature, digest: H256) -> VesResult<Address> {
    signature
        .recover(digest.as_bytes().to_vec())
        .map_err(|e| VesError::Signing(format!("signature recovery failed: {}", e)))
}

/// One `(signature, identity)` slot of a signature chain.
///
/// The wire form received is kept so re-encoding a prefix reproduces
/// exactly the bytes the next signer hashed.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureEntry {
    pub signature: Signature,
    pub signer: Address,
    encoded: RlpItem,
}

impl SignatureEntry {
    pub fn new(signature: Signature, signer: Address) -> Self {
        let encoded = RlpItem::list(vec![
            RlpItem::bytes(signature.to_vec()),
            RlpItem::bytes(to_checksum(&signer, None).into_bytes()),
        ]);
        Self {
            signature,
            signer,
            encoded,
        }
    }

    /// Parse a `[signature, identity]` pair.
    ///
    /// Signatures longer than 65 bytes are taken as hex text.
    pub fn decode(item: &RlpItem) -> VesResult<Self> {
        let pair = item.expect_list(2, "signature pair [signature, identity]")?;
        let raw_sig = pair[0].expect_bytes("signature")?;
        let raw_signer = pair[1].expect_bytes("identity")?;

        let signature = if raw_sig.len() > SIGNATURE_LENGTH {
            let text = std::str::from_utf8(raw_sig).map_err(|e| {
                VesError::DecodeFail(format!("failed when recovering signatures, {}", e))
            })?;
            Signature::from_str(text).map_err(|e| {
                VesError::DecodeFail(format!("failed when recovering signatures, {}", e))
            })?
        } else {
            Signature::try_from(raw_sig).map_err(|e| {
                VesError::DecodeFail(format!("failed when recovering signatures, {}", e))
            })?
        };

        let signer = std::str::from_utf8(raw_signer)
            .map_err(|e| e.to_string())
            .and_then(|text| Address::from_str(text).map_err(|e| e.to_string()))
            .map_err(|e| {
                VesError::DecodeFail(format!("failed when recovering signatures, {}", e))
            })?;

        Ok(Self {
            signature,
            signer,
            encoded: item.clone(),
        })
    }

    pub fn encoded(&self) -> &RlpItem {
        &self.encoded
    }

    /// Check this slot against the digest of everything before it
    pub fn verify(&self, index: usize, digest: H256) -> VesResult<()> {
        let recovered = recover_signer(&self.signature, digest)?;
        if recovered != self.signer {
            return Err(VesError::Verification {
                index,
                claimed: to_checksum(&self.signer, None),
                recovered: to_checksum(&recovered, None),
            });
        }
        Ok(())
    }
}
