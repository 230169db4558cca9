//! Attestations: signed, cumulatively countersigned lifecycle statements
//!
//! ```text
//! Attestation = [Content, Signatures]
//! Content     = [transaction (JSON bytes), state (1 byte), session id, transaction id]
//! Signatures  = [[signature, identity], ...]
//! ```
//!
//! Signature `i` covers the keccak-256 hash of `rlp([Content, Signatures[0..i]])`,
//! i.e. every earlier signature and never itself. Changing or reordering any
//! signature therefore invalidates every signature after it.

mod content;
mod signature;

pub use content::{Content, CONTENT_FIELDS};
pub use signature::{content_hash, recover_signer, SignatureEntry, SIGNATURE_LENGTH};

use crate::codec::{self, RlpItem};
use crate::error::{VesError, VesResult};

use ethers::signers::Signer;
use ethers::types::H256;
use tracing::{debug, warn};

/// Content plus its signature chain
#[derive(Debug, Clone, PartialEq)]
pub struct Attestation {
    content: Content,
    /// Content exactly as it is hashed and transmitted
    encoded_content: RlpItem,
    signatures: Vec<SignatureEntry>,
}

impl Attestation {
    /// Content with an empty signature chain, only ever signed before leaving
    fn unsigned(content: Content) -> VesResult<Self> {
        let encoded_content = content.encode()?;
        Ok(Self {
            content,
            encoded_content,
            signatures: Vec::new(),
        })
    }

    /// Hash of `[Content, []]`, the payload of the first signature
    pub fn initial_digest(content: &Content) -> VesResult<H256> {
        Ok(Self::unsigned(content.clone())?.hash())
    }

    /// Wrap content with a first signature produced elsewhere over
    /// [`Attestation::initial_digest`]
    pub fn from_signature(content: Content, first: SignatureEntry) -> VesResult<Self> {
        let mut atte = Self::unsigned(content)?;
        atte.signatures.push(first);
        Ok(atte)
    }

    /// Create and sign fresh content
    pub async fn create<S: Signer>(content: Content, signer: &S) -> VesResult<Self> {
        let mut atte = Self::unsigned(content)?;
        atte.sign_with(signer).await?;
        Ok(atte)
    }

    /// Parse wire bytes.
    ///
    /// Steps run in a fixed order: the top-level and content shapes are
    /// checked, the signature pairs are recovered while the content is still
    /// an undecoded item (per-slot digests are taken over those exact bytes),
    /// and only then are the content fields decoded. Signatures are not
    /// verified here; call [`Attestation::verify`].
    pub fn decode(bytes: &[u8]) -> VesResult<Self> {
        let item = codec::decode(bytes)?;
        let parts = item.expect_list(2, "attestation [Content, Signature]")?;
        let encoded_content = parts[0].clone();
        encoded_content.expect_list(CONTENT_FIELDS, "content [T, State, Sid, Tid]")?;

        // recover signatures first, against the undecoded content
        let raw_signatures = parts[1]
            .as_list()
            .ok_or_else(|| VesError::DecodeFail("signatures must be a list".to_string()))?;
        if raw_signatures.is_empty() {
            return Err(VesError::DecodeFail(
                "attestation carries no signatures".to_string(),
            ));
        }
        let signatures = raw_signatures
            .iter()
            .map(SignatureEntry::decode)
            .collect::<VesResult<Vec<_>>>()?;

        // then decode the content fields
        let content = Content::decode(&encoded_content)?;

        debug!(
            "Decoded attestation for session {} tx {} ({}) with {} signatures",
            content.session_id,
            content.transaction_id,
            content.state,
            signatures.len()
        );

        Ok(Self {
            content,
            encoded_content,
            signatures,
        })
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn signatures(&self) -> &[SignatureEntry] {
        &self.signatures
    }

    /// `rlp([Content, Signatures[0..count]])`
    fn encode_prefix(&self, count: usize) -> Vec<u8> {
        let signatures = self.signatures[..count]
            .iter()
            .map(|entry| entry.encoded().clone())
            .collect();
        codec::encode(&RlpItem::list(vec![
            self.encoded_content.clone(),
            RlpItem::list(signatures),
        ]))
    }

    /// Digest signature `index` is expected to cover
    pub fn digest_for(&self, index: usize) -> H256 {
        content_hash(&self.encode_prefix(index))
    }

    /// Full wire encoding
    pub fn encode(&self) -> Vec<u8> {
        self.encode_prefix(self.signatures.len())
    }

    /// keccak-256 of the full current encoding; the next signer signs this
    pub fn hash(&self) -> H256 {
        content_hash(&self.encode())
    }

    /// Digest covered by the latest signature
    pub fn prior_hash(&self) -> H256 {
        self.digest_for(self.signatures.len().saturating_sub(1))
    }

    /// Append one signature computed over [`Attestation::hash`] as it was
    /// before this call, and return the new encoding
    pub fn sign_and_encode(&mut self, entry: SignatureEntry) -> Vec<u8> {
        self.signatures.push(entry);
        self.encode()
    }

    /// Hash, sign with `signer`, append
    pub async fn sign_with<S: Signer>(&mut self, signer: &S) -> VesResult<Vec<u8>> {
        let digest = self.hash();
        let signature = signer
            .sign_message(digest.as_bytes())
            .await
            .map_err(|e| VesError::Signing(e.to_string()))?;
        Ok(self.sign_and_encode(SignatureEntry::new(signature, signer.address())))
    }

    /// Verify a single slot of the chain
    pub fn verify_signature(&self, index: usize) -> VesResult<()> {
        let entry = self.signatures.get(index).ok_or_else(|| {
            VesError::Internal(format!("no signature at slot {}", index))
        })?;
        entry.verify(index, self.digest_for(index))
    }

    /// Verify every signature in order
    pub fn verify(&self) -> VesResult<()> {
        if self.signatures.is_empty() {
            return Err(VesError::DecodeFail(
                "attestation carries no signatures".to_string(),
            ));
        }
        for index in 0..self.signatures.len() {
            if let Err(e) = self.verify_signature(index) {
                warn!(
                    "Attestation for session {} tx {} failed verification: {}",
                    self.content.session_id, self.content.transaction_id, e
                );
                crate::metrics::record_verification_failure();
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateType;
    use ethers::signers::LocalWallet;
    use ethers::types::Address;
    use serde_json::json;

    fn party_x() -> LocalWallet {
        "1234567812345678123456781234567812345678123456781234567812345678"
            .parse()
            .unwrap()
    }

    fn party_y() -> LocalWallet {
        "2345678923456789234567892345678923456789234567892345678923456789"
            .parse()
            .unwrap()
    }

    fn content() -> Content {
        Content::new(
            json!({"from": "0x12345678", "to": "0x87654321", "data": "..."}),
            StateType::Inited,
            2,
            3,
        )
    }

    async fn chain_of(len: usize) -> Attestation {
        let (x, y) = (party_x(), party_y());
        let mut atte = Attestation::create(content(), &x).await.unwrap();
        for i in 1..len {
            let signer = if i % 2 == 1 { &y } else { &x };
            atte.sign_with(signer).await.unwrap();
        }
        atte
    }

    #[tokio::test]
    async fn test_round_trip() {
        let atte = chain_of(3).await;
        let decoded = Attestation::decode(&atte.encode()).unwrap();
        assert_eq!(decoded, atte);
        assert_eq!(decoded.content(), &content());
        assert_eq!(decoded.signatures().len(), 3);
        assert_eq!(decoded.encode(), atte.encode());
    }

    #[tokio::test]
    async fn test_chain_verifies_after_each_append() {
        let (x, y) = (party_x(), party_y());
        let mut atte = Attestation::create(content(), &x).await.unwrap();
        atte.verify().unwrap();
        for signer in [&y, &x, &y] {
            let bytes = atte.sign_with(signer).await.unwrap();
            Attestation::decode(&bytes).unwrap().verify().unwrap();
        }
        assert_eq!(atte.signatures().len(), 4);
    }

    #[tokio::test]
    async fn test_first_signature_covers_empty_list() {
        let x = party_x();
        let digest = Attestation::initial_digest(&content()).unwrap();
        let signature = x.sign_message(digest.as_bytes()).await.unwrap();
        let atte =
            Attestation::from_signature(content(), SignatureEntry::new(signature, x.address()))
                .unwrap();
        atte.verify().unwrap();
        assert_eq!(atte.prior_hash(), digest);
        assert_eq!(atte, Attestation::create(content(), &x).await.unwrap());
    }

    #[tokio::test]
    async fn test_new_signature_signs_previous_hash() {
        let mut atte = chain_of(1).await;
        let before = atte.hash();
        atte.sign_with(&party_y()).await.unwrap();
        assert_eq!(atte.prior_hash(), before);
        assert_eq!(atte.digest_for(1), before);
    }

    #[tokio::test]
    async fn test_tampered_signature_breaks_suffix() {
        let atte = chain_of(4).await;
        let mut bytes = atte.encode();
        // flip one byte of signature 1's `r` inside the wire encoding
        let sig = atte.signatures()[1].signature.to_vec();
        let pos = bytes
            .windows(sig.len())
            .position(|w| w == sig.as_slice())
            .unwrap();
        bytes[pos + 5] ^= 0x01;

        let tampered = Attestation::decode(&bytes).unwrap();
        assert!(tampered.verify_signature(0).is_ok());
        for index in 1..4 {
            assert!(
                tampered.verify_signature(index).is_err(),
                "signature {} should fail",
                index
            );
        }
        assert!(tampered.verify().is_err());
    }

    #[tokio::test]
    async fn test_reordered_signatures_fail() {
        let atte = chain_of(3).await;
        let mut swapped = atte.clone();
        swapped.signatures.swap(1, 2);
        assert!(swapped.verify_signature(0).is_ok());
        assert!(swapped.verify_signature(1).is_err());
        assert!(swapped.verify_signature(2).is_err());
    }

    #[tokio::test]
    async fn test_slot_signed_over_wrong_prefix() {
        let (x, y) = (party_x(), party_y());
        let mut atte = Attestation::create(content(), &x).await.unwrap();
        // y signs the content alone instead of [Content, Signatures[0..0]]
        let wrong = Attestation::initial_digest(&content()).unwrap();
        let signature = y.sign_message(wrong.as_bytes()).await.unwrap();
        atte.sign_and_encode(SignatureEntry::new(signature, y.address()));

        let decoded = Attestation::decode(&atte.encode()).unwrap();
        assert!(decoded.verify_signature(0).is_ok());
        assert!(matches!(
            decoded.verify(),
            Err(VesError::Verification { index: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_claimed_identity_mismatch() {
        let x = party_x();
        let digest = Attestation::initial_digest(&content()).unwrap();
        let signature = x.sign_message(digest.as_bytes()).await.unwrap();
        let atte = Attestation::from_signature(
            content(),
            SignatureEntry::new(signature, Address::repeat_byte(0x11)),
        )
        .unwrap();
        assert!(matches!(
            atte.verify(),
            Err(VesError::Verification { index: 0, .. })
        ));
    }

    #[test]
    fn test_three_element_top_level_rejected() {
        let content = content().encode().unwrap();
        let item = RlpItem::list(vec![content, RlpItem::list(Vec::new()), RlpItem::bytes(vec![1])]);
        assert!(matches!(
            Attestation::decode(&codec::encode(&item)),
            Err(VesError::DecodeFail(_))
        ));
    }

    #[tokio::test]
    async fn test_three_field_content_rejected() {
        let atte = chain_of(1).await;
        let fields = atte.encoded_content.as_list().unwrap()[..3].to_vec();
        let item = RlpItem::list(vec![
            RlpItem::list(fields),
            RlpItem::list(vec![atte.signatures()[0].encoded().clone()]),
        ]);
        assert!(matches!(
            Attestation::decode(&codec::encode(&item)),
            Err(VesError::DecodeFail(_))
        ));
    }

    #[test]
    fn test_empty_signature_list_rejected() {
        let item = RlpItem::list(vec![content().encode().unwrap(), RlpItem::list(Vec::new())]);
        assert!(matches!(
            Attestation::decode(&codec::encode(&item)),
            Err(VesError::DecodeFail(_))
        ));
    }

    #[tokio::test]
    async fn test_new_state_restarts_chain() {
        let x = party_x();
        let inited = chain_of(2).await;
        let open = Attestation::create(inited.content().with_state(StateType::Open), &x)
            .await
            .unwrap();
        assert_eq!(open.signatures().len(), 1);
        assert_ne!(open.hash(), inited.hash());
        assert_eq!(open.content().transaction, inited.content().transaction);
    }
}
