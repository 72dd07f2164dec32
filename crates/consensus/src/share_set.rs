//! Threshold-share collection and quorum-certificate assembly.
//!
//! A [`ShareSet`] collects signature shares over one fixed digest,
//! verifies each against its published share verification key, and
//! assembles the quorum certificate the moment the threshold is met.
//! Block commits, day finalization and ballots all use this path.

use conductor_crypto::threshold::{combine_signature_shares, SignatureShare};
use conductor_crypto::{BlsPublicKey, BlsSignature, Hash};
use conductor_types::QuorumCertificate;
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Errors raised while collecting shares.
#[derive(Debug, thiserror::Error)]
pub enum ShareSetError {
    /// The share index is zero or outside the active set.
    #[error("share index {0} out of range")]
    IndexOutOfRange(u32),

    /// The same index already contributed a share.
    #[error("duplicate share from index {0}")]
    DuplicateShare(u32),

    /// The partial signature failed verification.
    #[error("invalid share from index {0}")]
    InvalidShare(u32),

    /// Threshold combination failed.
    #[error(transparent)]
    Crypto(#[from] conductor_crypto::CryptoError),
}

/// Collects shares over one digest until a quorum certificate forms.
#[derive(Debug)]
pub struct ShareSet {
    digest: Hash,
    threshold: u32,
    set_size: usize,
    shares: BTreeMap<u32, SignatureShare>,
    certificate: Option<QuorumCertificate>,
}

impl ShareSet {
    /// Create a collector for `digest` with the given threshold over a
    /// set of `set_size` validators.
    pub fn new(digest: Hash, threshold: u32, set_size: usize) -> Self {
        Self {
            digest,
            threshold,
            set_size,
            shares: BTreeMap::new(),
            certificate: None,
        }
    }

    /// The digest being certified.
    pub fn digest(&self) -> &Hash {
        &self.digest
    }

    /// Number of distinct shares collected so far.
    pub fn share_count(&self) -> usize {
        self.shares.len()
    }

    /// The certificate, once assembled.
    pub fn certificate(&self) -> Option<&QuorumCertificate> {
        self.certificate.as_ref()
    }

    /// Add a share (1-based `share_index`, position `share_index - 1` in
    /// the active set).
    ///
    /// Returns `Ok(Some(qc))` when this share completes the quorum,
    /// `Ok(None)` when recorded without quorum, or an error for invalid,
    /// duplicate or out-of-range shares.
    pub fn add_share(
        &mut self,
        share_index: u32,
        share_bytes: &[u8; 96],
        share_publics: &[BlsPublicKey],
    ) -> Result<Option<QuorumCertificate>, ShareSetError> {
        if share_index == 0 || share_index as usize > self.set_size {
            return Err(ShareSetError::IndexOutOfRange(share_index));
        }
        if self.shares.contains_key(&share_index) {
            return Err(ShareSetError::DuplicateShare(share_index));
        }

        let signature = BlsSignature::from_bytes(share_bytes)
            .map_err(|_| ShareSetError::InvalidShare(share_index))?;

        let share_public = share_publics
            .get(share_index as usize - 1)
            .ok_or(ShareSetError::IndexOutOfRange(share_index))?;
        if !signature.verify(&self.digest, share_public) {
            return Err(ShareSetError::InvalidShare(share_index));
        }

        trace!(
            digest = hex::encode(&self.digest[..8]),
            share_index,
            collected = self.shares.len() + 1,
            threshold = self.threshold,
            "share recorded"
        );

        self.shares.insert(
            share_index,
            SignatureShare {
                index: share_index,
                signature,
            },
        );

        if self.certificate.is_some() || (self.shares.len() as u32) < self.threshold {
            return Ok(None);
        }

        let collected: Vec<SignatureShare> = self.shares.values().cloned().collect();
        let group_signature = combine_signature_shares(self.threshold, &collected)?;

        let indices: Vec<u32> = self.shares.keys().map(|i| i - 1).collect();
        let bitmap = QuorumCertificate::bitmap_from_indices(&indices, self.set_size);
        let certificate =
            QuorumCertificate::new(self.digest, group_signature.to_bytes(), bitmap);

        debug!(
            digest = hex::encode(&self.digest[..8]),
            signers = certificate.signer_count(),
            "quorum certificate assembled"
        );

        self.certificate = Some(certificate.clone());
        Ok(Some(certificate))
    }
}
