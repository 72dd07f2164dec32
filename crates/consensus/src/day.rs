//! The day-advancement protocol.
//!
//! Runs in parallel with the epoch pipeline. Each validator computes the
//! day's proof on the blocking pool, announces it with its completion
//! observation, and signs the canonical digest of `(day, output)` with
//! its threshold share. Because the VDF is deterministic, honest
//! validators sign the same digest; `2f + 1` shares assemble the quorum
//! certificate and the day finalizes. A signed share for any other
//! output is Byzantine by construction and becomes evidence; the day is
//! then retried with difficulty unchanged.

use crate::evidence::{EvidenceDetail, EvidenceRecord};
use crate::messages::{ConsensusMessage, DayProofAnnounce, DayShare, PeerEnvelope};
use crate::share_set::{ShareSet, ShareSetError};
use conductor_crypto::threshold::{sign_share, SecretShare};
use conductor_crypto::{BlsPublicKey, Hash};
use conductor_types::proof::canonical_day_digest;
use conductor_types::{CanonicalDayProof, DayNumber, DayProof, ValidatorId, ValidatorSet};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What a handler wants done.
#[derive(Debug)]
pub enum DayEffect {
    /// Broadcast a message to all validators.
    Broadcast(ConsensusMessage),
    /// The day finalized; persist and advance.
    Canonical(CanonicalDayProof),
    /// Byzantine behavior observed.
    Evidence(EvidenceRecord),
    /// Divergent signed outputs exist; re-announce and keep collecting.
    Retry,
}

/// State for advancing to one day.
#[derive(Debug)]
pub struct DayAdvancement {
    day: DayNumber,
    me: ValidatorId,
    set: Arc<ValidatorSet>,
    group_public: BlsPublicKey,
    share_publics: Vec<BlsPublicKey>,
    secret_share: SecretShare,

    local_output: Option<Hash>,
    local_proof: Option<DayProof>,
    /// Signature-verified peer proofs by proposer.
    proofs: HashMap<ValidatorId, DayProof>,
    /// Share collection per candidate output.
    shares: HashMap<Hash, ShareSet>,
    /// Completion observations (validator, duration) for the difficulty
    /// policy; memory-resident only.
    completions: Vec<(ValidatorId, Duration)>,

    canonical: Option<CanonicalDayProof>,
    divergence_flagged: bool,
}

impl DayAdvancement {
    /// Create the advancement state for `day`.
    pub fn new(
        day: DayNumber,
        me: ValidatorId,
        set: Arc<ValidatorSet>,
        group_public: BlsPublicKey,
        share_publics: Vec<BlsPublicKey>,
        secret_share: SecretShare,
    ) -> Self {
        Self {
            day,
            me,
            set,
            group_public,
            share_publics,
            secret_share,
            local_output: None,
            local_proof: None,
            proofs: HashMap::new(),
            shares: HashMap::new(),
            completions: Vec::new(),
            canonical: None,
            divergence_flagged: false,
        }
    }

    /// The day being advanced to.
    pub fn day(&self) -> DayNumber {
        self.day
    }

    /// The finalized proof, once the quorum certificate formed.
    pub fn canonical(&self) -> Option<&CanonicalDayProof> {
        self.canonical.as_ref()
    }

    /// Completion observations collected so far.
    pub fn completions(&self) -> &[(ValidatorId, Duration)] {
        &self.completions
    }

    /// Our proof finished computing: announce it and contribute our
    /// share over the canonical digest.
    pub fn on_local_proof(&mut self, proof: DayProof, completion: Duration) -> Vec<DayEffect> {
        let mut effects = Vec::new();
        if proof.day_number != self.day {
            return effects;
        }

        info!(day = self.day, "local day proof complete");
        self.local_output = Some(proof.output);
        self.local_proof = Some(proof.clone());
        self.completions.push((self.me, completion));

        let completion_millis = completion.as_millis() as u64;
        effects.push(DayEffect::Broadcast(ConsensusMessage::DayProofAnnounce(
            DayProofAnnounce {
                proof: proof.clone(),
                completion_millis,
            },
        )));

        let share_msg = self.local_share(&proof.output);
        effects.extend(self.record_share(&share_msg, None));
        effects.push(DayEffect::Broadcast(ConsensusMessage::DayShare(share_msg)));
        effects
    }

    /// A peer announced its proof.
    ///
    /// `vdf_verified` is the caller's verdict: the chain was re-run, or
    /// the output matched an existing canonical proof. Verification is
    /// expensive and lives on the blocking pool, outside this state
    /// machine.
    pub fn on_peer_announce(
        &mut self,
        msg: &DayProofAnnounce,
        envelope: &PeerEnvelope,
        vdf_verified: bool,
    ) -> Vec<DayEffect> {
        let mut effects = Vec::new();
        let proof = &msg.proof;
        if proof.day_number != self.day {
            return effects;
        }

        let Some(proposer_key) = self.set.public_key_of(&proof.proposer) else {
            warn!(day = self.day, proposer = %proof.proposer, "day proof from unknown proposer");
            return effects;
        };

        if !proof.verify_signature(proposer_key) || proof.proposer != envelope.sender {
            warn!(day = self.day, proposer = %proof.proposer, "day proof signature invalid");
            effects.push(DayEffect::Evidence(EvidenceRecord::new(
                envelope.sender,
                self.me,
                self.day,
                EvidenceDetail::SignatureInvalid {
                    envelope: envelope.canonical_bytes(),
                },
            )));
            return effects;
        }

        if !vdf_verified {
            warn!(day = self.day, proposer = %proof.proposer, "day proof fails VDF verification");
            effects.push(DayEffect::Evidence(EvidenceRecord::new(
                proof.proposer,
                self.me,
                self.day,
                EvidenceDetail::VdfInvalid {
                    proof: proof.clone(),
                },
            )));
            return effects;
        }

        self.proofs.insert(proof.proposer, proof.clone());
        self.completions.push((
            proof.proposer,
            Duration::from_millis(msg.completion_millis),
        ));

        self.flag_divergence(&proof.output, proof, &mut effects);
        effects
    }

    /// A peer contributed a share over a canonical digest.
    pub fn on_peer_share(&mut self, msg: &DayShare, envelope: &PeerEnvelope) -> Vec<DayEffect> {
        if msg.day != self.day || self.canonical.is_some() {
            return Vec::new();
        }
        let mut effects = Vec::new();

        // A share for an output other than the deterministic one is
        // itself Byzantine; note it before recording.
        if let Some(local) = self.local_output {
            if msg.output != local {
                let accused = self
                    .set
                    .by_index(msg.share_index.saturating_sub(1))
                    .map(|v| v.id)
                    .unwrap_or(envelope.sender);
                warn!(
                    day = self.day,
                    signer = %accused,
                    "share for divergent day output"
                );
                let detail = match self.proofs.get(&accused) {
                    Some(proof) if proof.output == msg.output => EvidenceDetail::VdfInvalid {
                        proof: proof.clone(),
                    },
                    _ => EvidenceDetail::SignatureInvalid {
                        envelope: envelope.canonical_bytes(),
                    },
                };
                effects.push(DayEffect::Evidence(EvidenceRecord::new(
                    accused, self.me, self.day, detail,
                )));
                if !self.divergence_flagged {
                    self.divergence_flagged = true;
                    effects.push(DayEffect::Retry);
                }
                return effects;
            }
        }

        effects.extend(self.record_share(msg, Some(envelope)));
        effects
    }

    /// Re-announce after a retry nudge (same proof, difficulty
    /// unchanged).
    pub fn reannounce(&self) -> Vec<DayEffect> {
        let mut effects = Vec::new();
        if let Some(proof) = &self.local_proof {
            effects.push(DayEffect::Broadcast(ConsensusMessage::DayProofAnnounce(
                DayProofAnnounce {
                    proof: proof.clone(),
                    completion_millis: 0,
                },
            )));
            effects.push(DayEffect::Broadcast(ConsensusMessage::DayShare(
                self.local_share(&proof.output),
            )));
        }
        effects
    }

    fn local_share(&self, output: &Hash) -> DayShare {
        let digest = canonical_day_digest(self.day, output);
        let share = sign_share(&self.secret_share, &digest);
        DayShare {
            day: self.day,
            output: *output,
            share_index: share.index,
            share: share.signature.to_bytes(),
        }
    }

    fn record_share(&mut self, msg: &DayShare, envelope: Option<&PeerEnvelope>) -> Vec<DayEffect> {
        let mut effects = Vec::new();
        let digest = canonical_day_digest(self.day, &msg.output);
        let threshold = self.set.quorum_threshold();
        let set_size = self.set.len();

        let share_set = self
            .shares
            .entry(msg.output)
            .or_insert_with(|| ShareSet::new(digest, threshold, set_size));

        match share_set.add_share(msg.share_index, &msg.share, &self.share_publics) {
            Ok(Some(qc)) => {
                // Attach the certificate to a matching proof; ours wins
                // ties so the persisted record is locally reproducible.
                let proof = self
                    .local_proof
                    .as_ref()
                    .filter(|p| p.output == msg.output)
                    .cloned()
                    .or_else(|| {
                        self.proofs
                            .values()
                            .find(|p| p.output == msg.output)
                            .cloned()
                    });

                if let Some(day_proof) = proof {
                    let canonical = CanonicalDayProof {
                        day_proof,
                        quorum_certificate: qc,
                    };
                    debug_assert!(canonical.verify(&self.group_public, threshold));
                    info!(day = self.day, signers = canonical.quorum_certificate.signer_count(), "day finalized");
                    self.canonical = Some(canonical.clone());
                    effects.push(DayEffect::Canonical(canonical));
                }
            }
            Ok(None) => {}
            Err(ShareSetError::DuplicateShare(_)) => {}
            Err(e) => {
                debug!(day = self.day, error = %e, "day share rejected");
                if let Some(envelope) = envelope {
                    effects.push(DayEffect::Evidence(EvidenceRecord::new(
                        envelope.sender,
                        self.me,
                        self.day,
                        EvidenceDetail::SignatureInvalid {
                            envelope: envelope.canonical_bytes(),
                        },
                    )));
                }
            }
        }
        effects
    }

    /// Divergent verified outputs cannot happen for a deterministic VDF;
    /// seeing one means someone is signing garbage.
    fn flag_divergence(&mut self, output: &Hash, proof: &DayProof, effects: &mut Vec<DayEffect>) {
        let Some(local) = self.local_output else {
            return;
        };
        if *output == local || self.divergence_flagged {
            return;
        }
        self.divergence_flagged = true;
        warn!(day = self.day, proposer = %proof.proposer, "divergent day output observed");
        effects.push(DayEffect::Evidence(EvidenceRecord::new(
            proof.proposer,
            self.me,
            self.day,
            EvidenceDetail::VdfInvalid {
                proof: proof.clone(),
            },
        )));
        effects.push(DayEffect::Retry);
    }
}
