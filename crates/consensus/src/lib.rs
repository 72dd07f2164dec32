//! # Conductor Consensus
//!
//! The asynchronous Byzantine-fault-tolerant core of a Conductor
//! validator: leaderless agreement over federation event batches and the
//! VDF-backed day counter, tolerating `f < n/3` Byzantine peers without
//! timing assumptions for safety.
//!
//! ## Epoch pipeline
//!
//! ```text
//! submitted fingerprints
//!         │
//!         ▼
//! ┌───────────────┐   n instances, one per proposer
//! │      RBC      │   erasure-coded fragments bound by Merkle proofs;
//! │               │   Echo at valid Propose, Ready at 2f+1 Echos,
//! │               │   deliver at 2f+1 Readys + k fragments
//! └───────┬───────┘
//!         ▼
//! ┌───────────────┐   one per RBC instance
//! │      BBA      │   BVAL/AUX bin-values rounds; the threshold common
//! │               │   coin breaks symmetry
//! └───────┬───────┘
//!         ▼
//! ┌───────────────┐   deliveries feed 1s; after n-f acceptances the
//! │      ACS      │   rest are fed 0; subset = indices that decided 1
//! └───────┬───────┘
//!         ▼
//! ┌───────────────┐   sort_unique(union of accepted batches),
//! │    COMMIT     │   threshold shares over the block digest, QC,
//! │               │   write-once persistence in epoch order
//! └───────────────┘
//! ```
//!
//! In parallel, the day-advancement protocol collects verified day
//! proofs and finalizes the day once `2f + 1` validators sign the same
//! output; detection turns protocol violations into self-contained
//! evidence feeding blacklist ballots.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod acs;
pub mod bba;
pub mod blacklist;
pub mod coin;
pub mod day;
pub mod detection;
pub mod evidence;
pub mod merkle;
pub mod messages;
pub mod orchestrator;
pub mod rbc;
pub mod seen_cache;
pub mod share_set;

pub use acs::{AcsEffect, AcsState};
pub use bba::{BbaEffect, BbaInstance};
pub use blacklist::{
    BallotError, BallotExecution, BallotStore, BallotTracker, BlacklistView,
    MIN_EFFECTIVE_LEAD_DAYS,
};
pub use coin::CommonCoin;
pub use day::{DayAdvancement, DayEffect};
pub use detection::validate_evidence;
pub use evidence::{EvidenceDetail, EvidencePool, EvidenceRecord, EVIDENCE_MAX_AGE_DAYS};
pub use merkle::{verify_fragment, FragmentTree, MerkleProof};
pub use messages::{
    coin_preimage, sort_unique, ConsensusMessage, Fragment, PeerEnvelope,
};
pub use orchestrator::{
    EpochOrchestrator, KeyContext, Outbound, Phase, MAX_INFLIGHT_EPOCHS,
};
pub use rbc::{encode_payload, RbcConfig, RbcEffect, RbcError, RbcInstance};
pub use seen_cache::{SeenCacheConfig, SeenMessageCache, SeenResult};
pub use share_set::{ShareSet, ShareSetError};

use conductor_types::{Epoch, ValidatorId};

/// Errors surfaced by the consensus core.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    /// The epoch did not finalize within its soft timeout.
    #[error("epoch {epoch} timed out")]
    Timeout {
        /// The epoch that timed out.
        epoch: Epoch,
    },

    /// Fewer than `2f + 1` participants reachable.
    #[error("insufficient quorum")]
    InsufficientQuorum,

    /// Divergent VDF outputs signed for the same day.
    #[error("conflicting day proofs for day {day}")]
    ConflictingDayProof {
        /// The contested day.
        day: u64,
    },

    /// A message from outside the active set.
    #[error("unknown sender {0}")]
    UnknownSender(ValidatorId),

    /// The pipelining bound was hit.
    #[error("epoch {epoch} refused: too many epochs in flight")]
    TooManyInFlight {
        /// The refused epoch.
        epoch: Epoch,
    },

    /// Reliable-broadcast failure.
    #[error(transparent)]
    Rbc(#[from] rbc::RbcError),

    /// Share collection failure.
    #[error(transparent)]
    Shares(#[from] share_set::ShareSetError),

    /// Ballot handling failure.
    #[error(transparent)]
    Ballot(#[from] blacklist::BallotError),

    /// Storage failure.
    #[error(transparent)]
    Storage(#[from] conductor_storage::StorageError),

    /// Model-type failure.
    #[error(transparent)]
    Types(#[from] conductor_types::TypesError),

    /// Cryptographic failure.
    #[error(transparent)]
    Crypto(#[from] conductor_crypto::CryptoError),

    /// An internal channel closed.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, ConsensusError>;
