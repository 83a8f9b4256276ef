#![deny(missing_docs)]

//! # clrfund_ops
//!
//! Drives one MACI quadratic-funding round through its off-chain lifecycle:
//!
//! * **Round directory**: the [`directory`] module lists statically configured
//!   off-chain rounds followed by the rounds the factory registered on-chain,
//!   with continuous ordinals and partial results when the chain is down.
//! * **Contributions**: [`commands::contribute`] approves the round and signs
//!   each participant up to MACI, one participant at a time, recording every
//!   successful registration in the [`session`] file.
//! * **Votes**: [`vote`] builds a key change at nonce 1 followed by one vote
//!   per recipient under the new key; [`commands::vote`] reverses the batch
//!   and submits it as one transaction per participant.
//!
//! Chain access goes through the [`contract`] traits. With the default `net`
//! feature, [`net`] implements them over Ethereum JSON-RPC.
//!
//! ```rust
//! use clrfund_ops::vote::even_allocations;
//!
//! let allocations = even_allocations(1000, &[1, 2, 3, 4, 5, 6, 7]);
//! assert!(allocations.iter().all(|a| a.credits == 142));
//! ```
//!
//! Message encryption is a [`cipher::MessageCipher`] seam. The bundled
//! [`cipher::DevnetCipher`] is meant for local chains only; its ciphertexts
//! are not accepted by the MACI circuits.

pub mod address;
pub mod cipher;
pub mod commands;
pub mod contract;
pub mod directory;
pub mod error;
pub mod keys;
#[cfg(feature = "net")]
pub mod net;
pub mod session;
pub mod vote;

pub use address::Address;
pub use cipher::{Command, DevnetCipher, EncryptedMessage, MessageCipher};
pub use commands::contribute::{
    run_contributions, ContributeOptions, ContributionFailure, ContributionSummary,
    DEFAULT_CONTRIBUTION,
};
pub use commands::vote::{
    run_votes, submit_vote_batch, VoteFailure, VoteOptions, VoteSuccess, VoteSummary,
};
pub use contract::{Credential, RoundContract, RoundRegistry, SignUpEvent, TxReceipt};
pub use directory::{list_rounds, resolve_current_round, OffchainRounds, RoundListing, RoundReference};
pub use error::{ChainError, ClientError};
pub use keys::{Keypair, PrivKey, PubKey};
pub use session::{ParticipantRecord, RoundSession, SessionStore};
pub use vote::{
    build_vote_messages, even_allocations, submission_order, MessageKind, VoteAllocation,
    VoteBatch, VoteMessage,
};
