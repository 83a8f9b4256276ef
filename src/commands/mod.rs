//! Operator-facing batch runs over a set of participant credentials.

/// Token approval and MACI sign-up for each participant.
pub mod contribute;
/// Vote batch construction and submission for each participant.
pub mod vote;
