//! Vote message construction.
//!
//! A participant's batch is a key change at nonce 1 followed by one vote per
//! allocation at nonces 2..=N. The batch is produced oldest to newest; the
//! round contract processes messages newest first, so [`submission_order`]
//! must be applied before the batch is sent.

use crate::cipher::{Command, EncryptedMessage, MessageCipher};
use crate::error::ClientError;
use crate::keys::{Keypair, PubKey};
use crate::session::ParticipantRecord;
use rand::{CryptoRng, RngCore};

/// Nonce of the first message in a batch.
pub const FIRST_NONCE: u64 = 1;

/// Credits assigned to one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteAllocation {
    /// Recipient (vote option) index; must be positive.
    pub recipient: u64,
    /// Credits to spend on the recipient.
    pub credits: u128,
}

/// What a message asks the coordinator to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Replace the participant's key with `new_public_key`.
    KeyChange {
        /// Key that signs and encrypts every later message.
        new_public_key: PubKey,
    },
    /// Allocate credits to a recipient.
    Vote(VoteAllocation),
}

/// A sealed message ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteMessage {
    /// Sender's state index.
    pub state_index: u64,
    /// Per-participant nonce.
    pub nonce: u64,
    /// Plaintext intent, kept for reporting.
    pub kind: MessageKind,
    /// Public key the message was encrypted under.
    pub encryption_key: PubKey,
    /// Ciphertext.
    pub message: EncryptedMessage,
}

/// Output of [`build_vote_messages`].
#[derive(Debug, Clone)]
pub struct VoteBatch {
    /// Key pair that replaces the participant's key once the batch is processed.
    pub replacement: Keypair,
    /// Messages, oldest first.
    pub messages: Vec<VoteMessage>,
}

/// Splits `voice_credits` evenly across `recipients` with floor division.
///
/// The remainder `voice_credits % recipients.len()` is left unspent.
pub fn even_allocations(voice_credits: u128, recipients: &[u64]) -> Vec<VoteAllocation> {
    if recipients.is_empty() {
        return Vec::new();
    }
    let share = voice_credits / recipients.len() as u128;
    recipients
        .iter()
        .map(|&recipient| VoteAllocation {
            recipient,
            credits: share,
        })
        .collect()
}

/// Rejects allocations with a zero recipient or a total above `balance`.
pub fn check_allocations(allocations: &[VoteAllocation], balance: u128) -> Result<(), ClientError> {
    if let Some(bad) = allocations.iter().find(|a| a.recipient == 0) {
        return Err(ClientError::InvalidAllocation(format!(
            "recipient index must be positive, got {}",
            bad.recipient
        )));
    }
    let requested = allocations
        .iter()
        .try_fold(0u128, |acc, a| acc.checked_add(a.credits))
        .ok_or(ClientError::AllocationExceedsBalance {
            requested: u128::MAX,
            balance,
        })?;
    if requested > balance {
        return Err(ClientError::AllocationExceedsBalance { requested, balance });
    }
    Ok(())
}

/// Builds the key change plus vote messages for one participant.
///
/// The key change is signed by the participant's current key and encrypted
/// under the replacement; every vote is signed and encrypted under the
/// replacement only.
pub fn build_vote_messages<C: MessageCipher, R: RngCore + CryptoRng>(
    record: &ParticipantRecord,
    coordinator: &PubKey,
    allocations: &[VoteAllocation],
    cipher: &C,
    rng: &mut R,
) -> Result<VoteBatch, ClientError> {
    check_allocations(allocations, record.voice_credits())?;

    let current = record.keypair();
    let replacement = Keypair::generate(rng);
    let state_index = record.state_index();
    let mut messages = Vec::with_capacity(allocations.len() + 1);
    let mut nonce = FIRST_NONCE;

    let key_change = Command {
        state_index,
        new_public_key: replacement.public,
        vote_option_index: 0,
        new_vote_weight: 0,
        nonce,
        salt: random_salt(rng),
    };
    messages.push(VoteMessage {
        state_index,
        nonce,
        kind: MessageKind::KeyChange {
            new_public_key: replacement.public,
        },
        encryption_key: replacement.public,
        message: cipher.seal(&key_change, &current, &replacement, coordinator)?,
    });

    for allocation in allocations {
        nonce += 1;
        let vote = Command {
            state_index,
            new_public_key: replacement.public,
            vote_option_index: allocation.recipient,
            new_vote_weight: allocation.credits,
            nonce,
            salt: random_salt(rng),
        };
        messages.push(VoteMessage {
            state_index,
            nonce,
            kind: MessageKind::Vote(*allocation),
            encryption_key: replacement.public,
            message: cipher.seal(&vote, &replacement, &replacement, coordinator)?,
        });
    }

    Ok(VoteBatch {
        replacement,
        messages,
    })
}

/// Reorders an oldest-first batch newest first, as the round contract expects.
pub fn submission_order(mut messages: Vec<VoteMessage>) -> Vec<VoteMessage> {
    messages.reverse();
    messages
}

fn random_salt<R: RngCore>(rng: &mut R) -> [u8; 32] {
    let mut salt = [0u8; 32];
    rng.fill_bytes(&mut salt);
    // Keep the salt below the BN254 scalar modulus.
    salt[0] &= 0x1f;
    salt
}

#[cfg(test)]
mod tests {
    use super::{
        build_vote_messages, check_allocations, even_allocations, submission_order, MessageKind,
        VoteAllocation,
    };
    use crate::address::Address;
    use crate::cipher::DevnetCipher;
    use crate::error::ClientError;
    use crate::keys::Keypair;
    use crate::session::ParticipantRecord;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn record(rng: &mut StdRng, credits: u128) -> ParticipantRecord {
        ParticipantRecord::new(Address([4; 20]), Keypair::generate(rng), 3, credits)
    }

    #[test]
    fn floor_division_leaves_remainder() {
        let recipients = [1, 2, 3, 4, 5, 6, 7];
        let allocations = even_allocations(1000, &recipients);
        assert_eq!(allocations.len(), 7);
        assert!(allocations.iter().all(|a| a.credits == 142));
        let total: u128 = allocations.iter().map(|a| a.credits).sum();
        assert_eq!(total, 994);
        assert_eq!(1000 - total, 6);
        assert_eq!(
            allocations.iter().map(|a| a.recipient).collect::<Vec<_>>(),
            recipients.to_vec()
        );
    }

    #[test]
    fn no_recipients_no_allocations() {
        assert!(even_allocations(1000, &[]).is_empty());
    }

    #[test]
    fn over_budget_is_rejected() {
        let allocations = [
            VoteAllocation { recipient: 1, credits: 600 },
            VoteAllocation { recipient: 2, credits: 401 },
        ];
        assert_eq!(
            check_allocations(&allocations, 1000),
            Err(ClientError::AllocationExceedsBalance {
                requested: 1001,
                balance: 1000
            })
        );
        let zero = [VoteAllocation { recipient: 0, credits: 1 }];
        assert!(matches!(
            check_allocations(&zero, 1000),
            Err(ClientError::InvalidAllocation(_))
        ));
    }

    #[test]
    fn key_change_first_then_votes_under_new_key() {
        let mut rng = StdRng::seed_from_u64(40);
        let coordinator = Keypair::generate(&mut rng);
        let participant = record(&mut rng, 1000);
        let original = participant.keypair();
        let allocations = even_allocations(1000, &[1, 2, 3]);

        let batch = build_vote_messages(
            &participant,
            &coordinator.public,
            &allocations,
            &DevnetCipher,
            &mut rng,
        )
        .unwrap();

        assert_eq!(batch.messages.len(), 4);
        assert_ne!(batch.replacement.public, original.public);
        let first = &batch.messages[0];
        assert_eq!(first.nonce, 1);
        assert_eq!(
            first.kind,
            MessageKind::KeyChange {
                new_public_key: batch.replacement.public
            }
        );

        for msg in &batch.messages {
            assert_eq!(msg.encryption_key, batch.replacement.public);
            assert_ne!(msg.encryption_key, original.public);
            let (cmd, sig) = DevnetCipher
                .open(&msg.message, &msg.encryption_key, &coordinator)
                .unwrap();
            assert_eq!(cmd.nonce, msg.nonce);
            assert_eq!(cmd.state_index, 3);
            assert_eq!(cmd.new_public_key, batch.replacement.public);
            let signer = if msg.nonce == 1 {
                original.public
            } else {
                batch.replacement.public
            };
            assert!(DevnetCipher.verify(&cmd, &sig, &signer));
        }
        for (msg, allocation) in batch.messages[1..].iter().zip(&allocations) {
            assert_eq!(msg.kind, MessageKind::Vote(*allocation));
        }
    }

    #[test]
    fn submission_order_is_newest_first_and_involutive() {
        let mut rng = StdRng::seed_from_u64(41);
        let coordinator = Keypair::generate(&mut rng);
        let participant = record(&mut rng, 70);
        let batch = build_vote_messages(
            &participant,
            &coordinator.public,
            &even_allocations(70, &[1, 2, 3, 4, 5, 6, 7]),
            &DevnetCipher,
            &mut rng,
        )
        .unwrap();

        let reversed = submission_order(batch.messages.clone());
        assert_eq!(reversed.first().map(|m| m.nonce), Some(8));
        assert_eq!(reversed.last().map(|m| m.nonce), Some(1));
        assert_eq!(submission_order(reversed), batch.messages);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn nonces_are_gapless_from_one(count in 0usize..12, seed in any::<u64>()) {
            let mut rng = StdRng::seed_from_u64(seed);
            let coordinator = Keypair::generate(&mut rng);
            let participant = record(&mut rng, 10_000);
            let recipients = (1..=count as u64).collect::<Vec<_>>();
            let batch = build_vote_messages(
                &participant,
                &coordinator.public,
                &even_allocations(10_000, &recipients),
                &DevnetCipher,
                &mut rng,
            )
            .unwrap();
            prop_assert_eq!(batch.messages.len(), count + 1);
            for (idx, msg) in batch.messages.iter().enumerate() {
                prop_assert_eq!(msg.nonce, idx as u64 + 1);
            }
            let is_key_change = matches!(batch.messages[0].kind, MessageKind::KeyChange { .. });
            prop_assert!(is_key_change);
        }
    }
}
