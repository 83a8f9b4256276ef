use crate::address::Address;
use crate::cipher::MessageCipher;
use crate::contract::{Credential, RoundContract, TxReceipt, DEFAULT_BATCH_GAS_LIMIT};
use crate::error::ClientError;
use crate::session::SessionStore;
use crate::vote::{build_vote_messages, even_allocations, submission_order, VoteMessage};
use rand::{CryptoRng, RngCore};
use std::path::PathBuf;

/// Recipients voted for when the operator does not pass a list.
pub const DEFAULT_RECIPIENTS: [u64; 7] = [1, 2, 3, 4, 5, 6, 7];

/// Options for a voting run.
#[derive(Debug, Clone)]
pub struct VoteOptions {
    /// Recipient indices; each gets an equal floor share of the voice credits.
    pub recipients: Vec<u64>,
    /// Gas ceiling for each batch transaction.
    pub gas_limit: u64,
    /// Session file rewritten after each successful batch.
    pub session_path: PathBuf,
}

impl VoteOptions {
    /// Default recipients and gas limit.
    pub fn new(session_path: PathBuf) -> Self {
        Self {
            recipients: DEFAULT_RECIPIENTS.to_vec(),
            gas_limit: DEFAULT_BATCH_GAS_LIMIT,
            session_path,
        }
    }
}

/// A participant whose batch was mined.
#[derive(Debug, Clone)]
pub struct VoteSuccess {
    /// Participant account.
    pub participant: Address,
    /// Batch transaction hash.
    pub tx_hash: String,
    /// Messages in the batch, key change included.
    pub messages: usize,
}

/// A participant whose voting stopped.
#[derive(Debug, Clone)]
pub struct VoteFailure {
    /// Participant account.
    pub participant: Address,
    /// Why the participant halted.
    pub error: ClientError,
}

/// Per-participant outcome of a voting run.
#[derive(Debug, Clone, Default)]
pub struct VoteSummary {
    /// Successful participants, in processing order.
    pub voted: Vec<VoteSuccess>,
    /// Halted participants, in processing order.
    pub failed: Vec<VoteFailure>,
}

/// Reverses an oldest-first batch and submits it as one transaction.
///
/// A revert or an unmined transaction yields `SubmissionFailed`; nothing is
/// retried and no subset is resubmitted.
pub async fn submit_vote_batch<R: RoundContract>(
    round: &R,
    credential: &R::Credential,
    messages: Vec<VoteMessage>,
    gas_limit: u64,
) -> Result<TxReceipt, ClientError> {
    let participant = credential.address();
    let ordered = submission_order(messages);
    round
        .submit_message_batch(credential, &ordered, gas_limit)
        .await
        .map_err(|err| ClientError::SubmissionFailed {
            participant: participant.to_string(),
            reason: err.to_string(),
        })
}

/// Builds and submits a batch for every participant in turn.
///
/// A participant that fails halts at that step and keeps its stored record
/// untouched; the run continues with the next participant. A mined batch
/// replaces the participant's stored key pair with the one it rotated to; if
/// that cannot be saved the participant is reported as `RecordNotSaved`.
pub async fn run_votes<R, C, G>(
    round: &R,
    store: &mut SessionStore,
    credentials: &[R::Credential],
    opts: &VoteOptions,
    cipher: &C,
    rng: &mut G,
) -> Result<VoteSummary, ClientError>
where
    R: RoundContract,
    C: MessageCipher,
    G: RngCore + CryptoRng,
{
    let round_address = round.address();
    let session = store.round(&round_address).ok_or_else(|| {
        ClientError::Session(format!("no session for round {round_address}"))
    })?;
    let coordinator = match session.coordinator_public_key {
        Some(key) => key,
        None => round.coordinator_public_key().await?,
    };
    println!(
        "QSYS|mod=VOTE|evt=START|round={round_address}|participants={}|recipients={}|gas_limit={}",
        credentials.len(),
        opts.recipients.len(),
        opts.gas_limit
    );

    let mut summary = VoteSummary::default();
    for credential in credentials {
        let participant = credential.address();
        let record = store
            .round(&round_address)
            .and_then(|session| session.participant(&participant))
            .cloned();
        let Some(record) = record else {
            let error = ClientError::Session(format!("participant {participant} is not registered"));
            eprintln!("vote skipped for {participant}: {error}");
            summary.failed.push(VoteFailure { participant, error });
            continue;
        };

        let allocations = even_allocations(record.voice_credits(), &opts.recipients);
        let batch = match build_vote_messages(&record, &coordinator, &allocations, cipher, rng) {
            Ok(batch) => batch,
            Err(error) => {
                eprintln!("vote build failed for {participant}: {error}");
                summary.failed.push(VoteFailure { participant, error });
                continue;
            }
        };
        let message_count = batch.messages.len();

        match submit_vote_batch(round, credential, batch.messages, opts.gas_limit).await {
            Ok(receipt) => {
                let secret = batch.replacement.private.serialize();
                let persisted = store
                    .replace_keypair(&round_address, &participant, batch.replacement)
                    .and_then(|()| store.save(&opts.session_path));
                if let Err(err) = persisted {
                    // The key change is mined; the rotated key must stay recoverable.
                    eprintln!(
                        "{participant} voted in {} but the session was not saved: {err}; new maci key {secret}",
                        receipt.tx_hash
                    );
                    println!(
                        "QSYS|mod=VOTE|evt=UNSAVED|addr={participant}|tx={}",
                        receipt.tx_hash
                    );
                    summary.failed.push(VoteFailure {
                        participant,
                        error: ClientError::RecordNotSaved {
                            participant: participant.to_string(),
                            tx_hash: receipt.tx_hash,
                            reason: err.to_string(),
                        },
                    });
                    continue;
                }
                println!(
                    "QSYS|mod=VOTE|evt=SUBMITTED|addr={participant}|messages={message_count}|tx={}|block={}",
                    receipt.tx_hash, receipt.block_number
                );
                summary.voted.push(VoteSuccess {
                    participant,
                    tx_hash: receipt.tx_hash,
                    messages: message_count,
                });
            }
            Err(error) => {
                eprintln!("vote submission failed for {participant}: {error}");
                println!("QSYS|mod=VOTE|evt=FAILED|addr={participant}");
                summary.failed.push(VoteFailure { participant, error });
            }
        }
    }

    println!(
        "QSYS|mod=VOTE|evt=DONE|voted={}|failed={}",
        summary.voted.len(),
        summary.failed.len()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::{run_votes, submit_vote_batch, VoteOptions};
    use crate::cipher::DevnetCipher;
    use crate::contract::mock::{block_on, participant, MockRound};
    use crate::directory::RoundReference;
    use crate::error::ClientError;
    use crate::keys::Keypair;
    use crate::session::{ParticipantRecord, SessionStore};
    use crate::vote::{build_vote_messages, even_allocations, MessageKind};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::fs;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        p.push(format!("{name}_{ts}.json"));
        p
    }

    fn seeded_store(round: &MockRound, rng: &mut StdRng, who: &[u8]) -> SessionStore {
        let mut store = SessionStore::default();
        store
            .open_round(RoundReference {
                index: 0,
                address: Some(round.address),
                url: None,
            })
            .unwrap();
        for (idx, n) in who.iter().enumerate() {
            store
                .insert_participant(
                    &round.address,
                    ParticipantRecord::new(
                        participant(*n).0,
                        Keypair::generate(rng),
                        idx as u64 + 1,
                        1000,
                    ),
                )
                .unwrap();
        }
        store
    }

    #[test]
    fn batch_is_submitted_newest_first_with_gas_limit() {
        let mut rng = StdRng::seed_from_u64(60);
        let round = MockRound::new(Keypair::generate(&mut rng));
        let mut store = seeded_store(&round, &mut rng, &[1]);
        let path = temp_path("vote_order");
        let opts = VoteOptions::new(path.clone());

        let summary = block_on(run_votes(
            &round,
            &mut store,
            &[participant(1)],
            &opts,
            &DevnetCipher,
            &mut rng,
        ))
        .unwrap();

        assert_eq!(summary.voted.len(), 1);
        assert_eq!(summary.voted[0].messages, 8);
        let batches = round.batches.borrow();
        let (who, messages, gas) = &batches[0];
        assert_eq!(*who, participant(1).0);
        assert_eq!(*gas, 20_000_000);
        let nonces = messages.iter().map(|m| m.nonce).collect::<Vec<_>>();
        assert_eq!(nonces, vec![8, 7, 6, 5, 4, 3, 2, 1]);
        assert!(matches!(
            messages.last().unwrap().kind,
            MessageKind::KeyChange { .. }
        ));
        for msg in &messages[..7] {
            match msg.kind {
                MessageKind::Vote(allocation) => assert_eq!(allocation.credits, 142),
                MessageKind::KeyChange { .. } => panic!("key change out of place"),
            }
        }

        let persisted = SessionStore::load(&path).unwrap();
        let record = persisted
            .round(&round.address)
            .unwrap()
            .participant(&participant(1).0)
            .unwrap();
        assert_eq!(record.keypair().public, messages[0].encryption_key);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn revert_surfaces_reason() {
        let mut rng = StdRng::seed_from_u64(61);
        let mut round = MockRound::new(Keypair::generate(&mut rng));
        round.fail_submit.insert(participant(1).0);
        let store = seeded_store(&round, &mut rng, &[1]);
        let record = store
            .round(&round.address)
            .unwrap()
            .participant(&participant(1).0)
            .unwrap()
            .clone();
        let batch = build_vote_messages(
            &record,
            &round.coordinator.public,
            &even_allocations(1000, &[1, 2]),
            &DevnetCipher,
            &mut rng,
        )
        .unwrap();

        let result = block_on(submit_vote_batch(
            &round,
            &participant(1),
            batch.messages,
            20_000_000,
        ));
        match result {
            Err(ClientError::SubmissionFailed { participant: who, reason }) => {
                assert_eq!(who, participant(1).0.to_string());
                assert!(reason.contains("voting period is over"));
            }
            other => panic!("expected SubmissionFailed, got {other:?}"),
        }
        assert!(round.batches.borrow().is_empty());
    }

    #[test]
    fn revert_keeps_persisted_key() {
        let mut rng = StdRng::seed_from_u64(64);
        let mut round = MockRound::new(Keypair::generate(&mut rng));
        round.fail_submit.insert(participant(1).0);
        let mut store = seeded_store(&round, &mut rng, &[1, 2]);
        let path = temp_path("vote_revert");
        store.save(&path).unwrap();
        let key_one = store
            .round(&round.address)
            .unwrap()
            .participant(&participant(1).0)
            .unwrap()
            .keypair();
        let key_two = store
            .round(&round.address)
            .unwrap()
            .participant(&participant(2).0)
            .unwrap()
            .keypair();

        let summary = block_on(run_votes(
            &round,
            &mut store,
            &[participant(1), participant(2)],
            &VoteOptions::new(path.clone()),
            &DevnetCipher,
            &mut rng,
        ))
        .unwrap();
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.voted.len(), 1);

        // The file was rewritten for participant 2 only.
        let persisted = SessionStore::load(&path).unwrap();
        let session = persisted.round(&round.address).unwrap();
        assert_eq!(session.participant(&participant(1).0).unwrap().keypair(), key_one);
        assert_ne!(session.participant(&participant(2).0).unwrap().keypair(), key_two);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn unsaved_key_rotation_is_reported_and_run_continues() {
        let mut rng = StdRng::seed_from_u64(65);
        let round = MockRound::new(Keypair::generate(&mut rng));
        let mut store = seeded_store(&round, &mut rng, &[1, 2]);
        let blocker = temp_path("vote_blocker");
        fs::write(&blocker, b"not a directory").unwrap();
        let opts = VoteOptions::new(blocker.join("session.json"));

        let summary = block_on(run_votes(
            &round,
            &mut store,
            &[participant(1), participant(2)],
            &opts,
            &DevnetCipher,
            &mut rng,
        ))
        .unwrap();

        assert_eq!(round.batches.borrow().len(), 2);
        assert!(summary.voted.is_empty());
        assert_eq!(summary.failed.len(), 2);
        match &summary.failed[1].error {
            ClientError::RecordNotSaved {
                participant: who,
                tx_hash,
                ..
            } => {
                assert_eq!(*who, participant(2).0.to_string());
                assert_eq!(*tx_hash, format!("0x{:064x}", 2));
            }
            other => panic!("expected RecordNotSaved, got {other:?}"),
        }
        // The in-memory record holds the rotated key.
        let batches = round.batches.borrow();
        let record = store
            .round(&round.address)
            .unwrap()
            .participant(&participant(1).0)
            .unwrap();
        assert_eq!(record.keypair().public, batches[0].1[0].encryption_key);
        let _ = fs::remove_file(blocker);
    }

    #[test]
    fn failed_participant_halts_alone() {
        let mut rng = StdRng::seed_from_u64(62);
        let mut round = MockRound::new(Keypair::generate(&mut rng));
        round.fail_submit.insert(participant(2).0);
        let mut store = seeded_store(&round, &mut rng, &[1, 2, 3]);
        let path = temp_path("vote_partial");
        let opts = VoteOptions {
            recipients: vec![1, 2, 3],
            gas_limit: 1_000_000,
            session_path: path.clone(),
        };
        let key_before = store
            .round(&round.address)
            .unwrap()
            .participant(&participant(2).0)
            .unwrap()
            .keypair();

        let summary = block_on(run_votes(
            &round,
            &mut store,
            &[participant(1), participant(2), participant(3), participant(9)],
            &opts,
            &DevnetCipher,
            &mut rng,
        ))
        .unwrap();

        let voted = summary.voted.iter().map(|v| v.participant).collect::<Vec<_>>();
        assert_eq!(voted, vec![participant(1).0, participant(3).0]);
        assert_eq!(summary.failed.len(), 2);
        assert!(matches!(
            summary.failed[0].error,
            ClientError::SubmissionFailed { .. }
        ));
        assert!(matches!(summary.failed[1].error, ClientError::Session(_)));
        let key_after = store
            .round(&round.address)
            .unwrap()
            .participant(&participant(2).0)
            .unwrap()
            .keypair();
        assert_eq!(key_before, key_after);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn pinned_coordinator_key_is_used() {
        let mut rng = StdRng::seed_from_u64(63);
        let round = MockRound::new(Keypair::generate(&mut rng));
        let pinned = Keypair::generate(&mut rng);
        let mut store = seeded_store(&round, &mut rng, &[1]);
        store
            .set_coordinator_key(&round.address, pinned.public)
            .unwrap();
        let path = temp_path("vote_pinned");
        let opts = VoteOptions {
            recipients: vec![1],
            gas_limit: 1,
            session_path: path.clone(),
        };
        block_on(run_votes(
            &round,
            &mut store,
            &[participant(1)],
            &opts,
            &DevnetCipher,
            &mut rng,
        ))
        .unwrap();

        let batches = round.batches.borrow();
        let msg = &batches[0].1[0];
        assert!(DevnetCipher
            .open(&msg.message, &msg.encryption_key, &pinned)
            .is_ok());
        let _ = fs::remove_file(path);
    }
}
