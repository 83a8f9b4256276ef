use crate::address::Address;
use crate::contract::{Credential, RoundContract};
use crate::error::ClientError;
use crate::keys::Keypair;
use crate::session::{ParticipantRecord, SessionStore};
use rand::{CryptoRng, RngCore};
use std::path::PathBuf;

/// One whole token at 18 decimals.
pub const UNIT: u128 = 1_000_000_000_000_000_000;

/// Contribution made per participant unless overridden (1.6 tokens).
pub const DEFAULT_CONTRIBUTION: u128 = UNIT * 16 / 10;

const UNIT_DECIMALS: usize = 18;

/// Parses a decimal token amount such as `1.6` into base units.
pub fn parse_token_amount(text: &str) -> Result<u128, ClientError> {
    let trimmed = text.trim();
    let invalid = || ClientError::Config(format!("invalid token amount: {text}"));
    let (whole, frac) = match trimmed.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (trimmed, ""),
    };
    if (whole.is_empty() && frac.is_empty())
        || frac.len() > UNIT_DECIMALS
        || !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit())
    {
        return Err(invalid());
    }
    let whole = if whole.is_empty() {
        0
    } else {
        whole.parse::<u128>().map_err(|_| invalid())?
    };
    let frac = if frac.is_empty() {
        0
    } else {
        let padded = format!("{frac:0<width$}", width = UNIT_DECIMALS);
        padded.parse::<u128>().map_err(|_| invalid())?
    };
    whole
        .checked_mul(UNIT)
        .and_then(|value| value.checked_add(frac))
        .ok_or_else(invalid)
}

/// Renders base units as a decimal token amount without trailing zeros.
pub fn format_token_amount(value: u128) -> String {
    let whole = value / UNIT;
    let frac = value % UNIT;
    if frac == 0 {
        return whole.to_string();
    }
    let digits = format!("{frac:0width$}", width = UNIT_DECIMALS);
    format!("{whole}.{}", digits.trim_end_matches('0'))
}

/// Options for a contribution batch.
#[derive(Debug, Clone)]
pub struct ContributeOptions {
    /// Token amount (base units) approved and contributed per participant.
    pub amount: u128,
    /// Session file rewritten after each successful registration.
    pub session_path: PathBuf,
}

/// A participant whose registration did not complete.
#[derive(Debug, Clone)]
pub struct ContributionFailure {
    /// Participant account.
    pub participant: Address,
    /// `AuthorizationFailed`, `SignUpFailed`, or `RecordNotSaved` when the
    /// sign-up was mined but the session file could not be written.
    pub error: ClientError,
}

/// Outcome of a contribution batch.
#[derive(Debug, Clone, Default)]
pub struct ContributionSummary {
    /// Participants registered in this run, in processing order.
    pub registered: Vec<Address>,
    /// Participants that failed, in processing order.
    pub failed: Vec<ContributionFailure>,
}

impl ContributionSummary {
    /// Number of participants registered in this run.
    pub fn registered_count(&self) -> usize {
        self.registered.len()
    }

    /// Whether every participant registered.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Approves and signs up each participant in turn.
///
/// Participants are processed strictly one after another. A failed approval
/// or sign-up is recorded and the batch moves on; earlier registrations stay.
/// A mined sign-up whose record cannot be saved is reported as
/// `RecordNotSaved`, with its key printed to stderr, and the batch continues.
/// The session for the round must already be open in `store`.
pub async fn run_contributions<R, G>(
    round: &R,
    store: &mut SessionStore,
    credentials: &[R::Credential],
    opts: &ContributeOptions,
    rng: &mut G,
) -> Result<ContributionSummary, ClientError>
where
    R: RoundContract,
    G: RngCore + CryptoRng,
{
    let round_address = round.address();
    if store.round(&round_address).is_none() {
        return Err(ClientError::Session(format!(
            "no session for round {round_address}; run `session init` first"
        )));
    }
    let token = round.native_token_address().await?;
    let maci = round.maci_address().await?;
    println!(
        "QSYS|mod=CONTRIB|evt=START|round={round_address}|token={token}|maci={maci}|participants={}|amount={}",
        credentials.len(),
        opts.amount
    );

    let mut summary = ContributionSummary::default();
    for credential in credentials {
        let participant = credential.address();
        match register_participant(round, credential, token, opts.amount, rng).await {
            Ok((record, tx_hash)) => {
                let state_index = record.state_index();
                let voice_credits = record.voice_credits();
                let secret = record.keypair().private.serialize();
                let persisted = store
                    .insert_participant(&round_address, record)
                    .and_then(|()| store.save(&opts.session_path));
                match persisted {
                    Ok(()) => {
                        println!(
                            "QSYS|mod=CONTRIB|evt=REGISTERED|addr={participant}|state_index={state_index}|voice_credits={voice_credits}"
                        );
                        summary.registered.push(participant);
                    }
                    Err(err) => {
                        // The sign-up is on chain; the key must not be lost with the record.
                        eprintln!(
                            "{participant} signed up in {tx_hash} (state index {state_index}) but the session was not saved: {err}; maci key {secret}"
                        );
                        println!("QSYS|mod=CONTRIB|evt=UNSAVED|addr={participant}|tx={tx_hash}");
                        summary.failed.push(ContributionFailure {
                            participant,
                            error: ClientError::RecordNotSaved {
                                participant: participant.to_string(),
                                tx_hash,
                                reason: err.to_string(),
                            },
                        });
                    }
                }
            }
            Err(error) => {
                eprintln!("contribution failed for {participant}: {error}");
                println!("QSYS|mod=CONTRIB|evt=FAILED|addr={participant}");
                summary.failed.push(ContributionFailure { participant, error });
            }
        }
    }

    println!(
        "QSYS|mod=CONTRIB|evt=DONE|registered={}|failed={}",
        summary.registered.len(),
        summary.failed.len()
    );
    Ok(summary)
}

async fn register_participant<R, G>(
    round: &R,
    credential: &R::Credential,
    token: Address,
    amount: u128,
    rng: &mut G,
) -> Result<(ParticipantRecord, String), ClientError>
where
    R: RoundContract,
    G: RngCore + CryptoRng,
{
    let participant = credential.address();
    let keypair = Keypair::generate(rng);

    round
        .approve(credential, token, round.address(), amount)
        .await
        .map_err(|err| ClientError::AuthorizationFailed {
            participant: participant.to_string(),
            reason: err.to_string(),
        })?;

    let event = round
        .contribute(credential, &keypair.public, amount)
        .await
        .map_err(|err| ClientError::SignUpFailed {
            participant: participant.to_string(),
            reason: err.to_string(),
        })?;

    let record = ParticipantRecord::new(
        participant,
        keypair,
        event.state_index,
        event.voice_credit_balance,
    );
    Ok((record, event.tx_hash))
}

#[cfg(test)]
mod tests {
    use super::{
        format_token_amount, parse_token_amount, run_contributions, ContributeOptions,
        DEFAULT_CONTRIBUTION, UNIT,
    };
    use crate::contract::mock::{block_on, participant, MockRound};
    use crate::directory::RoundReference;
    use crate::error::ClientError;
    use crate::keys::Keypair;
    use crate::session::SessionStore;
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

    fn open_store(round: &MockRound) -> SessionStore {
        let mut store = SessionStore::default();
        store
            .open_round(RoundReference {
                index: 0,
                address: Some(round.address),
                url: None,
            })
            .unwrap();
        store
    }

    #[test]
    fn authorization_failure_skips_only_that_participant() {
        let mut rng = StdRng::seed_from_u64(50);
        let mut round = MockRound::new(Keypair::generate(&mut rng));
        round.fail_approve.insert(participant(3).0);
        let mut store = open_store(&round);
        let path = temp_path("contrib_partial");
        let opts = ContributeOptions {
            amount: DEFAULT_CONTRIBUTION,
            session_path: path.clone(),
        };
        let credentials = [participant(1), participant(2), participant(3), participant(4)];

        let summary =
            block_on(run_contributions(&round, &mut store, &credentials, &opts, &mut rng)).unwrap();

        assert_eq!(summary.registered_count(), 3);
        assert_eq!(
            summary.registered,
            vec![participant(1).0, participant(2).0, participant(4).0]
        );
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].participant, participant(3).0);
        assert!(matches!(
            summary.failed[0].error,
            ClientError::AuthorizationFailed { .. }
        ));

        let persisted = SessionStore::load(&path).unwrap();
        let session = persisted.round(&round.address).unwrap();
        assert_eq!(session.participant_count(), 3);
        assert!(session.participant(&participant(3).0).is_none());
        assert_eq!(
            session.participant(&participant(4).0).unwrap().state_index(),
            3
        );
        assert!(round
            .signups
            .borrow()
            .iter()
            .all(|(who, _)| *who != participant(3).0));

        let _ = fs::remove_file(path);
    }

    #[test]
    fn signup_failure_is_reported_as_signup() {
        let mut rng = StdRng::seed_from_u64(51);
        let mut round = MockRound::new(Keypair::generate(&mut rng));
        round.fail_contribute.insert(participant(1).0);
        let mut store = open_store(&round);
        let path = temp_path("contrib_signup");
        let opts = ContributeOptions {
            amount: 5,
            session_path: path.clone(),
        };

        let summary = block_on(run_contributions(
            &round,
            &mut store,
            &[participant(1), participant(2)],
            &opts,
            &mut rng,
        ))
        .unwrap();

        assert_eq!(summary.registered, vec![participant(2).0]);
        assert!(matches!(
            summary.failed[0].error,
            ClientError::SignUpFailed { .. }
        ));
        assert_eq!(round.approvals.borrow().len(), 2);
        assert!(round.approvals.borrow().iter().all(|(_, amt)| *amt == 5));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn records_keep_generated_keys() {
        let mut rng = StdRng::seed_from_u64(52);
        let round = MockRound::new(Keypair::generate(&mut rng));
        let mut store = open_store(&round);
        let path = temp_path("contrib_keys");
        let opts = ContributeOptions {
            amount: DEFAULT_CONTRIBUTION,
            session_path: path.clone(),
        };
        block_on(run_contributions(
            &round,
            &mut store,
            &[participant(7)],
            &opts,
            &mut rng,
        ))
        .unwrap();

        let signed_up = round.signups.borrow()[0].1;
        let record = store
            .round(&round.address)
            .unwrap()
            .participant(&participant(7).0)
            .unwrap();
        assert_eq!(record.keypair().public, signed_up);
        assert_eq!(record.voice_credits(), 1000);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn unsaved_record_does_not_stop_the_batch() {
        let mut rng = StdRng::seed_from_u64(54);
        let round = MockRound::new(Keypair::generate(&mut rng));
        let mut store = open_store(&round);
        // A regular file as parent directory makes every save fail.
        let blocker = temp_path("contrib_blocker");
        fs::write(&blocker, b"not a directory").unwrap();
        let opts = ContributeOptions {
            amount: DEFAULT_CONTRIBUTION,
            session_path: blocker.join("session.json"),
        };
        let credentials = [participant(1), participant(2), participant(3), participant(4)];

        let summary =
            block_on(run_contributions(&round, &mut store, &credentials, &opts, &mut rng)).unwrap();

        assert_eq!(round.signups.borrow().len(), 4);
        assert!(summary.registered.is_empty());
        assert_eq!(summary.failed.len(), 4);
        for (idx, failure) in summary.failed.iter().enumerate() {
            assert_eq!(failure.participant, credentials[idx].0);
            match &failure.error {
                ClientError::RecordNotSaved { tx_hash, .. } => {
                    assert_eq!(*tx_hash, format!("0x{:064x}", idx + 1));
                }
                other => panic!("expected RecordNotSaved, got {other:?}"),
            }
        }
        // The in-memory store still holds every generated key.
        let session = store.round(&round.address).unwrap();
        assert_eq!(session.participant_count(), 4);
        let signed_up = round.signups.borrow()[3].1;
        assert_eq!(
            session.participant(&participant(4).0).unwrap().keypair().public,
            signed_up
        );
        let _ = fs::remove_file(blocker);
    }

    #[test]
    fn token_amounts() {
        assert_eq!(parse_token_amount("1.6").unwrap(), DEFAULT_CONTRIBUTION);
        assert_eq!(parse_token_amount("2").unwrap(), 2 * UNIT);
        assert_eq!(parse_token_amount(".5").unwrap(), UNIT / 2);
        assert_eq!(parse_token_amount("0.000000000000000001").unwrap(), 1);
        assert!(parse_token_amount("0.0000000000000000001").is_err());
        assert!(parse_token_amount("1.2.3").is_err());
        assert!(parse_token_amount("-1").is_err());
        assert!(parse_token_amount(".").is_err());
        assert_eq!(format_token_amount(DEFAULT_CONTRIBUTION), "1.6");
        assert_eq!(format_token_amount(3 * UNIT), "3");
        assert_eq!(format_token_amount(1), "0.000000000000000001");
    }

    #[test]
    fn requires_open_session() {
        let mut rng = StdRng::seed_from_u64(53);
        let round = MockRound::new(Keypair::generate(&mut rng));
        let mut store = SessionStore::default();
        let opts = ContributeOptions {
            amount: 1,
            session_path: temp_path("contrib_nosession"),
        };
        let result = block_on(run_contributions(
            &round,
            &mut store,
            &[participant(1)],
            &opts,
            &mut rng,
        ));
        assert!(matches!(result, Err(ClientError::Session(_))));
        assert!(round.approvals.borrow().is_empty());
    }
}
