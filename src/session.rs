//! Durable session state: round references and registered participants.
//!
//! The whole document is rewritten after every mutating step (temp file then
//! rename). The store is a plain owned value; callers pass it explicitly and
//! serialize access themselves.

use crate::address::Address;
use crate::directory::RoundReference;
use crate::error::ClientError;
use crate::keys::{Keypair, PrivKey, PubKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Schema tag written into every session file.
pub const SESSION_SCHEMA: &str = "clrfund.ops.session.v1";

/// A participant registered with a round through a successful sign-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    address: Address,
    private_key: PrivKey,
    public_key: PubKey,
    state_index: u64,
    #[serde(with = "decimal_u128")]
    voice_credits: u128,
}

impl ParticipantRecord {
    /// Creates the record from a sign-up result.
    pub fn new(address: Address, keypair: Keypair, state_index: u64, voice_credits: u128) -> Self {
        Self {
            address,
            private_key: keypair.private,
            public_key: keypair.public,
            state_index,
            voice_credits,
        }
    }

    /// Participant account.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Active MACI key pair.
    pub fn keypair(&self) -> Keypair {
        Keypair {
            private: self.private_key.clone(),
            public: self.public_key,
        }
    }

    /// Position in the MACI state tree.
    pub fn state_index(&self) -> u64 {
        self.state_index
    }

    /// Voice credits granted at sign-up.
    pub fn voice_credits(&self) -> u128 {
        self.voice_credits
    }

    fn replace_keypair(&mut self, keypair: Keypair) {
        self.private_key = keypair.private;
        self.public_key = keypair.public;
    }

    fn is_consistent(&self) -> bool {
        self.private_key.public_key() == self.public_key
    }
}

/// Session data for one funding round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSession {
    /// Directory reference the session was opened for.
    pub round: RoundReference,
    /// Coordinator key pinned by the operator; read from MACI when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinator_public_key: Option<PubKey>,
    #[serde(default)]
    participants: BTreeMap<Address, ParticipantRecord>,
}

impl RoundSession {
    /// Empty session for `round`.
    pub fn new(round: RoundReference) -> Self {
        Self {
            round,
            coordinator_public_key: None,
            participants: BTreeMap::new(),
        }
    }

    /// Registered participant by address.
    pub fn participant(&self, address: &Address) -> Option<&ParticipantRecord> {
        self.participants.get(address)
    }

    /// All participants ordered by address.
    pub fn participants(&self) -> impl Iterator<Item = &ParticipantRecord> {
        self.participants.values()
    }

    /// Number of registered participants.
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }
}

/// Mapping from round contract address to its session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStore {
    schema: String,
    #[serde(default)]
    rounds: BTreeMap<Address, RoundSession>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self {
            schema: SESSION_SCHEMA.to_string(),
            rounds: BTreeMap::new(),
        }
    }
}

impl SessionStore {
    /// Loads from JSON; a missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self, ClientError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = fs::read(path).map_err(|err| {
            ClientError::Session(format!("failed to read {}: {err}", path.display()))
        })?;
        let store: SessionStore = serde_json::from_slice(&bytes).map_err(|err| {
            ClientError::Session(format!("invalid session {}: {err}", path.display()))
        })?;
        if store.schema != SESSION_SCHEMA {
            return Err(ClientError::Session(format!(
                "unexpected session schema: {}",
                store.schema
            )));
        }
        for session in store.rounds.values() {
            if let Some(bad) = session.participants.values().find(|r| !r.is_consistent()) {
                return Err(ClientError::Session(format!(
                    "participant {} has mismatched key pair",
                    bad.address
                )));
            }
        }
        Ok(store)
    }

    /// Rewrites the whole document.
    pub fn save(&self, path: &Path) -> Result<(), ClientError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| {
                    ClientError::Session(format!("failed to create {}: {err}", parent.display()))
                })?;
            }
        }
        let encoded = serde_json::to_vec_pretty(self)
            .map_err(|err| ClientError::Session(format!("failed to encode session: {err}")))?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, encoded).map_err(|err| {
            ClientError::Session(format!("failed to write {}: {err}", tmp_path.display()))
        })?;
        fs::rename(&tmp_path, path).map_err(|err| {
            ClientError::Session(format!("failed to replace {}: {err}", path.display()))
        })?;
        println!(
            "QSYS|mod=SESSION|evt=SAVED|path={}|rounds={}",
            path.display(),
            self.rounds.len()
        );
        Ok(())
    }

    /// Session for a round contract.
    pub fn round(&self, address: &Address) -> Option<&RoundSession> {
        self.rounds.get(address)
    }

    /// All sessions ordered by round address.
    pub fn rounds(&self) -> impl Iterator<Item = (&Address, &RoundSession)> {
        self.rounds.iter()
    }

    /// Opens a session for an on-chain round, keeping an existing one.
    pub fn open_round(&mut self, round: RoundReference) -> Result<&mut RoundSession, ClientError> {
        let address = round.address.ok_or_else(|| {
            ClientError::Session("off-chain rounds cannot hold a session".to_string())
        })?;
        Ok(self
            .rounds
            .entry(address)
            .or_insert_with(|| RoundSession::new(round)))
    }

    /// Pins the coordinator key for a round.
    pub fn set_coordinator_key(&mut self, round: &Address, key: PubKey) -> Result<(), ClientError> {
        self.round_mut(round)?.coordinator_public_key = Some(key);
        Ok(())
    }

    /// Drops a round session and every record in it.
    pub fn remove_round(&mut self, round: &Address) -> Option<RoundSession> {
        self.rounds.remove(round)
    }

    /// Adds a freshly signed-up participant.
    ///
    /// State indices are unique within a round; an existing record for the same
    /// address is superseded by the newer sign-up.
    pub fn insert_participant(
        &mut self,
        round: &Address,
        record: ParticipantRecord,
    ) -> Result<(), ClientError> {
        let session = self.round_mut(round)?;
        if let Some(clash) = session
            .participants
            .values()
            .find(|r| r.state_index == record.state_index && r.address != record.address)
        {
            return Err(ClientError::Session(format!(
                "state index {} already assigned to {}",
                record.state_index, clash.address
            )));
        }
        session.participants.insert(record.address, record);
        Ok(())
    }

    /// Replaces a participant's key pair after a processed key change.
    pub fn replace_keypair(
        &mut self,
        round: &Address,
        participant: &Address,
        keypair: Keypair,
    ) -> Result<(), ClientError> {
        let record = self
            .round_mut(round)?
            .participants
            .get_mut(participant)
            .ok_or_else(|| {
                ClientError::Session(format!("participant {participant} is not registered"))
            })?;
        record.replace_keypair(keypair);
        Ok(())
    }

    fn round_mut(&mut self, round: &Address) -> Result<&mut RoundSession, ClientError> {
        self.rounds
            .get_mut(round)
            .ok_or_else(|| ClientError::Session(format!("no session for round {round}")))
    }
}

mod decimal_u128 {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.trim().parse::<u128>().map_err(de::Error::custom)
    }
}
