//! Collaborator seams for the funding round and its factory.
//!
//! Each transaction-sending method is a single awaited call: it broadcasts,
//! waits until the transaction is mined, and returns either the decoded result
//! or a [`ChainError`]. Callers never observe a pending transaction.

use crate::address::Address;
use crate::error::ChainError;
use crate::keys::PubKey;
use crate::vote::VoteMessage;

/// Gas ceiling used for vote batches unless the operator overrides it.
pub const DEFAULT_BATCH_GAS_LIMIT: u64 = 20_000_000;

/// An opaque signing-capable participant credential.
pub trait Credential {
    /// Account address controlled by the credential.
    fn address(&self) -> Address;
}

/// Receipt of a mined, successful transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    /// Transaction hash (`0x` hex).
    pub tx_hash: String,
    /// Block the transaction was included in.
    pub block_number: u64,
    /// Gas consumed.
    pub gas_used: u64,
}

/// Fields of the MACI `SignUp` event emitted by a contribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUpEvent {
    /// Position assigned in the MACI state tree.
    pub state_index: u64,
    /// Voice credits granted for the contribution.
    pub voice_credit_balance: u128,
    /// Hash of the contribution transaction.
    pub tx_hash: String,
}

/// Operations consumed from a deployed funding round.
#[allow(async_fn_in_trait)]
pub trait RoundContract {
    /// Credential type accepted for signed calls.
    type Credential: Credential;

    /// Address of the round contract.
    fn address(&self) -> Address;

    /// `nativeToken()`: ERC-20 token accepted for contributions.
    async fn native_token_address(&self) -> Result<Address, ChainError>;

    /// `maci()`: MACI instance the round signs participants up to.
    async fn maci_address(&self) -> Result<Address, ChainError>;

    /// Coordinator public key messages are encrypted to.
    async fn coordinator_public_key(&self) -> Result<PubKey, ChainError>;

    /// `approve(spender, amount)` on `token`, signed by `signer`.
    async fn approve(
        &self,
        signer: &Self::Credential,
        token: Address,
        spender: Address,
        amount: u128,
    ) -> Result<TxReceipt, ChainError>;

    /// `contribute(pubKey, amount)`; resolves to the emitted `SignUp` event.
    async fn contribute(
        &self,
        signer: &Self::Credential,
        public_key: &PubKey,
        amount: u128,
    ) -> Result<SignUpEvent, ChainError>;

    /// `submitMessageBatch(messages, encPubKeys)` with an explicit gas limit.
    /// `messages` are passed through in the order given.
    async fn submit_message_batch(
        &self,
        signer: &Self::Credential,
        messages: &[VoteMessage],
        gas_limit: u64,
    ) -> Result<TxReceipt, ChainError>;
}

/// Operations consumed from the round factory.
#[allow(async_fn_in_trait)]
pub trait RoundRegistry {
    /// Address of the factory.
    fn address(&self) -> Address;

    /// Rounds deployed by the factory, oldest first.
    async fn registered_rounds(&self) -> Result<Vec<Address>, ChainError>;

    /// `getCurrentRound()`.
    async fn current_round(&self) -> Result<Address, ChainError>;
}
