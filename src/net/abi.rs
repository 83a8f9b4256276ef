//! Solidity ABI encoding for the handful of calls and events the client uses.
//!
//! Every argument here is either a static word or a dynamic array of static
//! tuples, so the encoder is a flat word writer rather than a general codec.

use crate::address::Address;
use crate::cipher::{u128_word, MESSAGE_DATA_WORDS};
use crate::error::ChainError;
use crate::keys::PubKey;
use crate::net::rpc::keccak256;
use crate::vote::VoteMessage;

/// `approve(address,uint256)` on the contribution token.
pub const APPROVE: &str = "approve(address,uint256)";
/// `balanceOf(address)` on an ERC-20 token.
pub const BALANCE_OF: &str = "balanceOf(address)";
/// `contribute((uint256,uint256),uint256)` on the funding round.
pub const CONTRIBUTE: &str = "contribute((uint256,uint256),uint256)";
/// `submitMessageBatch(Message[],PubKey[])` on the funding round.
pub const SUBMIT_MESSAGE_BATCH: &str =
    "submitMessageBatch((uint256,uint256[10])[],(uint256,uint256)[])";
/// `nativeToken()` on the funding round.
pub const NATIVE_TOKEN: &str = "nativeToken()";
/// `maci()` on the funding round.
pub const MACI: &str = "maci()";
/// `coordinatorPubKey()` on MACI.
pub const COORDINATOR_PUB_KEY: &str = "coordinatorPubKey()";
/// `getCurrentRound()` on the factory.
pub const GET_CURRENT_ROUND: &str = "getCurrentRound()";
/// `isVerifiedUser(address)` on the user registry.
pub const IS_VERIFIED_USER: &str = "isVerifiedUser(address)";
/// MACI sign-up event; every field is non-indexed.
pub const SIGN_UP_EVENT: &str = "SignUp((uint256,uint256),uint256,uint256)";
/// Factory event emitted when a round is deployed.
pub const ROUND_STARTED_EVENT: &str = "RoundStarted(address)";

const ERROR_STRING: &str = "Error(string)";
const WORD: usize = 32;
const MESSAGE_WORDS: usize = 1 + MESSAGE_DATA_WORDS;
const PUBKEY_WORDS: usize = 2;

/// First four bytes of the Keccak hash of a function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = keccak256(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest[..4]);
    out
}

/// `topic0` of an event signature.
pub fn event_topic(signature: &str) -> [u8; 32] {
    keccak256(signature.as_bytes())
}

/// Selector followed by static argument words.
pub fn encode_call(signature: &str, words: &[[u8; 32]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + words.len() * WORD);
    out.extend_from_slice(&selector(signature));
    for word in words {
        out.extend_from_slice(word);
    }
    out
}

/// Calldata for `approve(spender, amount)`.
pub fn encode_approve(spender: Address, amount: u128) -> Vec<u8> {
    encode_call(APPROVE, &[spender.to_word(), u128_word(amount)])
}

/// Calldata for `contribute(pubKey, amount)`; the key tuple is inlined.
pub fn encode_contribute(public_key: &PubKey, amount: u128) -> Vec<u8> {
    let (x, y) = public_key.coordinates();
    encode_call(CONTRIBUTE, &[x, y, u128_word(amount)])
}

/// Calldata for `submitMessageBatch(messages, encPubKeys)`, messages in the
/// order given.
pub fn encode_submit_message_batch(messages: &[VoteMessage]) -> Vec<u8> {
    let count = messages.len();
    let first_offset = 2 * WORD;
    let second_offset = first_offset + WORD + count * MESSAGE_WORDS * WORD;

    let mut words = Vec::with_capacity(4 + count * (MESSAGE_WORDS + PUBKEY_WORDS));
    words.push(usize_word(first_offset));
    words.push(usize_word(second_offset));

    words.push(usize_word(count));
    for msg in messages {
        words.push(msg.message.iv);
        words.extend_from_slice(&msg.message.data);
    }

    words.push(usize_word(count));
    for msg in messages {
        let (x, y) = msg.encryption_key.coordinates();
        words.push(x);
        words.push(y);
    }
    encode_call(SUBMIT_MESSAGE_BATCH, &words)
}

/// Splits return data or log data into words.
pub fn words(data: &[u8]) -> Result<Vec<[u8; 32]>, ChainError> {
    if data.len() % WORD != 0 {
        return Err(ChainError::Decode(format!(
            "abi data length {} is not a multiple of 32",
            data.len()
        )));
    }
    Ok(data
        .chunks_exact(WORD)
        .map(|chunk| {
            let mut word = [0u8; 32];
            word.copy_from_slice(chunk);
            word
        })
        .collect())
}

/// Single `address` return value.
pub fn decode_address(data: &[u8]) -> Result<Address, ChainError> {
    let words = words(data)?;
    let first = words
        .first()
        .ok_or_else(|| ChainError::Decode("empty address return".to_string()))?;
    Address::from_word(first).map_err(ChainError::Decode)
}

/// Single `bool` return value.
pub fn decode_bool(data: &[u8]) -> Result<bool, ChainError> {
    let words = words(data)?;
    let first = words
        .first()
        .ok_or_else(|| ChainError::Decode("empty bool return".to_string()))?;
    match word_u128(first)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(ChainError::Decode(format!("invalid bool word {other}"))),
    }
}

/// Single `uint256` return value that fits in 128 bits.
pub fn decode_u128(data: &[u8]) -> Result<u128, ChainError> {
    let words = words(data)?;
    let first = words
        .first()
        .ok_or_else(|| ChainError::Decode("empty uint return".to_string()))?;
    word_u128(first)
}

/// `(uint256 x, uint256 y)` public key return value.
pub fn decode_pubkey(data: &[u8]) -> Result<PubKey, ChainError> {
    let words = words(data)?;
    if words.len() < PUBKEY_WORDS {
        return Err(ChainError::Decode(format!(
            "public key needs 2 words, got {}",
            words.len()
        )));
    }
    PubKey::from_coordinates(&words[0], &words[1]).map_err(ChainError::Decode)
}

/// Decoded `SignUp` log payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUpLog {
    /// Key registered by the sign-up.
    pub public_key: PubKey,
    /// Assigned state index.
    pub state_index: u64,
    /// Voice credits granted.
    pub voice_credit_balance: u128,
}

/// Parses the data of a `SignUp` log.
pub fn decode_sign_up(data: &[u8]) -> Result<SignUpLog, ChainError> {
    let words = words(data)?;
    if words.len() != 4 {
        return Err(ChainError::Decode(format!(
            "SignUp log needs 4 words, got {}",
            words.len()
        )));
    }
    let public_key = PubKey::from_coordinates(&words[0], &words[1]).map_err(ChainError::Decode)?;
    let state_index = u64::try_from(word_u128(&words[2])?)
        .map_err(|_| ChainError::Decode("state index exceeds u64".to_string()))?;
    Ok(SignUpLog {
        public_key,
        state_index,
        voice_credit_balance: word_u128(&words[3])?,
    })
}

/// Extracts the message from `Error(string)` revert data.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    if data.len() < 4 || data[..4] != selector(ERROR_STRING) {
        return None;
    }
    let body = words(&data[4..]).ok()?;
    let offset = usize::try_from(word_u128(body.first()?).ok()?).ok()? / WORD;
    let len = usize::try_from(word_u128(body.get(offset)?).ok()?).ok()?;
    let start = 4 + (offset + 1) * WORD;
    let bytes = data.get(start..start.checked_add(len)?)?;
    String::from_utf8(bytes.to_vec()).ok()
}

fn usize_word(value: usize) -> [u8; 32] {
    u128_word(value as u128)
}

fn word_u128(word: &[u8; 32]) -> Result<u128, ChainError> {
    if word[..16].iter().any(|b| *b != 0) {
        return Err(ChainError::Decode("uint256 exceeds 128 bits".to_string()));
    }
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(buf))
}
