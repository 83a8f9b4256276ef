//! Participant wallets and EIP-1559 transaction signing.

use crate::address::Address;
use crate::contract::Credential;
use crate::error::{ChainError, ClientError};
use crate::net::rpc::{hex_prefixed, keccak256};
use k256::ecdsa::SigningKey;
use rlp::RlpStream;
use std::fmt;

/// Prefix of the numbered environment variables holding participant keys.
pub const CONTRIBUTOR_KEY_PREFIX: &str = "CONTRIBUTOR_PK_";

const EIP1559_TX_TYPE: u8 = 0x02;

/// Unsigned type-2 transaction with an empty access list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eip1559Tx {
    /// Chain the signature is bound to.
    pub chain_id: u64,
    /// Sender account nonce.
    pub nonce: u64,
    /// Tip per gas in wei.
    pub max_priority_fee_per_gas: u128,
    /// Fee cap per gas in wei.
    pub max_fee_per_gas: u128,
    /// Gas ceiling.
    pub gas_limit: u64,
    /// Called contract.
    pub to: Address,
    /// Attached wei.
    pub value: u128,
    /// Calldata.
    pub input: Vec<u8>,
}

impl Eip1559Tx {
    fn append_fields(&self, stream: &mut RlpStream) {
        stream.append(&self.chain_id);
        stream.append(&self.nonce);
        stream.append(&self.max_priority_fee_per_gas);
        stream.append(&self.max_fee_per_gas);
        stream.append(&self.gas_limit);
        stream.append(&self.to.0.to_vec());
        stream.append(&self.value);
        stream.append(&self.input);
        stream.begin_list(0);
    }

    /// Hash the sender signs: `keccak(0x02 || rlp([chainId, ..., accessList]))`.
    pub fn signing_hash(&self) -> [u8; 32] {
        let mut stream = RlpStream::new_list(9);
        self.append_fields(&mut stream);
        keccak256(&typed_payload(stream.out().as_ref()))
    }
}

/// Signed, broadcastable transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    /// `0x02 || rlp(fields || yParity, r, s)`.
    pub raw: Vec<u8>,
    /// Transaction hash (`0x` hex).
    pub hash: String,
}

/// A participant's secp256k1 account.
#[derive(Clone)]
pub struct Wallet {
    key: SigningKey,
    address: Address,
}

impl Wallet {
    /// Parses a 32-byte hex private key, with or without `0x`.
    pub fn from_hex(input: &str) -> Result<Self, String> {
        let trimmed = input.trim();
        let raw = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let bytes = hex::decode(raw).map_err(|err| format!("invalid private key hex: {err}"))?;
        if bytes.len() != 32 {
            return Err(format!("private key must be 32 bytes, got {}", bytes.len()));
        }
        let key = SigningKey::from_slice(&bytes).map_err(|err| format!("invalid private key: {err}"))?;
        Ok(Self::from_signing_key(key))
    }

    fn from_signing_key(key: SigningKey) -> Self {
        let point = key.verifying_key().to_encoded_point(false);
        let digest = keccak256(&point.as_bytes()[1..]);
        let mut address = [0u8; 20];
        address.copy_from_slice(&digest[12..]);
        Self {
            key,
            address: Address(address),
        }
    }

    /// Account address derived from the public key.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Signs `tx` and produces its raw encoding.
    pub fn sign(&self, tx: &Eip1559Tx) -> Result<SignedTx, ChainError> {
        let sighash = tx.signing_hash();
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(&sighash)
            .map_err(|err| ChainError::Decode(format!("transaction signing failed: {err}")))?;
        let (r, s) = signature.split_bytes();

        let mut stream = RlpStream::new_list(12);
        tx.append_fields(&mut stream);
        stream.append(&u64::from(recovery_id.to_byte()));
        stream.append(&trim_leading_zeros(&r).to_vec());
        stream.append(&trim_leading_zeros(&s).to_vec());
        let raw = typed_payload(stream.out().as_ref());
        let hash = hex_prefixed(&keccak256(&raw));
        Ok(SignedTx { raw, hash })
    }
}

impl Credential for Wallet {
    fn address(&self) -> Address {
        self.address
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Reads `CONTRIBUTOR_PK_1`, `CONTRIBUTOR_PK_2`, ... until the first missing
/// index. At least one key is required.
pub fn contributor_wallets<F>(lookup: F) -> Result<Vec<Wallet>, ClientError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut wallets = Vec::new();
    for index in 1.. {
        let name = format!("{CONTRIBUTOR_KEY_PREFIX}{index}");
        let Some(value) = lookup(&name) else {
            break;
        };
        let wallet = Wallet::from_hex(&value).map_err(|err| ClientError::Config(format!("{name}: {err}")))?;
        wallets.push(wallet);
    }
    if wallets.is_empty() {
        return Err(ClientError::Config(format!(
            "no participant keys; set {CONTRIBUTOR_KEY_PREFIX}1.."
        )));
    }
    Ok(wallets)
}

fn typed_payload(rlp: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + rlp.len());
    out.push(EIP1559_TX_TYPE);
    out.extend_from_slice(rlp);
    out
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

#[cfg(test)]
mod tests {
    use super::{contributor_wallets, Eip1559Tx, Wallet};
    use crate::address::Address;
    use crate::error::ClientError;
    use crate::net::rpc::keccak256;
    use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
    use rlp::Rlp;
    use std::collections::HashMap;

    const ANVIL_KEY_0: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn left_pad_32(bytes: &[u8]) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[32 - bytes.len()..].copy_from_slice(bytes);
        out
    }

    #[test]
    fn address_from_known_keys() {
        let one = Wallet::from_hex(&format!("{:064x}", 1)).unwrap();
        assert_eq!(
            one.address().to_string(),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
        let anvil = Wallet::from_hex(ANVIL_KEY_0).unwrap();
        assert_eq!(
            anvil.address().to_string(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
        assert!(Wallet::from_hex("0x1234").is_err());
        assert!(!format!("{anvil:?}").contains("ac0974"));
    }

    #[test]
    fn signed_tx_recovers_sender() {
        let wallet = Wallet::from_hex(ANVIL_KEY_0).unwrap();
        let tx = Eip1559Tx {
            chain_id: 31_337,
            nonce: 4,
            max_priority_fee_per_gas: 1_000_000_000,
            max_fee_per_gas: 3_000_000_000,
            gas_limit: 20_000_000,
            to: Address([0xaa; 20]),
            value: 0,
            input: vec![0x09, 0x5e, 0xa7, 0xb3, 0x00],
        };
        let signed = wallet.sign(&tx).unwrap();
        assert_eq!(signed.raw[0], 0x02);
        assert_eq!(signed.hash, format!("0x{}", hex::encode(keccak256(&signed.raw))));

        let rlp = Rlp::new(&signed.raw[1..]);
        assert_eq!(rlp.item_count().unwrap(), 12);
        let chain_id: u64 = rlp.val_at(0).unwrap();
        let nonce: u64 = rlp.val_at(1).unwrap();
        let gas_limit: u64 = rlp.val_at(4).unwrap();
        let to: Vec<u8> = rlp.val_at(5).unwrap();
        let input: Vec<u8> = rlp.val_at(7).unwrap();
        assert_eq!(chain_id, 31_337);
        assert_eq!(nonce, 4);
        assert_eq!(gas_limit, 20_000_000);
        assert_eq!(to, vec![0xaa; 20]);
        assert_eq!(input, tx.input);

        let y_parity: u8 = rlp.val_at(9).unwrap();
        let r: Vec<u8> = rlp.val_at(10).unwrap();
        let s: Vec<u8> = rlp.val_at(11).unwrap();
        let sig = Signature::from_scalars(left_pad_32(&r), left_pad_32(&s)).unwrap();
        let recid = RecoveryId::from_byte(y_parity).unwrap();
        let vk = VerifyingKey::recover_from_prehash(&tx.signing_hash(), &sig, recid).unwrap();
        let point = vk.to_encoded_point(false);
        let digest = keccak256(&point.as_bytes()[1..]);
        assert_eq!(&digest[12..], &wallet.address().0);
    }

    #[test]
    fn wallets_read_until_first_gap() {
        let mut env = HashMap::new();
        env.insert("CONTRIBUTOR_PK_1".to_string(), ANVIL_KEY_0.to_string());
        env.insert("CONTRIBUTOR_PK_2".to_string(), format!("{:064x}", 1));
        env.insert("CONTRIBUTOR_PK_4".to_string(), format!("{:064x}", 2));
        let wallets = contributor_wallets(|name| env.get(name).cloned()).unwrap();
        assert_eq!(wallets.len(), 2);

        let empty = contributor_wallets(|_| None);
        assert!(matches!(empty, Err(ClientError::Config(_))));

        env.insert("CONTRIBUTOR_PK_3".to_string(), "zz".to_string());
        let bad = contributor_wallets(|name| env.get(name).cloned());
        assert!(matches!(bad, Err(ClientError::Config(msg)) if msg.contains("CONTRIBUTOR_PK_3")));
    }
}
