//! Message sealing seam and the devnet cipher.
//!
//! A MACI message is a signed command encrypted to the coordinator. The
//! production encoding (Poseidon encryption, EdDSA-Poseidon signatures) belongs
//! to the MACI domain objects and is plugged in through [`MessageCipher`].
//! [`DevnetCipher`] keeps the same shape (ten `uint256` data words plus an IV,
//! ECDH with an ephemeral-per-message key, Schnorr signature over BabyJubJub) but
//! uses Keccak for hashing and a XOR keystream, so coordinator circuits cannot
//! process its output. It exists for local chains and tests.

use crate::error::ClientError;
use crate::keys::{field_to_word, scalar_to_word, Keypair, PubKey};
use ark_ec::{AffineRepr, CurveGroup};
use ark_ed_on_bn254::{EdwardsAffine, Fr};
use ark_ff::PrimeField;
use blake2::{Blake2b512, Digest};
use sha3::Keccak256;

/// Number of `uint256` words in an encrypted message body.
pub const MESSAGE_DATA_WORDS: usize = 10;

/// Chain ids of local development nodes (Ganache, Hardhat/Anvil).
pub const DEVNET_CHAIN_IDS: [u64; 2] = [1_337, 31_337];

/// Whether [`DevnetCipher`] output may be submitted on `chain_id` without an
/// explicit operator override.
pub fn is_devnet_chain(chain_id: u64) -> bool {
    DEVNET_CHAIN_IDS.contains(&chain_id)
}

const CIPHER_KEY_DOMAIN: &[u8] = b"clrfund-devnet-cipher-key-v1";
const CIPHER_IV_DOMAIN: &[u8] = b"clrfund-devnet-cipher-iv-v1";
const SIGNATURE_NONCE_DOMAIN: &[u8] = b"clrfund-devnet-schnorr-nonce-v1";

/// Plaintext of one MACI message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Sender's state index.
    pub state_index: u64,
    /// Key the sender will be known by after this command is processed.
    pub new_public_key: PubKey,
    /// Recipient (vote option); zero for a pure key change.
    pub vote_option_index: u64,
    /// Vote weight; zero for a pure key change.
    pub new_vote_weight: u128,
    /// Per-participant message nonce.
    pub nonce: u64,
    /// Random salt.
    pub salt: [u8; 32],
}

impl Command {
    /// The seven command words in contract order.
    pub fn words(&self) -> [[u8; 32]; 7] {
        let (x, y) = self.new_public_key.coordinates();
        [
            u64_word(self.state_index),
            x,
            y,
            u64_word(self.vote_option_index),
            u128_word(self.new_vote_weight),
            u64_word(self.nonce),
            self.salt,
        ]
    }

    fn hash(&self) -> [u8; 32] {
        let mut hasher = Keccak256::new();
        for word in self.words() {
            hasher.update(word);
        }
        hasher.finalize().into()
    }
}

/// Encrypted message in the `{iv, data[10]}` shape consumed by the round contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedMessage {
    /// Initialisation vector.
    pub iv: [u8; 32],
    /// Ciphertext words.
    pub data: [[u8; 32]; MESSAGE_DATA_WORDS],
}

/// Schnorr signature over a command hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSignature {
    /// Commitment point.
    pub r: EdwardsAffine,
    /// Response scalar.
    pub s: Fr,
}

/// Seals commands into contract-ready messages.
pub trait MessageCipher {
    /// Signs `command` with `signer` and encrypts it to `coordinator` under a
    /// shared key derived from `encryption`. The public half of `encryption` is
    /// the message's issuing key.
    fn seal(
        &self,
        command: &Command,
        signer: &Keypair,
        encryption: &Keypair,
        coordinator: &PubKey,
    ) -> Result<EncryptedMessage, ClientError>;
}

/// Keccak/ECDH cipher for devnets; see the module documentation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DevnetCipher;

impl DevnetCipher {
    /// Coordinator-side inverse of [`MessageCipher::seal`].
    pub fn open(
        &self,
        message: &EncryptedMessage,
        encryption_key: &PubKey,
        coordinator: &Keypair,
    ) -> Result<(Command, CommandSignature), ClientError> {
        let key = shared_key(&coordinator.ecdh(encryption_key));
        let mut plain = [[0u8; 32]; MESSAGE_DATA_WORDS];
        for (idx, word) in message.data.iter().enumerate() {
            plain[idx] = xor_word(word, &keystream_word(&key, &message.iv, idx));
        }
        let new_public_key =
            PubKey::from_coordinates(&plain[1], &plain[2]).map_err(ClientError::Cipher)?;
        let command = Command {
            state_index: word_u64(&plain[0])?,
            new_public_key,
            vote_option_index: word_u64(&plain[3])?,
            new_vote_weight: word_u128(&plain[4])?,
            nonce: word_u64(&plain[5])?,
            salt: plain[6],
        };
        let r = PubKey::from_coordinates(&plain[7], &plain[8])
            .map_err(ClientError::Cipher)?
            .point();
        let s = Fr::from_be_bytes_mod_order(&plain[9]);
        Ok((command, CommandSignature { r, s }))
    }

    /// Checks a command signature against the signer's public key.
    pub fn verify(&self, command: &Command, signature: &CommandSignature, signer: &PubKey) -> bool {
        let e = challenge(&signature.r, signer, &command.hash());
        let lhs = (EdwardsAffine::generator() * signature.s).into_affine();
        let rhs = (signer.point() * e + signature.r).into_affine();
        lhs == rhs
    }
}

impl MessageCipher for DevnetCipher {
    fn seal(
        &self,
        command: &Command,
        signer: &Keypair,
        encryption: &Keypair,
        coordinator: &PubKey,
    ) -> Result<EncryptedMessage, ClientError> {
        let signature = sign(command, signer);
        let words = command.words();
        let mut plain = [[0u8; 32]; MESSAGE_DATA_WORDS];
        plain[..7].copy_from_slice(&words);
        plain[7] = field_to_word(&signature.r.x);
        plain[8] = field_to_word(&signature.r.y);
        plain[9] = scalar_to_word(&signature.s);

        let key = shared_key(&encryption.ecdh(coordinator));
        let mut iv_hasher = Keccak256::new();
        iv_hasher.update(CIPHER_IV_DOMAIN);
        iv_hasher.update(command.salt);
        iv_hasher.update(u64_word(command.nonce));
        let iv: [u8; 32] = iv_hasher.finalize().into();

        let mut data = [[0u8; 32]; MESSAGE_DATA_WORDS];
        for (idx, word) in plain.iter().enumerate() {
            data[idx] = xor_word(word, &keystream_word(&key, &iv, idx));
        }
        Ok(EncryptedMessage { iv, data })
    }
}

fn sign(command: &Command, signer: &Keypair) -> CommandSignature {
    let digest = command.hash();
    let mut nonce_hasher = Blake2b512::new();
    nonce_hasher.update(SIGNATURE_NONCE_DOMAIN);
    nonce_hasher.update(signer.private.to_bytes());
    nonce_hasher.update(digest);
    let k = Fr::from_le_bytes_mod_order(&nonce_hasher.finalize());
    let r = (EdwardsAffine::generator() * k).into_affine();
    let e = challenge(&r, &signer.public, &digest);
    CommandSignature {
        r,
        s: k + e * signer.private.scalar(),
    }
}

fn challenge(r: &EdwardsAffine, signer: &PubKey, digest: &[u8; 32]) -> Fr {
    let (px, py) = signer.coordinates();
    let mut hasher = Keccak256::new();
    hasher.update(field_to_word(&r.x));
    hasher.update(field_to_word(&r.y));
    hasher.update(px);
    hasher.update(py);
    hasher.update(digest);
    Fr::from_be_bytes_mod_order(&hasher.finalize())
}

fn shared_key(point: &EdwardsAffine) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(CIPHER_KEY_DOMAIN);
    hasher.update(field_to_word(&point.x));
    hasher.update(field_to_word(&point.y));
    hasher.finalize().into()
}

fn keystream_word(key: &[u8; 32], iv: &[u8; 32], index: usize) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(key);
    hasher.update(iv);
    hasher.update((index as u32).to_be_bytes());
    hasher.finalize().into()
}

fn xor_word(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (idx, byte) in out.iter_mut().enumerate() {
        *byte = a[idx] ^ b[idx];
    }
    out
}

/// Big-endian `uint256` word holding a `u64`.
pub fn u64_word(value: u64) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[24..].copy_from_slice(&value.to_be_bytes());
    out
}

/// Big-endian `uint256` word holding a `u128`.
pub fn u128_word(value: u128) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[16..].copy_from_slice(&value.to_be_bytes());
    out
}

fn word_u64(word: &[u8; 32]) -> Result<u64, ClientError> {
    if word[..24].iter().any(|b| *b != 0) {
        return Err(ClientError::Cipher("word exceeds u64".to_string()));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&word[24..]);
    Ok(u64::from_be_bytes(buf))
}

fn word_u128(word: &[u8; 32]) -> Result<u128, ClientError> {
    if word[..16].iter().any(|b| *b != 0) {
        return Err(ClientError::Cipher("word exceeds u128".to_string()));
    }
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::{is_devnet_chain, Command, DevnetCipher, MessageCipher};
    use crate::keys::Keypair;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn command(pair: &Keypair) -> Command {
        Command {
            state_index: 4,
            new_public_key: pair.public,
            vote_option_index: 2,
            new_vote_weight: 142,
            nonce: 3,
            salt: [9u8; 32],
        }
    }

    #[test]
    fn coordinator_opens_and_verifies() {
        let mut rng = StdRng::seed_from_u64(21);
        let coordinator = Keypair::generate(&mut rng);
        let voter = Keypair::generate(&mut rng);
        let cmd = command(&voter);

        let sealed = DevnetCipher
            .seal(&cmd, &voter, &voter, &coordinator.public)
            .unwrap();
        let (opened, sig) = DevnetCipher
            .open(&sealed, &voter.public, &coordinator)
            .unwrap();
        assert_eq!(opened, cmd);
        assert!(DevnetCipher.verify(&opened, &sig, &voter.public));
    }

    #[test]
    fn wrong_encryption_key_does_not_open() {
        let mut rng = StdRng::seed_from_u64(22);
        let coordinator = Keypair::generate(&mut rng);
        let voter = Keypair::generate(&mut rng);
        let other = Keypair::generate(&mut rng);
        let sealed = DevnetCipher
            .seal(&command(&voter), &voter, &voter, &coordinator.public)
            .unwrap();
        let opened = DevnetCipher.open(&sealed, &other.public, &coordinator);
        match opened {
            Err(_) => {}
            Ok((cmd, _)) => assert_ne!(cmd, command(&voter)),
        }
    }

    #[test]
    fn devnet_chains_only() {
        assert!(is_devnet_chain(31_337));
        assert!(is_devnet_chain(1_337));
        assert!(!is_devnet_chain(1));
        assert!(!is_devnet_chain(100));
    }

    #[test]
    fn signature_binds_signer() {
        let mut rng = StdRng::seed_from_u64(23);
        let coordinator = Keypair::generate(&mut rng);
        let old = Keypair::generate(&mut rng);
        let new = Keypair::generate(&mut rng);
        let cmd = command(&new);
        let sealed = DevnetCipher.seal(&cmd, &old, &new, &coordinator.public).unwrap();
        let (opened, sig) = DevnetCipher.open(&sealed, &new.public, &coordinator).unwrap();
        assert!(DevnetCipher.verify(&opened, &sig, &old.public));
        assert!(!DevnetCipher.verify(&opened, &sig, &new.public));
    }
}
