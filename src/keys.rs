//! BabyJubJub key material for MACI participants and coordinators.
//!
//! Keys live on the twisted Edwards curve embedded in the BN254 scalar field
//! (`ark-ed-on-bn254`). Their text form is `macisk.<hex>` / `macipk.<hex>` over
//! the canonical compressed encoding, which is what the session file stores.

use ark_ec::{AffineRepr, CurveGroup};
use ark_ed_on_bn254::{EdwardsAffine, Fq, Fr};
use ark_ff::{BigInteger, PrimeField, Zero};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use rand::{CryptoRng, RngCore};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const PRIVATE_PREFIX: &str = "macisk.";
const PUBLIC_PREFIX: &str = "macipk.";

/// Secret scalar of a participant or coordinator key pair.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivKey(Fr);

/// Public curve point of a key pair.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PubKey(EdwardsAffine);

/// Matching private and public key.
#[derive(Clone, PartialEq, Eq)]
pub struct Keypair {
    /// Secret half.
    pub private: PrivKey,
    /// Public half, derived from `private`.
    pub public: PubKey,
}

impl PrivKey {
    /// Wraps a raw scalar.
    pub fn from_scalar(scalar: Fr) -> Self {
        Self(scalar)
    }

    /// Underlying scalar.
    pub fn scalar(&self) -> Fr {
        self.0
    }

    /// Canonical 32-byte little-endian encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32);
        // Writing a field element into a Vec cannot fail.
        let _ = self.0.serialize_compressed(&mut out);
        out
    }

    /// Text form stored in the session file.
    pub fn serialize(&self) -> String {
        format!("{PRIVATE_PREFIX}{}", hex::encode(self.to_bytes()))
    }

    /// Parses the `macisk.` text form.
    pub fn unserialize(text: &str) -> Result<Self, String> {
        let raw = text
            .trim()
            .strip_prefix(PRIVATE_PREFIX)
            .ok_or_else(|| format!("private key must start with {PRIVATE_PREFIX}"))?;
        let bytes = hex::decode(raw).map_err(|err| format!("invalid private key hex: {err}"))?;
        let scalar = Fr::deserialize_compressed(bytes.as_slice())
            .map_err(|err| format!("invalid private key encoding: {err}"))?;
        if scalar.is_zero() {
            return Err("private key must be non-zero".to_string());
        }
        Ok(Self(scalar))
    }

    /// Public key obtained by multiplying the subgroup generator.
    pub fn public_key(&self) -> PubKey {
        PubKey((EdwardsAffine::generator() * self.0).into_affine())
    }
}

impl fmt::Debug for PrivKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivKey(<redacted>)")
    }
}

impl PubKey {
    /// Wraps an affine point that is already known to be valid.
    pub fn from_point(point: EdwardsAffine) -> Self {
        Self(point)
    }

    /// Underlying affine point.
    pub fn point(&self) -> EdwardsAffine {
        self.0
    }

    /// Builds a key from big-endian `uint256` coordinates as returned by contracts.
    pub fn from_coordinates(x: &[u8; 32], y: &[u8; 32]) -> Result<Self, String> {
        let point = EdwardsAffine::new_unchecked(
            Fq::from_be_bytes_mod_order(x),
            Fq::from_be_bytes_mod_order(y),
        );
        if !point.is_on_curve() {
            return Err("public key coordinates are not on the curve".to_string());
        }
        if !point.is_in_correct_subgroup_assuming_on_curve() {
            return Err("public key is outside the prime-order subgroup".to_string());
        }
        Ok(Self(point))
    }

    /// Big-endian `uint256` coordinates `(x, y)` as expected by contracts.
    pub fn coordinates(&self) -> ([u8; 32], [u8; 32]) {
        (field_to_word(&self.0.x), field_to_word(&self.0.y))
    }

    /// Canonical compressed encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32);
        let _ = self.0.serialize_compressed(&mut out);
        out
    }

    /// Text form stored in the session file.
    pub fn serialize(&self) -> String {
        format!("{PUBLIC_PREFIX}{}", hex::encode(self.to_bytes()))
    }

    /// Parses the `macipk.` text form.
    pub fn unserialize(text: &str) -> Result<Self, String> {
        let raw = text
            .trim()
            .strip_prefix(PUBLIC_PREFIX)
            .ok_or_else(|| format!("public key must start with {PUBLIC_PREFIX}"))?;
        let bytes = hex::decode(raw).map_err(|err| format!("invalid public key hex: {err}"))?;
        let point = EdwardsAffine::deserialize_compressed(bytes.as_slice())
            .map_err(|err| format!("invalid public key encoding: {err}"))?;
        Ok(Self(point))
    }
}

impl fmt::Debug for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PubKey({})", self.serialize())
    }
}

impl fmt::Display for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

impl FromStr for PubKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::unserialize(s)
    }
}

impl Keypair {
    /// Draws a fresh key pair from `rng`.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        loop {
            let mut wide = [0u8; 64];
            rng.fill_bytes(&mut wide);
            let scalar = Fr::from_le_bytes_mod_order(&wide);
            if !scalar.is_zero() {
                return Self::from_private(PrivKey(scalar));
            }
        }
    }

    /// Rebuilds the pair from its private half.
    pub fn from_private(private: PrivKey) -> Self {
        let public = private.public_key();
        Self { private, public }
    }

    /// Diffie-Hellman point shared between this key and `other`.
    pub fn ecdh(&self, other: &PubKey) -> EdwardsAffine {
        (other.0 * self.private.0).into_affine()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Big-endian 32-byte word of a base field element.
pub fn field_to_word(value: &Fq) -> [u8; 32] {
    left_pad_word(&value.into_bigint().to_bytes_be())
}

/// Big-endian 32-byte word of a scalar field element.
pub fn scalar_to_word(value: &Fr) -> [u8; 32] {
    left_pad_word(&value.into_bigint().to_bytes_be())
}

fn left_pad_word(bytes: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    let take = bytes.len().min(32);
    out[32 - take..].copy_from_slice(&bytes[bytes.len() - take..]);
    out
}

impl Serialize for PubKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&PubKey::serialize(self))
    }
}

impl<'de> Deserialize<'de> for PubKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        PubKey::unserialize(&text).map_err(de::Error::custom)
    }
}

impl Serialize for PrivKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&PrivKey::serialize(self))
    }
}

impl<'de> Deserialize<'de> for PrivKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        PrivKey::unserialize(&text).map_err(de::Error::custom)
    }
}
