//! Round directory: statically configured off-chain rounds followed by the
//! rounds registered on-chain by the factory.

use crate::address::Address;
use crate::contract::RoundRegistry;
use crate::error::ClientError;
use serde::{Deserialize, Serialize};

/// Gateway used to render off-chain round descriptors when none is configured.
pub const DEFAULT_IPFS_GATEWAY: &str = "https://ipfs.io";

/// One entry of the round directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundReference {
    /// Ordinal, continuous across off-chain and on-chain entries.
    pub index: usize,
    /// Round contract; `None` for references that only exist off-chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    /// External descriptor for off-chain references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Off-chain round references, listed before anything on-chain.
#[derive(Debug, Clone, Default)]
pub struct OffchainRounds {
    /// IPFS gateway base URL without a trailing slash.
    pub gateway: String,
    /// Descriptor content hashes in display order.
    pub hashes: Vec<String>,
}

impl OffchainRounds {
    /// Builds the set with the default gateway.
    pub fn new(hashes: Vec<String>) -> Self {
        Self {
            gateway: DEFAULT_IPFS_GATEWAY.to_string(),
            hashes,
        }
    }

    fn url_for(&self, hash: &str) -> String {
        format!("{}/ipfs/{}", self.gateway.trim_end_matches('/'), hash.trim())
    }
}

/// Result of a directory query; the off-chain part is always present.
#[derive(Debug, Clone)]
pub struct RoundListing {
    /// Resolved references, off-chain first.
    pub rounds: Vec<RoundReference>,
    /// Set when the on-chain part could not be fetched.
    pub unavailable: Option<ClientError>,
}

impl RoundListing {
    /// Whether the on-chain part was fetched.
    pub fn is_complete(&self) -> bool {
        self.unavailable.is_none()
    }

    /// Returns the rounds, or `DirectoryUnavailable` if the listing is partial.
    pub fn into_complete(self) -> Result<Vec<RoundReference>, ClientError> {
        match self.unavailable {
            Some(err) => Err(err),
            None => Ok(self.rounds),
        }
    }

    /// Finds the reference of an on-chain round.
    pub fn find(&self, address: &Address) -> Option<&RoundReference> {
        self.rounds
            .iter()
            .find(|round| round.address.as_ref() == Some(address))
    }
}

/// Lists every known round.
pub async fn list_rounds<R: RoundRegistry>(registry: &R, offchain: &OffchainRounds) -> RoundListing {
    let mut rounds = offchain
        .hashes
        .iter()
        .enumerate()
        .map(|(index, hash)| RoundReference {
            index,
            address: None,
            url: Some(offchain.url_for(hash)),
        })
        .collect::<Vec<_>>();

    let unavailable = match registry.registered_rounds().await {
        Ok(onchain) => {
            for address in onchain {
                rounds.push(RoundReference {
                    index: rounds.len(),
                    address: Some(address),
                    url: None,
                });
            }
            None
        }
        Err(err) => {
            eprintln!(
                "round directory: on-chain listing for factory {} failed: {err}",
                registry.address()
            );
            Some(ClientError::DirectoryUnavailable(err.to_string()))
        }
    };

    println!(
        "QSYS|mod=DIRECTORY|evt=LISTED|factory={}|offchain={}|total={}|complete={}",
        registry.address(),
        offchain.hashes.len(),
        rounds.len(),
        unavailable.is_none()
    );
    RoundListing {
        rounds,
        unavailable,
    }
}

/// Resolves the factory's current round and its directory entry.
///
/// A round missing from a complete listing still gets a reference appended at
/// the next ordinal, so freshly deployed rounds are usable before indexers
/// catch up.
pub async fn resolve_current_round<R: RoundRegistry>(
    registry: &R,
    offchain: &OffchainRounds,
) -> Result<RoundReference, ClientError> {
    let current = registry.current_round().await?;
    if current.is_zero() {
        return Err(ClientError::Config(format!(
            "factory {} has no current round",
            registry.address()
        )));
    }
    let listing = list_rounds(registry, offchain).await;
    if let Some(found) = listing.find(&current) {
        return Ok(found.clone());
    }
    let rounds = listing.into_complete()?;
    Ok(RoundReference {
        index: rounds.len(),
        address: Some(current),
        url: None,
    })
}

#[cfg(test)]
mod tests {
    use super::{list_rounds, resolve_current_round, OffchainRounds};
    use crate::address::Address;
    use crate::contract::mock::{block_on, MockRegistry};
    use crate::error::ClientError;

    fn offchain() -> OffchainRounds {
        OffchainRounds {
            gateway: "https://gw.example/".to_string(),
            hashes: vec!["QmFirst".to_string(), "QmSecond".to_string()],
        }
    }

    #[test]
    fn offchain_first_with_continuous_ordinals() {
        let registry = MockRegistry {
            rounds: vec![Address([1; 20]), Address([2; 20]), Address([3; 20])],
            fail: false,
        };
        let listing = block_on(list_rounds(&registry, &offchain()));
        assert!(listing.is_complete());
        let rounds = listing.into_complete().unwrap();
        assert_eq!(rounds.len(), 5);
        for (expected, round) in rounds.iter().enumerate() {
            assert_eq!(round.index, expected);
        }
        assert_eq!(rounds[0].address, None);
        assert_eq!(
            rounds[0].url.as_deref(),
            Some("https://gw.example/ipfs/QmFirst")
        );
        assert_eq!(rounds[1].url.as_deref(), Some("https://gw.example/ipfs/QmSecond"));
        assert_eq!(rounds[2].address, Some(Address([1; 20])));
        assert_eq!(rounds[4].address, Some(Address([3; 20])));
    }

    #[test]
    fn remote_failure_keeps_offchain_entries() {
        let registry = MockRegistry {
            rounds: Vec::new(),
            fail: true,
        };
        let listing = block_on(list_rounds(&registry, &offchain()));
        assert_eq!(listing.rounds.len(), 2);
        assert!(matches!(
            listing.unavailable,
            Some(ClientError::DirectoryUnavailable(_))
        ));
        assert!(matches!(
            listing.into_complete(),
            Err(ClientError::DirectoryUnavailable(_))
        ));
    }

    #[test]
    fn current_round_resolves_to_its_ordinal() {
        let registry = MockRegistry {
            rounds: vec![Address([1; 20]), Address([2; 20])],
            fail: false,
        };
        let round = block_on(resolve_current_round(&registry, &offchain())).unwrap();
        assert_eq!(round.index, 3);
        assert_eq!(round.address, Some(Address([2; 20])));
    }
}
