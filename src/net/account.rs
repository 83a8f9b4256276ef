//! Read-only account queries used by the operator before contributing.

use crate::address::Address;
use crate::error::ChainError;
use crate::net::abi;
use crate::net::rpc::RpcClient;
use serde::Serialize;

/// Balances and registration state of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountSnapshot {
    /// Queried account.
    pub address: Address,
    /// Native balance in wei.
    #[serde(serialize_with = "decimal")]
    pub ether_balance: u128,
    /// Contribution token balance in base units, when a token was given.
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "decimal_opt")]
    pub token_balance: Option<u128>,
    /// Whether the user registry verifies the account, when a registry was given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
}

/// ERC-20 `balanceOf(owner)`.
pub async fn token_balance(rpc: &RpcClient, token: Address, owner: Address) -> Result<u128, ChainError> {
    let data = rpc
        .eth_call(token, &abi::encode_call(abi::BALANCE_OF, &[owner.to_word()]))
        .await?;
    abi::decode_u128(&data)
}

/// `isVerifiedUser(user)` on the user registry.
pub async fn is_verified_user(
    rpc: &RpcClient,
    registry: Address,
    user: Address,
) -> Result<bool, ChainError> {
    let data = rpc
        .eth_call(registry, &abi::encode_call(abi::IS_VERIFIED_USER, &[user.to_word()]))
        .await?;
    abi::decode_bool(&data)
}

/// Reads the native balance and, when configured, the token balance and
/// verification status of `address`.
pub async fn snapshot(
    rpc: &RpcClient,
    address: Address,
    token: Option<Address>,
    user_registry: Option<Address>,
) -> Result<AccountSnapshot, ChainError> {
    let ether_balance = rpc.balance(address).await?;
    let token_balance = match token {
        Some(token) => Some(token_balance(rpc, token, address).await?),
        None => None,
    };
    let verified = match user_registry {
        Some(registry) => Some(is_verified_user(rpc, registry, address).await?),
        None => None,
    };
    Ok(AccountSnapshot {
        address,
        ether_balance,
        token_balance,
        verified,
    })
}

fn decimal<S: serde::Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

fn decimal_opt<S: serde::Serializer>(value: &Option<u128>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(value) => serializer.serialize_str(&value.to_string()),
        None => serializer.serialize_none(),
    }
}
