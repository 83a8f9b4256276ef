//! Ethereum JSON-RPC bindings for the round collaborators.
//!
//! Gated behind the `net` Cargo feature. Everything above this module talks
//! to the chain through [`RoundContract`](crate::contract::RoundContract) and
//! [`RoundRegistry`](crate::contract::RoundRegistry); these types are the
//! production implementations of those seams.

#![cfg(feature = "net")]

/// Solidity ABI encoding for the consumed calls and events.
pub mod abi;
/// Balance and registry reads.
pub mod account;
/// Round and factory bindings.
pub mod round;
/// JSON-RPC transport, receipts and logs.
pub mod rpc;
/// Wallets and EIP-1559 signing.
pub mod tx;

pub use account::{snapshot, AccountSnapshot};
pub use round::{RpcRegistry, RpcRound};
pub use rpc::{LogEntry, MinedReceipt, RpcClient, RpcConfig};
pub use tx::{contributor_wallets, Eip1559Tx, SignedTx, Wallet};
