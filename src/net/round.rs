//! JSON-RPC bindings of the funding round and its factory.

use crate::address::Address;
use crate::contract::{RoundContract, RoundRegistry, SignUpEvent, TxReceipt};
use crate::error::ChainError;
use crate::keys::PubKey;
use crate::net::abi;
use crate::net::rpc::{MinedReceipt, RpcClient};
use crate::net::tx::Wallet;
use crate::vote::VoteMessage;

/// A deployed funding round reached through `rpc`.
#[derive(Debug, Clone, Copy)]
pub struct RpcRound<'a> {
    rpc: &'a RpcClient,
    address: Address,
}

impl<'a> RpcRound<'a> {
    /// Binds the round contract at `address`.
    pub fn new(rpc: &'a RpcClient, address: Address) -> Self {
        Self { rpc, address }
    }

    async fn read_address(&self, target: Address, signature: &str) -> Result<Address, ChainError> {
        let data = self
            .rpc
            .eth_call(target, &abi::encode_call(signature, &[]))
            .await?;
        abi::decode_address(&data)
    }
}

fn tx_receipt(receipt: MinedReceipt) -> TxReceipt {
    TxReceipt {
        tx_hash: receipt.tx_hash,
        block_number: receipt.block_number,
        gas_used: receipt.gas_used,
    }
}

impl RoundContract for RpcRound<'_> {
    type Credential = Wallet;

    fn address(&self) -> Address {
        self.address
    }

    async fn native_token_address(&self) -> Result<Address, ChainError> {
        self.read_address(self.address, abi::NATIVE_TOKEN).await
    }

    async fn maci_address(&self) -> Result<Address, ChainError> {
        self.read_address(self.address, abi::MACI).await
    }

    async fn coordinator_public_key(&self) -> Result<PubKey, ChainError> {
        let maci = self.maci_address().await?;
        let data = self
            .rpc
            .eth_call(maci, &abi::encode_call(abi::COORDINATOR_PUB_KEY, &[]))
            .await?;
        abi::decode_pubkey(&data)
    }

    async fn approve(
        &self,
        signer: &Wallet,
        token: Address,
        spender: Address,
        amount: u128,
    ) -> Result<TxReceipt, ChainError> {
        let receipt = self
            .rpc
            .transact(signer, token, abi::encode_approve(spender, amount), None)
            .await?;
        Ok(tx_receipt(receipt))
    }

    async fn contribute(
        &self,
        signer: &Wallet,
        public_key: &PubKey,
        amount: u128,
    ) -> Result<SignUpEvent, ChainError> {
        let maci = self.maci_address().await?;
        let receipt = self
            .rpc
            .transact(
                signer,
                self.address,
                abi::encode_contribute(public_key, amount),
                None,
            )
            .await?;
        let topic = abi::event_topic(abi::SIGN_UP_EVENT);
        let log = receipt
            .logs_for(&maci, &topic)
            .next()
            .ok_or_else(|| ChainError::MissingEvent("SignUp".to_string()))?;
        let sign_up = abi::decode_sign_up(&log.data)?;
        if sign_up.public_key != *public_key {
            return Err(ChainError::Decode(format!(
                "SignUp in {} registered a different key",
                receipt.tx_hash
            )));
        }
        Ok(SignUpEvent {
            state_index: sign_up.state_index,
            voice_credit_balance: sign_up.voice_credit_balance,
            tx_hash: receipt.tx_hash.clone(),
        })
    }

    async fn submit_message_batch(
        &self,
        signer: &Wallet,
        messages: &[VoteMessage],
        gas_limit: u64,
    ) -> Result<TxReceipt, ChainError> {
        let receipt = self
            .rpc
            .transact(
                signer,
                self.address,
                abi::encode_submit_message_batch(messages),
                Some(gas_limit),
            )
            .await?;
        Ok(tx_receipt(receipt))
    }
}

/// The round factory reached through `rpc`.
#[derive(Debug, Clone, Copy)]
pub struct RpcRegistry<'a> {
    rpc: &'a RpcClient,
    address: Address,
    from_block: u64,
}

impl<'a> RpcRegistry<'a> {
    /// Binds the factory at `address`, scanning `RoundStarted` logs from `from_block`.
    pub fn new(rpc: &'a RpcClient, address: Address, from_block: u64) -> Self {
        Self {
            rpc,
            address,
            from_block,
        }
    }
}

impl RoundRegistry for RpcRegistry<'_> {
    fn address(&self) -> Address {
        self.address
    }

    async fn registered_rounds(&self) -> Result<Vec<Address>, ChainError> {
        let logs = self
            .rpc
            .logs(
                self.address,
                abi::event_topic(abi::ROUND_STARTED_EVENT),
                self.from_block,
            )
            .await?;
        logs.iter().map(|log| abi::decode_address(&log.data)).collect()
    }

    async fn current_round(&self) -> Result<Address, ChainError> {
        let data = self
            .rpc
            .eth_call(self.address, &abi::encode_call(abi::GET_CURRENT_ROUND, &[]))
            .await?;
        abi::decode_address(&data)
    }
}
