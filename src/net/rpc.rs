//! Ethereum JSON-RPC client: reads, log queries and the send-then-wait
//! transaction path shared by the round and registry bindings.

use crate::address::Address;
use crate::error::ChainError;
use crate::net::abi;
use crate::net::tx::{Eip1559Tx, Wallet};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use sha3::{Digest, Keccak256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time;

/// Per-request HTTP timeout unless configured.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
/// Delay between receipt polls unless configured.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_PRIORITY_FEE: u128 = 1_000_000_000;
const GAS_HEADROOM_NUM: u64 = 6;
const GAS_HEADROOM_DEN: u64 = 5;

/// Endpoint settings.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// HTTP(S) JSON-RPC endpoint.
    pub url: String,
    /// Timeout of reads and receipt polls. Broadcasts are not bounded.
    pub request_timeout: Duration,
    /// Delay between receipt polls.
    pub poll_interval: Duration,
}

impl RpcConfig {
    /// Config with default timeouts.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// A log entry of a mined transaction or an `eth_getLogs` query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Emitting contract.
    pub address: Address,
    /// Indexed topics, `topic0` first.
    pub topics: Vec<[u8; 32]>,
    /// Non-indexed payload.
    pub data: Vec<u8>,
    /// Block the log was emitted in.
    pub block_number: u64,
}

/// Receipt of a mined transaction, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinedReceipt {
    /// Transaction hash.
    pub tx_hash: String,
    /// Inclusion block.
    pub block_number: u64,
    /// Gas consumed.
    pub gas_used: u64,
    /// `false` when the transaction reverted.
    pub success: bool,
    /// Emitted logs in order.
    pub logs: Vec<LogEntry>,
}

impl MinedReceipt {
    /// Logs emitted by `address` whose `topic0` is `topic`.
    pub fn logs_for<'a>(
        &'a self,
        address: &'a Address,
        topic: &'a [u8; 32],
    ) -> impl Iterator<Item = &'a LogEntry> + 'a {
        self.logs
            .iter()
            .filter(move |log| log.address == *address && log.topics.first() == Some(topic))
    }
}

/// JSON-RPC client bound to one chain.
#[derive(Debug)]
pub struct RpcClient {
    http: Client,
    url: String,
    chain_id: u64,
    request_timeout: Duration,
    poll_interval: Duration,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Builds the HTTP client and reads `eth_chainId`.
    pub async fn connect(cfg: &RpcConfig) -> Result<Self, ChainError> {
        let http = Client::builder()
            .build()
            .map_err(|err| ChainError::Transport(format!("http client error: {err}")))?;
        let mut client = Self {
            http,
            url: cfg.url.clone(),
            chain_id: 0,
            request_timeout: cfg.request_timeout,
            poll_interval: cfg.poll_interval,
            next_id: AtomicU64::new(1),
        };
        let chain_id = client.call("eth_chainId", json!([])).await?;
        client.chain_id = quantity_u64(&chain_id)?;
        println!(
            "QSYS|mod=RPC|evt=CONNECTED|url={}|chain_id={}",
            client.url, client.chain_id
        );
        Ok(client)
    }

    /// Chain id reported by the endpoint at connect time.
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Raw JSON-RPC call returning the `result` member, bounded by the
    /// configured request timeout.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        self.request(method, params, Some(self.request_timeout)).await
    }

    async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let mut builder = self.http.post(&self.url).json(&payload);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let resp = builder
            .send()
            .await
            .map_err(|err| ChainError::Transport(format!("{method} request failed: {err}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ChainError::Transport(format!(
                "{method} status {status}: {body}"
            )));
        }
        let value: Value = resp
            .json()
            .await
            .map_err(|err| ChainError::Transport(format!("{method} decode failed: {err}")))?;
        parse_response(value)
    }

    /// `eth_call` against the latest block.
    pub async fn eth_call(&self, to: Address, data: &[u8]) -> Result<Vec<u8>, ChainError> {
        let result = self
            .call(
                "eth_call",
                json!([{ "to": to.to_string(), "data": hex_prefixed(data) }, "latest"]),
            )
            .await?;
        hex_value(&result)
    }

    /// Native balance in wei.
    pub async fn balance(&self, address: Address) -> Result<u128, ChainError> {
        let result = self
            .call("eth_getBalance", json!([address.to_string(), "latest"]))
            .await?;
        quantity_u128(&result)
    }

    /// Logs emitted by `address` with `topic0`, from `from_block` to latest.
    pub async fn logs(
        &self,
        address: Address,
        topic: [u8; 32],
        from_block: u64,
    ) -> Result<Vec<LogEntry>, ChainError> {
        let result = self
            .call(
                "eth_getLogs",
                json!([{
                    "address": address.to_string(),
                    "topics": [hex_prefixed(&topic)],
                    "fromBlock": to_quantity_u64(from_block),
                    "toBlock": "latest",
                }]),
            )
            .await?;
        result
            .as_array()
            .ok_or_else(|| ChainError::Decode("eth_getLogs result is not an array".to_string()))?
            .iter()
            .map(parse_log)
            .collect()
    }

    /// Signs, broadcasts and waits for a contract call from `wallet`.
    ///
    /// Without `gas_limit` the node's estimate plus a fifth is used. A mined
    /// revert is replayed with `eth_call` at its block to recover the reason.
    pub async fn transact(
        &self,
        wallet: &Wallet,
        to: Address,
        input: Vec<u8>,
        gas_limit: Option<u64>,
    ) -> Result<MinedReceipt, ChainError> {
        let from = wallet.address();
        let nonce = quantity_u64(
            &self
                .call(
                    "eth_getTransactionCount",
                    json!([from.to_string(), "pending"]),
                )
                .await?,
        )?;
        let (max_priority_fee_per_gas, max_fee_per_gas) = self.fee_caps().await?;
        let gas_limit = match gas_limit {
            Some(limit) => limit,
            None => self.estimate_gas(from, to, &input).await?,
        };
        let tx = Eip1559Tx {
            chain_id: self.chain_id,
            nonce,
            max_priority_fee_per_gas,
            max_fee_per_gas,
            gas_limit,
            to,
            value: 0,
            input,
        };
        let signed = wallet.sign(&tx)?;
        // Once broadcast a transaction cannot be withdrawn, so the send is not timed out.
        let sent = self
            .request(
                "eth_sendRawTransaction",
                json!([hex_prefixed(&signed.raw)]),
                None,
            )
            .await?;
        let tx_hash = sent
            .as_str()
            .map(ToString::to_string)
            .unwrap_or_else(|| signed.hash.clone());
        println!(
            "QSYS|mod=RPC|evt=SENT|from={from}|to={to}|nonce={nonce}|gas_limit={gas_limit}|tx={tx_hash}"
        );

        let receipt = self.wait_for_receipt(&tx_hash).await?;
        if !receipt.success {
            let reason = self.revert_reason(from, &tx, receipt.block_number).await;
            eprintln!("transaction {tx_hash} reverted in block {}: {reason}", receipt.block_number);
            return Err(ChainError::Reverted { tx_hash, reason });
        }
        println!(
            "QSYS|mod=RPC|evt=MINED|tx={tx_hash}|block={}|gas_used={}|logs={}",
            receipt.block_number,
            receipt.gas_used,
            receipt.logs.len()
        );
        Ok(receipt)
    }

    /// Polls until the transaction is mined. There is no overall deadline.
    ///
    /// A poll that times out or cannot reach the node counts as "not mined
    /// yet"; only a receipt or a JSON-RPC error ends the wait.
    pub async fn wait_for_receipt(&self, tx_hash: &str) -> Result<MinedReceipt, ChainError> {
        loop {
            match self
                .call("eth_getTransactionReceipt", json!([tx_hash]))
                .await
            {
                Ok(value) if !value.is_null() => return parse_receipt(&value),
                Ok(_) => {}
                Err(ChainError::Transport(err)) => {
                    println!("QSYS|mod=RPC|evt=POLL_RETRY|tx={tx_hash}|err={err}");
                }
                Err(err) => return Err(err),
            }
            time::sleep(self.poll_interval).await;
        }
    }

    async fn fee_caps(&self) -> Result<(u128, u128), ChainError> {
        let priority = match self.call("eth_maxPriorityFeePerGas", json!([])).await {
            Ok(value) => quantity_u128(&value)?,
            Err(ChainError::Rpc { .. }) => DEFAULT_PRIORITY_FEE,
            Err(err) => return Err(err),
        };
        let block = self
            .call("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        let base_fee = match block.get("baseFeePerGas") {
            Some(value) if !value.is_null() => quantity_u128(value)?,
            _ => 0,
        };
        Ok((priority, base_fee.saturating_mul(2).saturating_add(priority)))
    }

    async fn estimate_gas(&self, from: Address, to: Address, input: &[u8]) -> Result<u64, ChainError> {
        let value = self
            .call(
                "eth_estimateGas",
                json!([{
                    "from": from.to_string(),
                    "to": to.to_string(),
                    "data": hex_prefixed(input),
                }]),
            )
            .await?;
        let estimate = quantity_u64(&value)?;
        Ok(estimate.saturating_mul(GAS_HEADROOM_NUM) / GAS_HEADROOM_DEN)
    }

    async fn revert_reason(&self, from: Address, tx: &Eip1559Tx, block: u64) -> String {
        let replay = self
            .call(
                "eth_call",
                json!([
                    {
                        "from": from.to_string(),
                        "to": tx.to.to_string(),
                        "data": hex_prefixed(&tx.input),
                        "gas": to_quantity_u64(tx.gas_limit),
                    },
                    to_quantity_u64(block)
                ]),
            )
            .await;
        match replay {
            Err(ChainError::Rpc { message, .. }) => message,
            Err(err) => format!("reason unavailable: {err}"),
            Ok(_) => "reverted without reason (possibly out of gas)".to_string(),
        }
    }
}

fn parse_response(value: Value) -> Result<Value, ChainError> {
    let resp: JsonRpcResponse = serde_json::from_value(value)
        .map_err(|err| ChainError::Transport(format!("malformed json-rpc response: {err}")))?;
    if let Some(error) = resp.error {
        let reason = error
            .data
            .as_ref()
            .and_then(Value::as_str)
            .and_then(|data| decode_hex_prefixed(data).ok())
            .and_then(|bytes| abi::decode_revert_reason(&bytes));
        let message = match reason {
            Some(reason) => format!("{}: {reason}", error.message),
            None => error.message,
        };
        return Err(ChainError::Rpc {
            code: error.code,
            message,
        });
    }
    Ok(resp.result.unwrap_or(Value::Null))
}

fn parse_receipt(value: &Value) -> Result<MinedReceipt, ChainError> {
    let tx_hash = field_str(value, "transactionHash")?.to_string();
    let status = match value.get("status") {
        Some(status) if !status.is_null() => quantity_u64(status)?,
        _ => 1,
    };
    let logs = match value.get("logs").and_then(Value::as_array) {
        Some(logs) => logs.iter().map(parse_log).collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    Ok(MinedReceipt {
        tx_hash,
        block_number: quantity_u64(field(value, "blockNumber")?)?,
        gas_used: quantity_u64(field(value, "gasUsed")?)?,
        success: status == 1,
        logs,
    })
}

fn parse_log(value: &Value) -> Result<LogEntry, ChainError> {
    let address = Address::parse(field_str(value, "address")?).map_err(ChainError::Decode)?;
    let topics = field(value, "topics")?
        .as_array()
        .ok_or_else(|| ChainError::Decode("log topics is not an array".to_string()))?
        .iter()
        .map(|topic| {
            let bytes = hex_value(topic)?;
            <[u8; 32]>::try_from(bytes.as_slice())
                .map_err(|_| ChainError::Decode("log topic is not 32 bytes".to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let block_number = match value.get("blockNumber") {
        Some(number) if !number.is_null() => quantity_u64(number)?,
        _ => 0,
    };
    Ok(LogEntry {
        address,
        topics,
        data: hex_value(field(value, "data")?)?,
        block_number,
    })
}

fn field<'a>(value: &'a Value, name: &str) -> Result<&'a Value, ChainError> {
    value
        .get(name)
        .ok_or_else(|| ChainError::Decode(format!("missing field {name}")))
}

fn field_str<'a>(value: &'a Value, name: &str) -> Result<&'a str, ChainError> {
    field(value, name)?
        .as_str()
        .ok_or_else(|| ChainError::Decode(format!("field {name} is not a string")))
}

fn hex_value(value: &Value) -> Result<Vec<u8>, ChainError> {
    let text = value
        .as_str()
        .ok_or_else(|| ChainError::Decode("expected hex string".to_string()))?;
    decode_hex_prefixed(text)
}

/// Keccak-256 digest.
pub(crate) fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

pub(crate) fn hex_prefixed(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn decode_hex_prefixed(input: &str) -> Result<Vec<u8>, ChainError> {
    let trimmed = input.trim();
    let raw = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| ChainError::Decode("hex payload must start with 0x".to_string()))?;
    hex::decode(raw).map_err(|err| ChainError::Decode(format!("invalid hex payload: {err}")))
}

fn to_quantity_u64(value: u64) -> String {
    format!("0x{value:x}")
}

fn quantity_u64(value: &Value) -> Result<u64, ChainError> {
    let wide = quantity_u128(value)?;
    u64::try_from(wide).map_err(|_| ChainError::Decode(format!("quantity {wide} exceeds u64")))
}

fn quantity_u128(value: &Value) -> Result<u128, ChainError> {
    if let Some(v) = value.as_u64() {
        return Ok(v as u128);
    }
    let text = value
        .as_str()
        .ok_or_else(|| ChainError::Decode(format!("expected quantity, got {value}")))?;
    let raw = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .ok_or_else(|| ChainError::Decode(format!("quantity must start with 0x: {text}")))?;
    if raw.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(raw, 16).map_err(|err| ChainError::Decode(format!("invalid quantity {text}: {err}")))
}
