//! Chain access: bech32 addresses, batched sends and balance queries

use crate::config::ChainConfig;
use crate::error::{FaucetError, FaucetResult};
use async_trait::async_trait;
use bech32::{FromBase32, ToBase32, Variant};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};
use trickle_common::CoinSet;

/// Name under which the faucet key is imported into the signer
pub const FAUCET_KEY_NAME: &str = "faucet";

const RPC_TIMEOUT: Duration = Duration::from_secs(5);
const LCD_TIMEOUT: Duration = Duration::from_secs(2);
const DISPLAY_DECIMALS: u32 = 6;

/// Decoded bech32 account address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    prefix: String,
    bytes: Vec<u8>,
    encoded: String,
}

impl Address {
    /// Build an account address; the payload must be 20 or 32 bytes
    pub fn new(prefix: &str, bytes: Vec<u8>) -> FaucetResult<Self> {
        if bytes.len() != 20 && bytes.len() != 32 {
            return Err(FaucetError::MalformedAddress(format!(
                "invalid address length {}",
                bytes.len()
            )));
        }
        let encoded = bech32::encode(prefix, bytes.to_base32(), Variant::Bech32)
            .map_err(|e| FaucetError::MalformedAddress(e.to_string()))?;

        Ok(Self {
            prefix: prefix.to_string(),
            bytes,
            encoded,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

/// Hash of a broadcast transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRef(pub String);

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract the human readable part of a bech32 string.
///
/// A string that fails the checksum still yields its prefix so that the
/// request can be routed and then rejected as malformed by the chain.
pub fn address_prefix(raw: &str) -> FaucetResult<String> {
    let raw = raw.trim();
    match bech32::decode(raw) {
        Ok((hrp, _, _)) => Ok(hrp),
        Err(err) => match raw.rsplit_once('1') {
            Some((hrp, _)) if !hrp.is_empty() => Ok(hrp.to_lowercase()),
            _ => Err(FaucetError::UnsupportedChain(format!("{} ({})", raw, err))),
        },
    }
}

/// Decode `raw` as an account address of `expected_prefix`
pub fn decode_bech32_address(expected_prefix: &str, raw: &str) -> FaucetResult<Address> {
    let (hrp, data, variant) = bech32::decode(raw.trim())
        .map_err(|e| FaucetError::MalformedAddress(e.to_string()))?;

    if hrp != expected_prefix {
        return Err(FaucetError::MalformedAddress(format!(
            "invalid Bech32 prefix; expected {}, got {}",
            expected_prefix, hrp
        )));
    }
    if variant != Variant::Bech32 {
        return Err(FaucetError::MalformedAddress("unexpected bech32m encoding".into()));
    }

    let bytes = Vec::<u8>::from_base32(&data)
        .map_err(|e| FaucetError::MalformedAddress(e.to_string()))?;
    Address::new(&hrp, bytes)
}

/// Signing and broadcast backend for one chain
#[async_trait]
pub trait ChainSender: Send + Sync {
    /// Bech32 prefix of the chain
    fn prefix(&self) -> &str;

    /// Submit one multi-send transaction paying every transfer
    async fn send_batch(&self, transfers: &[(Address, CoinSet)], fees: &CoinSet)
        -> FaucetResult<TxRef>;

    fn decode_address(&self, raw: &str) -> FaucetResult<Address> {
        decode_bech32_address(self.prefix(), raw)
    }

    /// Human readable faucet balance
    async fn faucet_balance(&self) -> FaucetResult<String>;
}

#[derive(Debug, Deserialize)]
struct MultiSendResult {
    txhash: String,
    #[serde(default)]
    code: u32,
    #[serde(default)]
    raw_log: String,
}

#[derive(Debug, Deserialize)]
struct ImportKeyResult {
    address: String,
}

/// LCD `/cosmos/bank/v1beta1/balances` response
#[derive(Debug, Default, Deserialize)]
pub struct BalanceResponse {
    #[serde(default)]
    pub balances: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
pub struct BalanceEntry {
    pub denom: String,
    pub amount: String,
}

impl BalanceResponse {
    /// Amount of `denom` in display units, `NaN` when the denom is absent
    pub fn display_amount(&self, denom: &str) -> String {
        match self.balances.iter().find(|b| b.denom == denom) {
            Some(entry) => match entry.amount.parse::<u128>() {
                Ok(amount) => {
                    let scale = 10u128.pow(DISPLAY_DECIMALS);
                    format!(
                        "{}.{:0width$}",
                        amount / scale,
                        amount % scale,
                        width = DISPLAY_DECIMALS as usize
                    )
                }
                Err(_) => "error".to_string(),
            },
            None => "NaN".to_string(),
        }
    }
}

/// Display unit for a base denom, e.g. `uumee` -> `UMEE`
pub fn display_unit(denom: &str) -> String {
    denom.strip_prefix('u').unwrap_or(denom).to_uppercase()
}

/// JSON-RPC client for a chain's signer endpoint
pub struct RpcChainClient {
    config: ChainConfig,
    chain_id: String,
    faucet_address: String,
    client: reqwest::Client,
}

impl RpcChainClient {
    /// Resolve the chain id and import the faucet key
    pub async fn connect(config: ChainConfig, mnemonic: &str) -> FaucetResult<Self> {
        let client = reqwest::Client::builder().timeout(RPC_TIMEOUT).build()?;

        let chain_id = fetch_chain_id(&client, &config.rpc).await?;
        info!("Connected to {} (chain id {})", config.prefix, chain_id);

        let mut chain = Self {
            config,
            chain_id,
            faucet_address: String::new(),
            client,
        };

        let result = chain
            .call(
                "faucet_import_key",
                json!({
                    "key": FAUCET_KEY_NAME,
                    "coin_type": chain.config.coin_type,
                    "mnemonic": mnemonic,
                }),
            )
            .await?;
        let imported: ImportKeyResult = serde_json::from_value(result)
            .map_err(|e| FaucetError::RpcError(format!("Invalid import response: {}", e)))?;
        info!("{} faucet address: {}", chain.config.prefix, imported.address);
        chain.faucet_address = imported.address;

        Ok(chain)
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn faucet_address(&self) -> &str {
        &self.faucet_address
    }

    fn balance_denom(&self) -> String {
        self.config
            .balance_denom
            .clone()
            .unwrap_or_else(|| format!("u{}", self.config.prefix))
    }

    async fn call(&self, method: &str, params: Value) -> FaucetResult<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response = self
            .client
            .post(&self.config.rpc)
            .json(&payload)
            .send()
            .await
            .map_err(|e| FaucetError::RpcError(format!("Request failed: {}", e)))?;

        let json: Value = response
            .json()
            .await
            .map_err(|e| FaucetError::RpcError(format!("Invalid response: {}", e)))?;

        if let Some(error) = json.get("error") {
            return Err(FaucetError::RpcError(error.to_string()));
        }

        Ok(json.get("result").cloned().unwrap_or(Value::Null))
    }
}

async fn fetch_chain_id(client: &reqwest::Client, rpc: &str) -> FaucetResult<String> {
    let url = format!("{}/commit", rpc.trim_end_matches('/'));
    let response = client.get(&url).send().await?;
    if !response.status().is_success() {
        return Err(FaucetError::RpcError(format!(
            "could not get chain id; http error code received {}",
            response.status().as_u16()
        )));
    }

    let body: Value = response.json().await?;
    body.pointer("/result/signed_header/header/chain_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| FaucetError::RpcError(format!("no chain id in {} response", url)))
}

#[async_trait]
impl ChainSender for RpcChainClient {
    fn prefix(&self) -> &str {
        &self.config.prefix
    }

    async fn send_batch(
        &self,
        transfers: &[(Address, CoinSet)],
        fees: &CoinSet,
    ) -> FaucetResult<TxRef> {
        let outputs: Vec<Value> = transfers
            .iter()
            .map(|(address, coins)| {
                debug!(
                    "Multi sending {} from faucet address [{}] to recipient [{}]",
                    coins, self.faucet_address, address
                );
                json!({ "address": address.to_string(), "coins": coins.to_string() })
            })
            .collect();

        let result = self
            .call(
                "faucet_multi_send",
                json!({
                    "key": FAUCET_KEY_NAME,
                    "chain_id": self.chain_id,
                    "outputs": outputs,
                    "fees": fees.to_string(),
                }),
            )
            .await?;

        let sent: MultiSendResult = serde_json::from_value(result)
            .map_err(|e| FaucetError::RpcError(format!("Invalid multi-send response: {}", e)))?;
        if sent.code != 0 {
            return Err(FaucetError::TransactionFailed(format!(
                "code {}: {}",
                sent.code, sent.raw_log
            )));
        }

        Ok(TxRef(sent.txhash))
    }

    async fn faucet_balance(&self) -> FaucetResult<String> {
        let lcd = self.config.lcd.as_deref().ok_or_else(|| {
            FaucetError::RpcError(format!("no LCD endpoint configured for {}", self.config.prefix))
        })?;
        let url = format!(
            "{}/cosmos/bank/v1beta1/balances/{}",
            lcd.trim_end_matches('/'),
            self.faucet_address
        );

        let response = self
            .client
            .get(&url)
            .timeout(LCD_TIMEOUT)
            .send()
            .await
            .map_err(|e| FaucetError::RpcError(format!("failed to query LCD: {}", e)))?;
        let balances: BalanceResponse = response
            .json()
            .await
            .map_err(|e| FaucetError::RpcError(format!("failed to parse LCD response: {}", e)))?;

        let denom = self.balance_denom();
        Ok(format!(
            "{} {}",
            balances.display_amount(&denom),
            display_unit(&denom)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(prefix: &str, len: usize) -> String {
        let bytes: Vec<u8> = (0..len as u8).collect();
        bech32::encode(prefix, bytes.to_base32(), Variant::Bech32).unwrap()
    }

    #[test]
    fn test_decode_account_address() {
        let raw = encode("umee", 20);
        let address = decode_bech32_address("umee", &raw).unwrap();
        assert_eq!(address.prefix(), "umee");
        assert_eq!(address.as_bytes().len(), 20);
        assert_eq!(address.to_string(), raw);

        let raw = encode("umee", 32);
        assert!(decode_bech32_address("umee", &raw).is_ok());
    }

    #[test]
    fn test_decode_rejects_wrong_length_and_prefix() {
        let raw = encode("umee", 19);
        assert!(matches!(
            decode_bech32_address("umee", &raw),
            Err(FaucetError::MalformedAddress(_))
        ));

        let raw = encode("osmo", 20);
        assert!(matches!(
            decode_bech32_address("umee", &raw),
            Err(FaucetError::MalformedAddress(_))
        ));
    }

    #[test]
    fn test_address_prefix() {
        assert_eq!(address_prefix(&encode("umee", 20)).unwrap(), "umee");

        // Broken checksum still routes on the prefix
        let mut raw = encode("umee", 20);
        let last = raw.pop().unwrap();
        raw.push(if last == 'q' { 'p' } else { 'q' });
        assert_eq!(address_prefix(&raw).unwrap(), "umee");

        assert!(matches!(
            address_prefix("not-an-address"),
            Err(FaucetError::UnsupportedChain(_))
        ));
    }

    #[test]
    fn test_balance_display() {
        let response: BalanceResponse = serde_json::from_str(
            r#"{"balances":[{"denom":"uumee","amount":"12500000"},{"denom":"uatom","amount":"7"}],"pagination":{"next_key":null,"total":"2"}}"#,
        )
        .unwrap();
        assert_eq!(response.display_amount("uumee"), "12.500000");
        assert_eq!(response.display_amount("uatom"), "0.000007");
        assert_eq!(response.display_amount("uosmo"), "NaN");
        assert_eq!(display_unit("uumee"), "UMEE");
        assert_eq!(display_unit("stake"), "STAKE");
    }
}
