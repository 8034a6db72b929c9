//! JSON-RPC ledger client
//!
//! Speaks JSON-RPC 2.0 over HTTP to a ledger node:
//!
//! | Method | Params | Result |
//! |---|---|---|
//! | `getProgramAccounts` | `{ "filter": "timeInvalidator" \| "usageInvalidator" }` | `[{ address, data }]` |
//! | `getMultipleAccounts` | `{ "kind": "escrow" \| "tokenAccount", "addresses": [...] }` | `[{ address, data } \| null]` |
//! | `getLedgerTime` | none | unix seconds |
//! | `sendOperation` | `[signed, { "commitment": ... }]` | receipt |
//!
//! An account whose `data` does not decode is returned as
//! [`Fetched::Malformed`] instead of failing the whole listing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use leasehold_ledger::{
    Commitment, Fetched, LedgerError, LedgerReader, LedgerWriter, OperationReceipt, SignedOperation,
    TokenAccount,
};
use leasehold_types::{
    EscrowId, EscrowRecord, LeaseholdError, TimeInvalidator, TokenAccountId, UnixTimestamp,
    UsageInvalidator,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{CrankError, Result};

/// Node refused an instruction; `data` carries the refusal
const OPERATION_REJECTED: i64 = -32002;
const SIGNATURE_VERIFICATION_FAILED: i64 = -32003;
const NODE_UNHEALTHY: i64 = -32005;
const ALREADY_PROCESSED: i64 = -32009;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RejectionData {
    index: usize,
    instruction: String,
    error: LeaseholdError,
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    address: String,
    data: Value,
}

/// Ledger reader and writer over JSON-RPC
#[derive(Debug)]
pub struct RpcLedger {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    next_id: AtomicU64,
}

impl RpcLedger {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(CrankError::configuration(format!("ledger url must be http(s): {}", url)));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CrankError::configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url,
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> leasehold_ledger::Result<T> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        debug!(method, id = request.id, "RPC call");

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(http_status_error(status.as_u16(), body));
        }

        let body: RpcResponse = response.json().await.map_err(|e| LedgerError::Serialization {
            message: format!("{} response: {}", method, e),
        })?;
        decode_response(method, body)
    }

    fn transport_error(&self, e: reqwest::Error) -> LedgerError {
        if e.is_timeout() {
            LedgerError::Timeout {
                after_ms: self.timeout.as_millis() as u64,
            }
        } else {
            LedgerError::Unavailable { message: e.to_string() }
        }
    }

    async fn list<T: DeserializeOwned>(&self, filter: &str) -> leasehold_ledger::Result<Vec<Fetched<T>>> {
        let raw: Vec<RawAccount> = self.call("getProgramAccounts", json!([{ "filter": filter }])).await?;
        Ok(raw.into_iter().map(decode_account).collect())
    }

    async fn get_multiple(&self, kind: &str, addresses: Vec<String>) -> leasehold_ledger::Result<Vec<Option<RawAccount>>> {
        let count = addresses.len();
        let raw: Vec<Option<RawAccount>> = self
            .call(
                "getMultipleAccounts",
                json!([{ "kind": kind, "addresses": addresses }]),
            )
            .await?;
        if raw.len() != count {
            return Err(LedgerError::Malformed {
                address: kind.to_string(),
                reason: format!("asked for {} accounts, got {}", count, raw.len()),
            });
        }
        Ok(raw)
    }
}

#[async_trait]
impl LedgerReader for RpcLedger {
    async fn list_time_invalidators(&self) -> leasehold_ledger::Result<Vec<Fetched<TimeInvalidator>>> {
        self.list("timeInvalidator").await
    }

    async fn list_usage_invalidators(&self) -> leasehold_ledger::Result<Vec<Fetched<UsageInvalidator>>> {
        self.list("usageInvalidator").await
    }

    async fn get_escrows(&self, ids: &[EscrowId]) -> leasehold_ledger::Result<Vec<Option<Fetched<EscrowRecord>>>> {
        let raw = self
            .get_multiple("escrow", ids.iter().map(ToString::to_string).collect())
            .await?;
        Ok(raw.into_iter().map(|account| account.map(decode_account)).collect())
    }

    async fn get_token_accounts(&self, ids: &[TokenAccountId]) -> leasehold_ledger::Result<Vec<Option<TokenAccount>>> {
        let raw = self
            .get_multiple("tokenAccount", ids.iter().map(ToString::to_string).collect())
            .await?;
        // An undecodable token account is treated as unresolved
        Ok(raw
            .into_iter()
            .map(|account| account.and_then(|a| decode_account::<TokenAccount>(a).into_data()))
            .collect())
    }

    async fn ledger_time(&self) -> leasehold_ledger::Result<UnixTimestamp> {
        self.call("getLedgerTime", json!([])).await
    }
}

#[async_trait]
impl LedgerWriter for RpcLedger {
    async fn submit(&self, operation: &SignedOperation, commitment: Commitment) -> leasehold_ledger::Result<OperationReceipt> {
        self.call("sendOperation", json!([operation, { "commitment": commitment }]))
            .await
    }
}

// =============================================================================
// Decoding
// =============================================================================

fn decode_account<T: DeserializeOwned>(raw: RawAccount) -> Fetched<T> {
    match serde_json::from_value(raw.data) {
        Ok(data) => Fetched::parsed(raw.address, data),
        Err(e) => {
            warn!(address = %raw.address, error = %e, "Account does not decode");
            Fetched::Malformed {
                address: raw.address,
                reason: e.to_string(),
            }
        }
    }
}

fn decode_response<T: DeserializeOwned>(method: &str, response: RpcResponse) -> leasehold_ledger::Result<T> {
    if let Some(error) = response.error {
        return Err(rpc_error(error));
    }
    let result = response.result.unwrap_or(Value::Null);
    serde_json::from_value(result).map_err(|e| LedgerError::Serialization {
        message: format!("{} result: {}", method, e),
    })
}

fn rpc_error(error: RpcErrorObject) -> LedgerError {
    match error.code {
        OPERATION_REJECTED => match error
            .data
            .and_then(|data| serde_json::from_value::<RejectionData>(data).ok())
        {
            Some(rejection) => LedgerError::Rejected {
                index: rejection.index,
                instruction: rejection.instruction,
                source: rejection.error,
            },
            None => LedgerError::Rpc {
                code: error.code,
                message: error.message,
            },
        },
        SIGNATURE_VERIFICATION_FAILED => LedgerError::InvalidSignature { reason: error.message },
        NODE_UNHEALTHY => LedgerError::Unavailable { message: error.message },
        ALREADY_PROCESSED => LedgerError::Duplicate { operation: error.message },
        code => LedgerError::Rpc {
            code,
            message: error.message,
        },
    }
}

fn http_status_error(status: u16, body: String) -> LedgerError {
    match status {
        429 | 500..=599 => LedgerError::Unavailable {
            message: format!("HTTP {}: {}", status, body),
        },
        _ => LedgerError::Rpc {
            code: i64::from(status),
            message: body,
        },
    }
}
