//! Wallet RPC served to the renderer
//!
//! The renderer sends wallet requests over the data channel. Each request is answered with a
//! frame of the same kind carrying plain text: an address, a signature, a transaction hash or
//! a JSON call result. Failures are answered with the error text in the same frame kind.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec::{DecodeError, WalletFrame, WalletKind};
use crate::error::WebrtcError;

#[derive(Debug, Clone, PartialEq)]
pub enum WalletRequest {
    Account,
    Sign {
        message: String,
    },
    SendTx {
        tx: Value,
    },
    SetContract {
        addr: String,
        abi: Value,
    },
    RunContract {
        addr: String,
        function: String,
        args: Vec<Value>,
    },
}

#[derive(Deserialize)]
struct SetContractBody {
    addr: String,
    abi: Value,
}

#[derive(Deserialize)]
struct RunContractBody {
    addr: String,
    #[serde(rename = "fn")]
    function: String,
    #[serde(default)]
    args: Vec<Value>,
}

fn json_body<T: for<'de> Deserialize<'de>>(body: &str) -> Result<T, DecodeError> {
    serde_json::from_str(body).map_err(|e| DecodeError::InvalidJson(e.to_string()))
}

impl WalletRequest {
    pub fn kind(&self) -> WalletKind {
        match self {
            WalletRequest::Account => WalletKind::Account,
            WalletRequest::Sign { .. } => WalletKind::Sign,
            WalletRequest::SendTx { .. } => WalletKind::SendTx,
            WalletRequest::SetContract { .. } => WalletKind::SetContract,
            WalletRequest::RunContract { .. } => WalletKind::RunContract,
        }
    }

    pub fn from_frame(frame: &WalletFrame) -> Result<Self, DecodeError> {
        match frame.kind {
            WalletKind::Account => Ok(WalletRequest::Account),
            // A JSON string is unquoted, anything else is signed as is.
            WalletKind::Sign => Ok(WalletRequest::Sign {
                message: serde_json::from_str::<String>(&frame.body)
                    .unwrap_or_else(|_| frame.body.clone()),
            }),
            WalletKind::SendTx => Ok(WalletRequest::SendTx {
                tx: json_body(&frame.body)?,
            }),
            WalletKind::SetContract => {
                let body: SetContractBody = json_body(&frame.body)?;
                Ok(WalletRequest::SetContract {
                    addr: body.addr,
                    abi: body.abi,
                })
            }
            WalletKind::RunContract => {
                let body: RunContractBody = json_body(&frame.body)?;
                Ok(WalletRequest::RunContract {
                    addr: body.addr,
                    function: body.function,
                    args: body.args,
                })
            }
        }
    }

    /// Request frame as the renderer would send it.
    pub fn to_frame(&self) -> WalletFrame {
        let body = match self {
            WalletRequest::Account => String::new(),
            WalletRequest::Sign { message } => Value::from(message.as_str()).to_string(),
            WalletRequest::SendTx { tx } => tx.to_string(),
            WalletRequest::SetContract { addr, abi } => {
                serde_json::json!({ "addr": addr, "abi": abi }).to_string()
            }
            WalletRequest::RunContract {
                addr,
                function,
                args,
            } => serde_json::json!({ "addr": addr, "fn": function, "args": args }).to_string(),
        };
        WalletFrame::new(self.kind(), body)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WalletResponse {
    Account(String),
    Signature(String),
    TxHash(String),
    ContractSet,
    CallResult(Value),
    /// Best-effort diagnostic text, not a typed error.
    Failed { kind: WalletKind, reason: String },
}

impl WalletResponse {
    pub fn to_frame(&self) -> WalletFrame {
        match self {
            WalletResponse::Account(addr) => WalletFrame::new(WalletKind::Account, addr.as_str()),
            WalletResponse::Signature(sig) => WalletFrame::new(WalletKind::Sign, sig.as_str()),
            WalletResponse::TxHash(hash) => WalletFrame::new(WalletKind::SendTx, hash.as_str()),
            WalletResponse::ContractSet => WalletFrame::ack(WalletKind::SetContract),
            WalletResponse::CallResult(value) => {
                WalletFrame::new(WalletKind::RunContract, value.to_string())
            }
            WalletResponse::Failed { kind, reason } => WalletFrame::new(*kind, reason.as_str()),
        }
    }
}

/// The signing backend. Implementations talk to an actual wallet.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    async fn address(&self) -> anyhow::Result<String>;

    async fn sign_message(&self, message: &str) -> anyhow::Result<String>;

    /// Returns the transaction hash.
    async fn send_transaction(&self, tx: &Value) -> anyhow::Result<String>;

    async fn call_contract(
        &self,
        address: &str,
        abi: &Value,
        function: &str,
        args: &[Value],
    ) -> anyhow::Result<Value>;
}

/// Provider for hosts without a wallet. Every call fails, so the renderer gets error text.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWallet;

#[async_trait]
impl WalletProvider for NoWallet {
    async fn address(&self) -> anyhow::Result<String> {
        anyhow::bail!("no wallet configured")
    }

    async fn sign_message(&self, _message: &str) -> anyhow::Result<String> {
        anyhow::bail!("no wallet configured")
    }

    async fn send_transaction(&self, _tx: &Value) -> anyhow::Result<String> {
        anyhow::bail!("no wallet configured")
    }

    async fn call_contract(
        &self,
        _address: &str,
        _abi: &Value,
        _function: &str,
        _args: &[Value],
    ) -> anyhow::Result<Value> {
        anyhow::bail!("no wallet configured")
    }
}

/// Answers wallet requests and keeps the contracts registered by `SetContract`.
pub struct WalletService {
    provider: Arc<dyn WalletProvider>,
    contracts: HashMap<String, Value>,
}

impl WalletService {
    pub fn new(provider: Arc<dyn WalletProvider>) -> Self {
        Self {
            provider,
            contracts: HashMap::new(),
        }
    }

    pub fn has_contract(&self, addr: &str) -> bool {
        self.contracts.contains_key(addr)
    }

    /// Always produces a response frame of the request's kind.
    pub async fn handle(&mut self, frame: &WalletFrame) -> WalletFrame {
        let response = match WalletRequest::from_frame(frame) {
            Ok(request) => self.serve(request).await,
            Err(e) => {
                warn!("Bad {:?} wallet request: {}", frame.kind, e);
                WalletResponse::Failed {
                    kind: frame.kind,
                    reason: e.to_string(),
                }
            }
        };
        response.to_frame()
    }

    pub async fn serve(&mut self, request: WalletRequest) -> WalletResponse {
        let kind = request.kind();
        match self.call(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("{}", e);
                let reason = match e {
                    WebrtcError::WalletCallFailed(reason) => reason,
                    other => other.to_string(),
                };
                WalletResponse::Failed { kind, reason }
            }
        }
    }

    async fn call(&mut self, request: WalletRequest) -> Result<WalletResponse, WebrtcError> {
        let failed = |e: anyhow::Error| WebrtcError::WalletCallFailed(e.to_string());

        match request {
            WalletRequest::Account => self
                .provider
                .address()
                .await
                .map(WalletResponse::Account)
                .map_err(failed),
            WalletRequest::Sign { message } => self
                .provider
                .sign_message(&message)
                .await
                .map(WalletResponse::Signature)
                .map_err(failed),
            WalletRequest::SendTx { tx } => self
                .provider
                .send_transaction(&tx)
                .await
                .map(WalletResponse::TxHash)
                .map_err(failed),
            WalletRequest::SetContract { addr, abi } => {
                info!("Registered contract {}", addr);
                self.contracts.insert(addr, abi);
                Ok(WalletResponse::ContractSet)
            }
            WalletRequest::RunContract {
                addr,
                function,
                args,
            } => {
                let abi = self.contracts.get(&addr).ok_or_else(|| {
                    WebrtcError::WalletCallFailed(format!("no contract registered at {addr}"))
                })?;
                self.provider
                    .call_contract(&addr, abi, &function, &args)
                    .await
                    .map(WalletResponse::CallResult)
                    .map_err(failed)
            }
        }
    }
}

/// Serves requests from `requests` one at a time, in arrival order, and emits the responses.
///
/// Runs outside the session task so slow wallet calls never stall the connection.
pub fn spawn_wallet_worker(
    mut service: WalletService,
    mut requests: mpsc::UnboundedReceiver<WalletFrame>,
) -> (JoinHandle<()>, mpsc::UnboundedReceiver<WalletFrame>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        while let Some(frame) = requests.recv().await {
            debug!("Wallet request {:?}", frame.kind);
            let response = service.handle(&frame).await;
            if tx.send(response).is_err() {
                break;
            }
        }
        debug!("Wallet worker finished");
    });
    (handle, rx)
}
