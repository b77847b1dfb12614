//! Mint oracle client
//!
//! Typed operations against the mint. [`MintConnector`] is the seam tests
//! and alternative transports implement; [`HttpMintConnector`] is the
//! production implementation over the pooled transport. A [`MintHandle`] is
//! opened per coordinator operation and fails fast when the mint is
//! unreachable.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use purse_common::error::ErrorResponse;
use purse_common::protocol::{
    CheckStateRequest, CheckStateResponse, KeysetInfo, KeysetsResponse, MeltQuoteRequest,
    MeltQuoteResponse, MeltRequest, MeltResponse, MintInfo, MintQuoteRequest, MintQuoteResponse,
    MintRequest, MintResponse, SwapRequest, SwapResponse,
};
use purse_common::{Amount, Error, MintUrl};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::instrument;

use crate::transport::MintTransport;

/// Operations the mint exposes to the coordinator
#[async_trait]
pub trait MintConnector: Debug + Send + Sync {
    /// Mint the connector talks to
    fn mint_url(&self) -> &MintUrl;

    /// Get mint metadata
    async fn get_mint_info(&self) -> Result<MintInfo, Error>;

    /// Get mint keysets
    async fn get_keysets(&self) -> Result<KeysetsResponse, Error>;

    /// Request a mint quote for an amount
    async fn post_mint_quote(&self, amount: Amount) -> Result<MintQuoteResponse, Error>;

    /// Get the state of a mint quote
    async fn get_mint_quote_status(&self, quote_id: &str) -> Result<MintQuoteResponse, Error>;

    /// Redeem a paid quote for proofs
    async fn post_mint(&self, request: MintRequest) -> Result<MintResponse, Error>;

    /// Request a melt quote for an invoice
    async fn post_melt_quote(&self, request: MeltQuoteRequest) -> Result<MeltQuoteResponse, Error>;

    /// Swap proofs for a send/keep split
    async fn post_swap(&self, request: SwapRequest) -> Result<SwapResponse, Error>;

    /// Pay a melt quote with proofs
    async fn post_melt(&self, request: MeltRequest) -> Result<MeltResponse, Error>;

    /// Check oracle state of proofs
    async fn post_check_state(
        &self,
        request: CheckStateRequest,
    ) -> Result<CheckStateResponse, Error>;
}

/// Builds a connector per operation
pub trait MintConnectorFactory: Debug + Send + Sync {
    /// Connector for the given mint
    fn connector(&self, mint_url: &MintUrl) -> Arc<dyn MintConnector>;
}

/// HTTP mint connector
#[derive(Debug, Clone)]
pub struct HttpMintConnector {
    transport: MintTransport,
    mint_url: MintUrl,
}

impl HttpMintConnector {
    /// Create new [`HttpMintConnector`]
    pub fn new(transport: MintTransport, mint_url: MintUrl) -> Self {
        Self {
            transport,
            mint_url,
        }
    }

    async fn http_get<R: DeserializeOwned>(&self, paths: &[&str]) -> Result<R, Error> {
        let url = self.mint_url.join_paths(paths)?;

        let res = self
            .transport
            .http()
            .get(url)
            .send()
            .await
            .map_err(Error::transport)?
            .json::<Value>()
            .await
            .map_err(Error::transport)?;

        match serde_json::from_value::<R>(res.clone()) {
            Ok(response) => Ok(response),
            Err(_) => Err(Error::Mint(ErrorResponse::from_value(res))),
        }
    }

    async fn http_post<P: Serialize, R: DeserializeOwned>(
        &self,
        paths: &[&str],
        payload: &P,
    ) -> Result<R, Error> {
        let url = self.mint_url.join_paths(paths)?;

        let res = self
            .transport
            .http()
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(Error::transport)?
            .json::<Value>()
            .await
            .map_err(Error::transport)?;

        match serde_json::from_value::<R>(res.clone()) {
            Ok(response) => Ok(response),
            Err(_) => Err(Error::Mint(ErrorResponse::from_value(res))),
        }
    }
}

#[async_trait]
impl MintConnector for HttpMintConnector {
    fn mint_url(&self) -> &MintUrl {
        &self.mint_url
    }

    #[instrument(skip(self), fields(mint_url = %self.mint_url))]
    async fn get_mint_info(&self) -> Result<MintInfo, Error> {
        self.http_get(&["v1", "info"]).await
    }

    #[instrument(skip(self), fields(mint_url = %self.mint_url))]
    async fn get_keysets(&self) -> Result<KeysetsResponse, Error> {
        self.http_get(&["v1", "keysets"]).await
    }

    #[instrument(skip(self), fields(mint_url = %self.mint_url))]
    async fn post_mint_quote(&self, amount: Amount) -> Result<MintQuoteResponse, Error> {
        let request = MintQuoteRequest {
            amount,
            unit: "sat".to_string(),
        };
        self.http_post(&["v1", "mint", "quote"], &request).await
    }

    #[instrument(skip(self, quote_id), fields(mint_url = %self.mint_url))]
    async fn get_mint_quote_status(&self, quote_id: &str) -> Result<MintQuoteResponse, Error> {
        self.http_get(&["v1", "mint", "quote", quote_id]).await
    }

    #[instrument(skip_all, fields(mint_url = %self.mint_url))]
    async fn post_mint(&self, request: MintRequest) -> Result<MintResponse, Error> {
        self.http_post(&["v1", "mint"], &request).await
    }

    #[instrument(skip_all, fields(mint_url = %self.mint_url))]
    async fn post_melt_quote(&self, request: MeltQuoteRequest) -> Result<MeltQuoteResponse, Error> {
        self.http_post(&["v1", "melt", "quote"], &request).await
    }

    #[instrument(skip_all, fields(mint_url = %self.mint_url))]
    async fn post_swap(&self, request: SwapRequest) -> Result<SwapResponse, Error> {
        self.http_post(&["v1", "swap"], &request).await
    }

    #[instrument(skip_all, fields(mint_url = %self.mint_url))]
    async fn post_melt(&self, request: MeltRequest) -> Result<MeltResponse, Error> {
        self.http_post(&["v1", "melt"], &request).await
    }

    #[instrument(skip_all, fields(mint_url = %self.mint_url))]
    async fn post_check_state(
        &self,
        request: CheckStateRequest,
    ) -> Result<CheckStateResponse, Error> {
        self.http_post(&["v1", "checkstate"], &request).await
    }
}

/// Factory producing HTTP connectors over one shared transport
#[derive(Debug, Clone)]
pub struct HttpConnectorFactory {
    transport: MintTransport,
}

impl HttpConnectorFactory {
    /// Create new [`HttpConnectorFactory`]
    pub fn new(transport: MintTransport) -> Self {
        Self { transport }
    }
}

impl MintConnectorFactory for HttpConnectorFactory {
    fn connector(&self, mint_url: &MintUrl) -> Arc<dyn MintConnector> {
        Arc::new(HttpMintConnector::new(
            self.transport.clone(),
            mint_url.clone(),
        ))
    }
}

/// Request-scoped mint handle
///
/// Opened once per coordinator operation. Opening verifies the mint is
/// reachable via `get_info` and loads its keysets, so fund-moving code
/// never runs against a mint that cannot answer.
#[derive(Debug, Clone)]
pub struct MintHandle {
    connector: Arc<dyn MintConnector>,
    info: MintInfo,
    keysets: Vec<KeysetInfo>,
}

impl MintHandle {
    /// Open a handle, failing fast when the mint is unreachable
    pub async fn open(connector: Arc<dyn MintConnector>) -> Result<Self, Error> {
        let info = crate::retry::with_retry(|| connector.get_mint_info()).await?;
        let keysets = crate::retry::with_retry(|| connector.get_keysets())
            .await?
            .keysets;

        Ok(Self {
            connector,
            info,
            keysets,
        })
    }

    /// Mint metadata captured at open
    pub fn info(&self) -> &MintInfo {
        &self.info
    }

    /// Keysets captured at open
    pub fn keysets(&self) -> &[KeysetInfo] {
        &self.keysets
    }

    /// Underlying connector
    pub fn connector(&self) -> &Arc<dyn MintConnector> {
        &self.connector
    }
}

impl std::ops::Deref for MintHandle {
    type Target = dyn MintConnector;

    fn deref(&self) -> &Self::Target {
        self.connector.as_ref()
    }
}
