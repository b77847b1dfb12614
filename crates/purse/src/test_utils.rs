//! Scripted mint connector for tests
//!
//! A deterministic in-process mint: quotes are issued sequentially, proofs
//! are split into powers of two, and tests can script quote states, proof
//! states, canned responses and injected failures.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use purse_common::error::ErrorResponse;
use purse_common::protocol::{
    CheckStateRequest, CheckStateResponse, KeysetInfo, KeysetsResponse, MeltQuoteRequest,
    MeltQuoteResponse, MeltRequest, MeltResponse, MintInfo, MintQuoteResponse, MintRequest,
    MintResponse, ProofSpendState, ProofStateEntry, QuoteState, SwapRequest, SwapResponse,
};
use purse_common::{Amount, Error, MintUrl, Proof, Proofs, ProofsMethods};
use tokio::sync::Mutex;

use crate::client::{MintConnector, MintConnectorFactory};

/// Mint url used by the fake mint
pub const FAKE_MINT_URL: &str = "https://fake-mint.test";

/// Scripted quote held by the fake mint
#[derive(Debug, Clone)]
pub struct FakeQuote {
    /// Quote amount
    pub amount: Amount,
    /// Quote state
    pub state: QuoteState,
}

#[derive(Debug, Default)]
struct FakeMintState {
    quote_counter: u64,
    secret_counter: u64,
    quotes: HashMap<String, FakeQuote>,
    proof_states: HashMap<String, ProofSpendState>,
    scripted_mint_proofs: HashMap<String, Proofs>,
    scripted_melt_quote: Option<(Amount, Amount)>,
    scripted_melt: Option<MeltResponse>,
    failing_status_checks: u32,
    fail_mint_redeem: bool,
    fail_melt: bool,
}

impl FakeMintState {
    fn next_proof(&mut self, amount: Amount) -> Proof {
        self.secret_counter += 1;
        let n = self.secret_counter;
        let proof = Proof {
            amount,
            secret: format!("secret-{n}"),
            c: format!("02{n:062x}"),
            keyset_id: "00fake5e7f000001".to_string(),
            witness: None,
        };
        self.proof_states
            .insert(proof.secret.clone(), ProofSpendState::Unspent);
        proof
    }

    fn split(&mut self, amount: Amount) -> Proofs {
        let mut value: u64 = amount.into();
        let mut proofs = Vec::new();
        let mut bit = 1u64 << 63;
        while bit > 0 {
            if value & bit != 0 {
                proofs.push(self.next_proof(Amount::from(bit)));
                value &= !bit;
            }
            bit >>= 1;
        }
        proofs
    }

    fn mark_spent(&mut self, proofs: &Proofs) {
        for proof in proofs {
            self.proof_states
                .insert(proof.secret.clone(), ProofSpendState::Spent);
        }
    }
}

/// Deterministic in-process mint
#[derive(Debug, Clone)]
pub struct FakeMintConnector {
    mint_url: MintUrl,
    state: Arc<Mutex<FakeMintState>>,
}

impl Default for FakeMintConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeMintConnector {
    /// Create new [`FakeMintConnector`]
    pub fn new() -> Self {
        Self {
            mint_url: MintUrl::from_str(FAKE_MINT_URL).expect("static url"),
            state: Arc::new(Mutex::new(FakeMintState::default())),
        }
    }

    /// Set the state of an issued quote
    pub async fn set_quote_state(&self, quote_id: &str, state: QuoteState) {
        if let Some(quote) = self.state.lock().await.quotes.get_mut(quote_id) {
            quote.state = state;
        }
    }

    /// Mark an issued quote paid
    pub async fn mark_paid(&self, quote_id: &str) {
        self.set_quote_state(quote_id, QuoteState::Paid).await;
    }

    /// Override the oracle state of one proof secret
    pub async fn set_proof_state(&self, secret: &str, state: ProofSpendState) {
        self.state
            .lock()
            .await
            .proof_states
            .insert(secret.to_string(), state);
    }

    /// Script the proofs returned when a quote is redeemed
    pub async fn script_mint_proofs(&self, quote_id: &str, amounts: &[u64]) {
        let mut state = self.state.lock().await;
        let proofs = amounts
            .iter()
            .map(|a| state.next_proof(Amount::from(*a)))
            .collect();
        state
            .scripted_mint_proofs
            .insert(quote_id.to_string(), proofs);
    }

    /// Script the amount and fee reserve of the next melt quote
    pub async fn script_melt_quote(&self, amount: u64, fee_reserve: u64) {
        self.state.lock().await.scripted_melt_quote =
            Some((Amount::from(amount), Amount::from(fee_reserve)));
    }

    /// Script the next melt response
    pub async fn script_melt(&self, state: QuoteState, change: &[u64], preimage: Option<String>) {
        let mut guard = self.state.lock().await;
        let change = change
            .iter()
            .map(|a| guard.next_proof(Amount::from(*a)))
            .collect();
        guard.scripted_melt = Some(MeltResponse {
            state,
            preimage,
            change,
        });
    }

    /// Make the next `n` quote status checks fail with a transport error
    pub async fn fail_status_checks(&self, n: u32) {
        self.state.lock().await.failing_status_checks = n;
    }

    /// Make quote redemption fail with a mint policy error
    pub async fn fail_mint_redeem(&self, fail: bool) {
        self.state.lock().await.fail_mint_redeem = fail;
    }

    /// Make melt fail with a transport error after consuming the request
    pub async fn fail_melt(&self, fail: bool) {
        self.state.lock().await.fail_melt = fail;
    }

    /// Quote ids issued so far, in order
    pub async fn issued_quotes(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut ids: Vec<String> = state.quotes.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl MintConnector for FakeMintConnector {
    fn mint_url(&self) -> &MintUrl {
        &self.mint_url
    }

    async fn get_mint_info(&self) -> Result<MintInfo, Error> {
        Ok(MintInfo {
            name: Some("fake mint".to_string()),
            version: Some("fake/0.1.0".to_string()),
            description: None,
        })
    }

    async fn get_keysets(&self) -> Result<KeysetsResponse, Error> {
        Ok(KeysetsResponse {
            keysets: vec![KeysetInfo {
                id: "00fake5e7f000001".to_string(),
                unit: "sat".to_string(),
                active: true,
            }],
        })
    }

    async fn post_mint_quote(&self, amount: Amount) -> Result<MintQuoteResponse, Error> {
        let mut state = self.state.lock().await;
        state.quote_counter += 1;
        let quote_id = format!("quote-{}", state.quote_counter);
        state.quotes.insert(
            quote_id.clone(),
            FakeQuote {
                amount,
                state: QuoteState::Unpaid,
            },
        );

        Ok(MintQuoteResponse {
            quote: quote_id.clone(),
            request: format!("lnbc{}n1fake{}", u64::from(amount), quote_id),
            state: QuoteState::Unpaid,
            expiry: Some(purse_common::util::unix_time() + 600),
        })
    }

    async fn get_mint_quote_status(&self, quote_id: &str) -> Result<MintQuoteResponse, Error> {
        let mut state = self.state.lock().await;

        if state.failing_status_checks > 0 {
            state.failing_status_checks -= 1;
            return Err(Error::Transport("fake mint unreachable".to_string()));
        }

        let quote = state
            .quotes
            .get(quote_id)
            .cloned()
            .ok_or(Error::QuoteUnknown)?;

        Ok(MintQuoteResponse {
            quote: quote_id.to_string(),
            request: format!("lnbc{}n1fake{}", u64::from(quote.amount), quote_id),
            state: quote.state,
            expiry: Some(purse_common::util::unix_time() + 600),
        })
    }

    async fn post_mint(&self, request: MintRequest) -> Result<MintResponse, Error> {
        let mut state = self.state.lock().await;

        if state.fail_mint_redeem {
            return Err(Error::Mint(ErrorResponse {
                code: Some(20002),
                detail: Some("outputs already signed".to_string()),
            }));
        }

        let quote = state
            .quotes
            .get(&request.quote)
            .cloned()
            .ok_or(Error::QuoteUnknown)?;
        if quote.state != QuoteState::Paid {
            return Err(Error::Mint(ErrorResponse {
                code: Some(20001),
                detail: Some("quote not paid".to_string()),
            }));
        }

        let proofs = match state.scripted_mint_proofs.remove(&request.quote) {
            Some(proofs) => proofs,
            None => state.split(request.amount),
        };

        Ok(MintResponse { proofs })
    }

    async fn post_melt_quote(&self, _request: MeltQuoteRequest) -> Result<MeltQuoteResponse, Error> {
        let mut state = self.state.lock().await;
        state.quote_counter += 1;
        let quote_id = format!("melt-{}", state.quote_counter);

        let (amount, fee_reserve) = state
            .scripted_melt_quote
            .take()
            .unwrap_or((Amount::from(1000), Amount::from(10)));

        Ok(MeltQuoteResponse {
            quote: quote_id,
            amount,
            fee_reserve,
            expiry: Some(purse_common::util::unix_time() + 600),
        })
    }

    async fn post_swap(&self, request: SwapRequest) -> Result<SwapResponse, Error> {
        let mut state = self.state.lock().await;

        for proof in &request.inputs {
            if matches!(
                state.proof_states.get(&proof.secret),
                Some(ProofSpendState::Spent)
            ) {
                return Err(Error::Mint(ErrorResponse {
                    code: Some(11001),
                    detail: Some("token already spent".to_string()),
                }));
            }
        }

        let total = request.inputs.total_amount();
        if total < request.amount {
            return Err(Error::Mint(ErrorResponse {
                code: Some(11002),
                detail: Some("insufficient inputs".to_string()),
            }));
        }

        state.mark_spent(&request.inputs);

        let send = state.split(request.amount);
        let keep = state.split(total - request.amount);

        Ok(SwapResponse { send, keep })
    }

    async fn post_melt(&self, request: MeltRequest) -> Result<MeltResponse, Error> {
        let mut state = self.state.lock().await;

        if state.fail_melt {
            return Err(Error::Transport("connection reset during melt".to_string()));
        }

        let response = state.scripted_melt.take().unwrap_or(MeltResponse {
            state: QuoteState::Paid,
            preimage: Some("00".repeat(32)),
            change: Vec::new(),
        });

        if response.state == QuoteState::Paid {
            state.mark_spent(&request.inputs);
        }

        Ok(response)
    }

    async fn post_check_state(
        &self,
        request: CheckStateRequest,
    ) -> Result<CheckStateResponse, Error> {
        let state = self.state.lock().await;
        Ok(CheckStateResponse {
            states: request
                .secrets
                .iter()
                .map(|secret| ProofStateEntry {
                    secret: secret.clone(),
                    state: state
                        .proof_states
                        .get(secret)
                        .copied()
                        .unwrap_or(ProofSpendState::Unspent),
                })
                .collect(),
        })
    }
}

/// Factory handing out the same fake mint for every url
#[derive(Debug, Clone)]
pub struct FakeConnectorFactory {
    connector: Arc<FakeMintConnector>,
}

impl FakeConnectorFactory {
    /// Create new [`FakeConnectorFactory`]
    pub fn new(connector: Arc<FakeMintConnector>) -> Self {
        Self { connector }
    }
}

impl MintConnectorFactory for FakeConnectorFactory {
    fn connector(&self, _mint_url: &MintUrl) -> Arc<dyn MintConnector> {
        self.connector.clone()
    }
}
