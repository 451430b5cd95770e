//! Relayer Pool
//!
//! A fixed, non-empty set of funded accounts handed out round-robin. Used to
//! spread outbound transactions across accounts and avoid nonce contention.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use starknet_types_core::felt::Felt;
use tracing::{error, info, warn};

use crate::account::{udc_deploy_call, LocalSigner, StarknetAccount};
use crate::chains::StarknetClient;
use crate::config::{NetworkProfile, RelayerCredentials};
use crate::crypto::felt_to_hex;
use crate::crypto::starknet::{random_private_key, stark_public_key};
use crate::error::DeployerError;
use crate::token::{balance_of, format_ether, transfer_call};

/// Result of draining one relayer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawOutcome {
    Transferred { amount: u128, transaction_hash: Felt },
    Empty,
    Failed(String),
}

/// Per-relayer results of [`RelayerPool::withdraw_all`].
#[derive(Debug, Clone, Default)]
pub struct WithdrawReport {
    pub outcomes: Vec<(Felt, WithdrawOutcome)>,
}

impl WithdrawReport {
    pub fn failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, WithdrawOutcome::Failed(_)))
            .count()
    }

    pub fn total_withdrawn(&self) -> u128 {
        self.outcomes
            .iter()
            .map(|(_, o)| match o {
                WithdrawOutcome::Transferred { amount, .. } => *amount,
                _ => 0,
            })
            .sum()
    }
}

/// Round-robin pool of relayer accounts.
#[derive(Debug)]
pub struct RelayerPool {
    accounts: Vec<Arc<StarknetAccount>>,
    cursor: AtomicUsize,
    fee_token: Felt,
}

impl RelayerPool {
    /// Builds a pool from already-constructed accounts.
    ///
    /// # Returns
    ///
    /// * `Ok(RelayerPool)` - Pool with cursor at the first account
    /// * `Err(anyhow::Error)` - `accounts` is empty
    pub fn new(accounts: Vec<Arc<StarknetAccount>>, fee_token: Felt) -> Result<Self> {
        if accounts.is_empty() {
            return Err(DeployerError::Config("relayer pool needs at least one account".into()).into());
        }
        Ok(Self {
            accounts,
            cursor: AtomicUsize::new(0),
            fee_token,
        })
    }

    /// Builds a pool from static credentials.
    pub fn from_config(
        client: Arc<StarknetClient>,
        profile: &NetworkProfile,
        credentials: &[RelayerCredentials],
    ) -> Result<Self> {
        let accounts = credentials
            .iter()
            .map(|c| {
                Arc::new(StarknetAccount::new(
                    client.clone(),
                    Arc::new(LocalSigner::new(c.address, c.private_key)),
                    profile.ledger_chain_id,
                    profile.max_fee,
                ))
            })
            .collect();
        Self::new(accounts, profile.fee_token_address)
    }

    /// Creates and funds `count` fresh accounts from `funder`.
    ///
    /// Every account is deployed through the Universal Deployer with its public
    /// key as constructor argument (salt = public key), then receives `amount`.
    /// All deploys and transfers go out as one multicall.
    pub async fn provision(
        funder: &StarknetAccount,
        count: usize,
        account_class_hash: &Felt,
        amount: u128,
        fee_token: Felt,
    ) -> Result<Self> {
        if count == 0 {
            return Err(DeployerError::Config("cannot provision an empty relayer pool".into()).into());
        }

        let mut calls = Vec::with_capacity(count * 2);
        let mut signers = Vec::with_capacity(count);
        for _ in 0..count {
            let private_key = random_private_key();
            let public_key = stark_public_key(&private_key);
            let (deploy, address) = udc_deploy_call(account_class_hash, &public_key, &[public_key])?;
            calls.push(deploy);
            calls.push(transfer_call(&fee_token, &address, amount)?);
            signers.push(LocalSigner::new(address, private_key));
        }

        info!(
            "⏳ Provisioning {} relayers with {} each",
            count,
            format_ether(amount)
        );
        let (transaction_hash, _) = funder.execute_confirmed(&calls).await?;
        info!(
            "✅ Relayers provisioned in {}",
            felt_to_hex(&transaction_hash)
        );

        let accounts = signers
            .into_iter()
            .map(|signer| {
                Arc::new(StarknetAccount::new(
                    funder.client().clone(),
                    Arc::new(signer),
                    funder.chain_id(),
                    funder.max_fee(),
                ))
            })
            .collect();
        Self::new(accounts, fee_token)
    }

    /// Returns the account under the cursor and advances it by one.
    pub fn next(&self) -> Arc<StarknetAccount> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.accounts.len();
        self.accounts[index].clone()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn accounts(&self) -> &[Arc<StarknetAccount>] {
        &self.accounts
    }

    pub fn fee_token(&self) -> Felt {
        self.fee_token
    }

    /// Sends each relayer's full balance to `to`.
    ///
    /// Transfers are independent; a failure is recorded and the next relayer is
    /// processed.
    pub async fn withdraw_all(&self, to: &Felt) -> WithdrawReport {
        let mut report = WithdrawReport::default();
        for account in &self.accounts {
            let address = account.address();
            let outcome = match self.withdraw_one(account, to).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("❌ Withdrawal from {} failed: {:#}", felt_to_hex(&address), e);
                    WithdrawOutcome::Failed(format!("{:#}", e))
                }
            };
            report.outcomes.push((address, outcome));
        }
        report
    }

    async fn withdraw_one(&self, account: &StarknetAccount, to: &Felt) -> Result<WithdrawOutcome> {
        let balance = balance_of(account.client(), &self.fee_token, &account.address()).await?;
        if balance == 0 {
            return Ok(WithdrawOutcome::Empty);
        }
        let (transaction_hash, status) = account
            .execute_and_wait(&[transfer_call(&self.fee_token, to, balance)?])
            .await?;
        if !status.is_success() {
            warn!(
                "Withdrawal {} from {} did not finalize: {:?}",
                felt_to_hex(&transaction_hash),
                felt_to_hex(&account.address()),
                status
            );
            return Ok(WithdrawOutcome::Failed(format!("transaction not final: {:?}", status)));
        }
        info!(
            "✅ Withdrew {} from {}",
            format_ether(balance),
            felt_to_hex(&account.address())
        );
        Ok(WithdrawOutcome::Transferred {
            amount: balance,
            transaction_hash,
        })
    }
}
