//! Vault state and the batch accounting cycle.
//!
//! `process_batch` is the only mutator of NAV, total shares, price and peak.
//! Batches process strictly sequentially and exactly once: each batch runs
//! the fee waterfall over its accumulated P&L snapshot, fixes one share
//! price `pe = n_pre / shares_prev`, burns every pending withdrawal and
//! mints every pending deposit at that price, then advances price and peak.
//!
//! Requests hold funds (deposits) or shares (withdrawals) from the moment
//! they are made; cancellation is possible strictly before the owning batch
//! processes, and claims settle at the batch's fixed price afterwards.

use crate::config::{FeeWaterfallConfig, VaultConfig};
use crate::error::CoreError;
use crate::interfaces::{AccountId, Custody};
use crate::CoreResult;
use log::{debug, info};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use vault_model::batch::{drawdown, share_price, shares_for_deposit, withdraw_payout};
use vault_model::waterfall::{self, WaterfallInput};
use wad_math::WAD;

pub type BatchId = u64;

/// One batch's accumulated P&L record, extended with the waterfall results
/// once the batch processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PnlSnapshot {
    pub lt: i128,
    pub fees: u128,
    pub tail_budget: u128,
    pub f_vault: u128,
    pub grant: u128,
    pub n_pre: u128,
    /// Fixed batch price `pe`, WAD.
    pub price: u128,
    pub deposits_in: u128,
    pub withdrawals_out: u128,
    pub processed: bool,
}

impl PnlSnapshot {
    fn empty() -> Self {
        PnlSnapshot {
            lt: 0,
            fees: 0,
            tail_budget: 0,
            f_vault: 0,
            grant: 0,
            n_pre: 0,
            price: 0,
            deposits_in: 0,
            withdrawals_out: 0,
            processed: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingRequest {
    Deposit {
        amount: u64,
        batch: BatchId,
        /// `(minted, refund)` once the batch has processed.
        resolved: Option<(u128, u64)>,
    },
    Withdraw {
        shares: u128,
        batch: BatchId,
        /// Payout once the batch has processed.
        resolved: Option<u64>,
    },
}

impl PendingRequest {
    fn is_resolved(&self) -> bool {
        match self {
            PendingRequest::Deposit { resolved, .. } => resolved.is_some(),
            PendingRequest::Withdraw { resolved, .. } => resolved.is_some(),
        }
    }
}

/// Read-only vault snapshot for the query surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VaultSummary {
    pub nav: u128,
    pub shares: u128,
    pub price: u128,
    pub peak: u128,
    pub drawdown: u128,
    pub backstop: u128,
    pub treasury: u128,
    pub pending_deposits: u128,
    pub pending_withdraw_shares: u128,
    pub next_batch: BatchId,
}

/// Per-batch view: the snapshot plus its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub id: BatchId,
    pub snapshot: PnlSnapshot,
}

#[derive(Debug, Clone)]
pub struct Vault {
    cfg: VaultConfig,
    waterfall_cfg: FeeWaterfallConfig,
    seeded: bool,
    /// Micro units.
    nav: u128,
    shares: u128,
    /// WAD.
    price: u128,
    peak: u128,
    backstop: u128,
    treasury: u128,
    share_balances: HashMap<AccountId, u128>,
    requests: HashMap<AccountId, PendingRequest>,
    snapshots: BTreeMap<BatchId, PnlSnapshot>,
    next_batch: BatchId,
    last_processed_at: Option<u64>,
}

impl Vault {
    pub fn new(cfg: VaultConfig, waterfall_cfg: FeeWaterfallConfig) -> Self {
        Vault {
            cfg,
            waterfall_cfg,
            seeded: false,
            nav: 0,
            shares: 0,
            price: WAD,
            peak: WAD,
            backstop: 0,
            treasury: 0,
            share_balances: HashMap::new(),
            requests: HashMap::new(),
            snapshots: BTreeMap::new(),
            next_batch: 0,
            last_processed_at: None,
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn nav(&self) -> u128 {
        self.nav
    }

    pub fn shares(&self) -> u128 {
        self.shares
    }

    pub fn price(&self) -> u128 {
        self.price
    }

    pub fn peak(&self) -> u128 {
        self.peak
    }

    pub fn backstop(&self) -> u128 {
        self.backstop
    }

    pub fn treasury(&self) -> u128 {
        self.treasury
    }

    pub fn drawdown(&self) -> CoreResult<u128> {
        Ok(drawdown(self.price, self.peak)?)
    }

    pub fn share_balance_of(&self, account: AccountId) -> u128 {
        self.share_balances.get(&account).copied().unwrap_or(0)
    }

    /// The batch new deposits and withdrawals currently attach to.
    pub fn current_batch(&self) -> BatchId {
        self.next_batch
    }

    pub fn snapshot(&self, id: BatchId) -> Option<&PnlSnapshot> {
        self.snapshots.get(&id)
    }

    pub fn batch_summary(&self, id: BatchId) -> Option<BatchSummary> {
        self.snapshots
            .get(&id)
            .map(|snapshot| BatchSummary { id, snapshot: *snapshot })
    }

    pub fn summary(&self) -> CoreResult<VaultSummary> {
        let mut pending_deposits = 0u128;
        let mut pending_withdraw_shares = 0u128;
        for req in self.requests.values() {
            match req {
                PendingRequest::Deposit {
                    amount,
                    resolved: None,
                    ..
                } => pending_deposits += *amount as u128,
                PendingRequest::Withdraw {
                    shares,
                    resolved: None,
                    ..
                } => pending_withdraw_shares += shares,
                _ => {}
            }
        }
        Ok(VaultSummary {
            nav: self.nav,
            shares: self.shares,
            price: self.price,
            peak: self.peak,
            drawdown: self.drawdown()?,
            backstop: self.backstop,
            treasury: self.treasury,
            pending_deposits,
            pending_withdraw_shares,
            next_batch: self.next_batch,
        })
    }

    // ------------------------------------------------------------------
    // Seeding
    // ------------------------------------------------------------------

    /// First deposit, executed immediately at a price of 1.0.
    pub fn seed<C: Custody>(
        &mut self,
        custody: &mut C,
        account: AccountId,
        amount: u64,
    ) -> CoreResult<u128> {
        if self.seeded {
            return Err(CoreError::VaultAlreadySeeded);
        }
        if amount < self.cfg.min_seed_amount {
            return Err(CoreError::SeedBelowMinimum {
                amount,
                minimum: self.cfg.min_seed_amount,
            });
        }
        custody.pull(account, amount)?;
        self.seeded = true;
        self.nav = amount as u128;
        self.shares = amount as u128;
        self.price = WAD;
        self.peak = WAD;
        self.share_balances.insert(account, amount as u128);
        info!("vault seeded with {amount} by account {account}");
        Ok(amount as u128)
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    pub fn request_deposit<C: Custody>(
        &mut self,
        custody: &mut C,
        account: AccountId,
        amount: u64,
    ) -> CoreResult<BatchId> {
        if !self.seeded {
            return Err(CoreError::VaultNotSeeded);
        }
        if amount == 0 {
            return Err(CoreError::ZeroAmount);
        }
        if self.requests.contains_key(&account) {
            return Err(CoreError::RequestExists);
        }
        custody.pull(account, amount)?;
        let batch = self.next_batch;
        self.requests.insert(
            account,
            PendingRequest::Deposit {
                amount,
                batch,
                resolved: None,
            },
        );
        debug!("deposit request: account {account}, amount {amount}, batch {batch}");
        Ok(batch)
    }

    pub fn request_withdraw(&mut self, account: AccountId, shares: u128) -> CoreResult<BatchId> {
        if !self.seeded {
            return Err(CoreError::VaultNotSeeded);
        }
        if shares == 0 {
            return Err(CoreError::ZeroAmount);
        }
        if self.requests.contains_key(&account) {
            return Err(CoreError::RequestExists);
        }
        let balance = self.share_balances.entry(account).or_default();
        if *balance < shares {
            return Err(CoreError::InsufficientShares {
                requested: shares,
                available: *balance,
            });
        }
        // shares leave the balance now; cancel puts them back
        *balance -= shares;
        let batch = self.next_batch;
        self.requests.insert(
            account,
            PendingRequest::Withdraw {
                shares,
                batch,
                resolved: None,
            },
        );
        debug!("withdraw request: account {account}, shares {shares}, batch {batch}");
        Ok(batch)
    }

    pub fn cancel_request<C: Custody>(
        &mut self,
        custody: &mut C,
        account: AccountId,
    ) -> CoreResult<()> {
        let req = self
            .requests
            .get(&account)
            .ok_or(CoreError::NoSuchRequest)?;
        if req.is_resolved() {
            return Err(CoreError::RequestAlreadyResolved);
        }
        match self.requests.remove(&account) {
            Some(PendingRequest::Deposit { amount, .. }) => custody.push(account, amount)?,
            Some(PendingRequest::Withdraw { shares, .. }) => {
                *self.share_balances.entry(account).or_default() += shares;
            }
            None => return Err(CoreError::NoSuchRequest),
        }
        Ok(())
    }

    /// Claims a processed deposit: credits the minted shares and refunds the
    /// unminted residual. Touches neither NAV nor total shares.
    pub fn claim_deposit<C: Custody>(
        &mut self,
        custody: &mut C,
        account: AccountId,
    ) -> CoreResult<u128> {
        match self.requests.get(&account) {
            None => Err(CoreError::NoSuchRequest),
            Some(PendingRequest::Withdraw { .. }) => Err(CoreError::NoSuchRequest),
            Some(PendingRequest::Deposit { resolved: None, .. }) => {
                Err(CoreError::RequestNotResolved)
            }
            Some(PendingRequest::Deposit {
                resolved: Some((minted, refund)),
                ..
            }) => {
                let (minted, refund) = (*minted, *refund);
                self.requests.remove(&account);
                *self.share_balances.entry(account).or_default() += minted;
                if refund > 0 {
                    custody.push(account, refund)?;
                }
                Ok(minted)
            }
        }
    }

    /// Claims a processed withdrawal once the withdrawal lag has elapsed.
    pub fn claim_withdraw<C: Custody>(
        &mut self,
        custody: &mut C,
        account: AccountId,
    ) -> CoreResult<u64> {
        match self.requests.get(&account) {
            None => Err(CoreError::NoSuchRequest),
            Some(PendingRequest::Deposit { .. }) => Err(CoreError::NoSuchRequest),
            Some(PendingRequest::Withdraw { resolved: None, .. }) => {
                Err(CoreError::RequestNotResolved)
            }
            Some(PendingRequest::Withdraw {
                batch,
                resolved: Some(payout),
                ..
            }) => {
                let (batch, payout) = (*batch, *payout);
                // the lagged batch itself must have processed
                if batch + self.cfg.withdrawal_lag_batches >= self.next_batch {
                    return Err(CoreError::RequestNotResolved);
                }
                self.requests.remove(&account);
                if payout > 0 {
                    custody.push(account, payout)?;
                }
                Ok(payout)
            }
        }
    }

    // ------------------------------------------------------------------
    // P&L recording
    // ------------------------------------------------------------------

    /// Accumulates one settled market's results into the current unprocessed
    /// batch and returns its id.
    pub fn record_pnl(&mut self, lt: i128, fees: u64, tail_budget: u64) -> BatchId {
        let batch = self.next_batch;
        let snap = self.snapshots.entry(batch).or_insert_with(PnlSnapshot::empty);
        snap.lt += lt;
        snap.fees += fees as u128;
        snap.tail_budget += tail_budget as u128;
        batch
    }

    /// Reverses a `record_pnl` from a still-unprocessed batch (reopen path).
    pub fn unrecord_pnl(
        &mut self,
        batch: BatchId,
        lt: i128,
        fees: u64,
        tail_budget: u64,
    ) -> CoreResult<()> {
        if batch < self.next_batch {
            return Err(CoreError::BatchAlreadyProcessed(batch));
        }
        let snap = self
            .snapshots
            .get_mut(&batch)
            .ok_or(CoreError::BatchNotProcessed(batch))?;
        snap.lt -= lt;
        snap.fees -= fees as u128;
        snap.tail_budget -= tail_budget as u128;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Batch processing
    // ------------------------------------------------------------------

    /// Runs one accounting batch. Strictly sequential, exactly once. Funds
    /// never move here: requests already hold theirs in the reserve, and
    /// payouts leave at claim time.
    pub fn process_batch(&mut self, id: BatchId, now: u64) -> CoreResult<BatchSummary> {
        if !self.seeded {
            return Err(CoreError::VaultNotSeeded);
        }
        if id < self.next_batch {
            return Err(CoreError::BatchAlreadyProcessed(id));
        }
        if id > self.next_batch {
            return Err(CoreError::BatchNotReady(id));
        }
        if let Some(last) = self.last_processed_at {
            if now < last + self.cfg.batch_interval_secs {
                return Err(CoreError::BatchNotReady(id));
            }
        }

        let mut snap = self
            .snapshots
            .get(&id)
            .copied()
            .unwrap_or_else(PnlSnapshot::empty);

        // 1. Waterfall over the accumulated P&L.
        let input = WaterfallInput {
            lt: snap.lt,
            ftot: snap.fees,
            n_prev: self.nav,
            b_prev: self.backstop,
            t_prev: self.treasury,
            tail_budget: snap.tail_budget,
        };
        let out = waterfall::run(&input, &self.waterfall_cfg.params())?;
        if out.grant > 0 {
            info!("batch {id}: backstop grant {} funds the drawdown floor", out.grant);
        }

        // 2. One fixed price for the whole batch.
        let pe = share_price(out.n_pre, self.shares)?;

        // 3. Withdrawals burn at pe; rounding dust stays in the vault.
        let mut withdrawals_out = 0u128;
        let mut burned = 0u128;
        for req in self.requests.values_mut() {
            if let PendingRequest::Withdraw {
                shares,
                batch,
                resolved: resolved @ None,
            } = req
            {
                if *batch == id {
                    let payout = withdraw_payout(*shares, pe)?;
                    let payout = u64::try_from(payout)
                        .map_err(|_| CoreError::Math(wad_math::MathError::Overflow))?;
                    burned += *shares;
                    withdrawals_out += payout as u128;
                    *resolved = Some(payout);
                }
            }
        }

        // 4. Deposits mint at pe; the residual is earmarked for refund.
        let mut deposits_in = 0u128;
        let mut minted_total = 0u128;
        for req in self.requests.values_mut() {
            if let PendingRequest::Deposit {
                amount,
                batch,
                resolved: resolved @ None,
            } = req
            {
                if *batch == id {
                    let (minted, credit, refund) = shares_for_deposit(*amount as u128, pe)?;
                    let refund = u64::try_from(refund)
                        .map_err(|_| CoreError::Math(wad_math::MathError::Overflow))?;
                    minted_total += minted;
                    deposits_in += credit;
                    *resolved = Some((minted, refund));
                }
            }
        }

        // 5. Advance NAV, shares, price, peak.
        self.nav = out
            .n_pre
            .checked_sub(withdrawals_out)
            .ok_or(CoreError::Math(wad_math::MathError::Overflow))?
            .checked_add(deposits_in)
            .ok_or(CoreError::Math(wad_math::MathError::Overflow))?;
        self.shares = self.shares - burned + minted_total;
        self.backstop = out.b_next;
        self.treasury = out.t_next;
        self.price = share_price(self.nav, self.shares)?;
        self.peak = self.peak.max(self.price);

        snap.f_vault = out.f_vault;
        snap.grant = out.grant;
        snap.n_pre = out.n_pre;
        snap.price = pe;
        snap.deposits_in = deposits_in;
        snap.withdrawals_out = withdrawals_out;
        snap.processed = true;
        self.snapshots.insert(id, snap);

        self.next_batch = id + 1;
        self.last_processed_at = Some(now);
        info!(
            "batch {id} processed: nav {}, shares {}, price {}, peak {}",
            self.nav, self.shares, self.price, self.peak
        );
        Ok(BatchSummary { id, snapshot: snap })
    }

    /// Credits the backstop directly (operator top-up).
    pub fn fund_backstop<C: Custody>(
        &mut self,
        custody: &mut C,
        from: AccountId,
        amount: u64,
    ) -> CoreResult<()> {
        if amount == 0 {
            return Err(CoreError::ZeroAmount);
        }
        custody.pull(from, amount)?;
        self.backstop += amount as u128;
        Ok(())
    }
}
