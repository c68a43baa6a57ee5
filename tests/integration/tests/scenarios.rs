//! End-to-end lifecycle scenarios: seed, trade, settle, batch, claim.

use lattice_core::*;
use wad_math::{MICRO_SCALE, WAD};

const LP: AccountId = 1;
const TRADER: AccountId = 7;
const OPERATOR: AccountId = 9;

type TestProtocol = Protocol<InMemoryCustody, InMemoryRegistry, InMemoryOracle, ProportionalFeePolicy>;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn protocol() -> TestProtocol {
    init_logging();
    let mut p = Protocol::new(
        ProtocolConfig::sample(),
        InMemoryCustody::new(),
        InMemoryRegistry::new(),
        InMemoryOracle::new(),
        ProportionalFeePolicy { fee_bps: 100 },
    )
    .unwrap();
    p.custody_mut().fund(LP, 100_000_000_000);
    p.custody_mut().fund(TRADER, 100_000_000_000);
    p.custody_mut().fund(OPERATOR, 100_000_000_000);
    p.seed_vault(LP, 10_000_000_000).unwrap(); // 10_000 units
    p
}

fn standard_market(p: &mut TestProtocol, settlement_time: u64) -> MarketId {
    p.create_market(&MarketParams {
        min_tick: 0,
        max_tick: 10_000,
        tick_spacing: 100,
        alpha_wad: 100 * WAD,
        settlement_time,
        seed_factors: None,
    })
    .unwrap()
}

/// Everything the protocol holds must be accounted for: vault NAV, the
/// capital stack, market escrows and funds parked in pending requests.
fn assert_conservation(p: &TestProtocol, markets: &[MarketId], tolerance: u128) {
    let v = p.vault_summary().unwrap();
    let mut escrow = 0u128;
    let mut unsettled_fees = 0u128;
    for &id in markets {
        let m = p.market_summary(id).unwrap();
        escrow += m.escrow as u128;
        if !m.settled {
            unsettled_fees += m.fees_accrued as u128;
        }
    }
    let accounted = v.nav + v.backstop + v.treasury + v.pending_deposits + escrow + unsettled_fees;
    let reserve = p.custody().reserve() as u128;
    assert!(
        reserve.abs_diff(accounted) <= tolerance,
        "reserve {reserve} vs accounted {accounted}"
    );
}

#[test]
fn vault_gains_when_settlement_misses_the_position() {
    let mut p = protocol();
    let mkt = standard_market(&mut p, 1_000_000);

    let qty = 50 * MICRO_SCALE;
    let cost = p.quote_buy(mkt, 1_000, 2_000, qty).unwrap();
    let id = p.open_position(TRADER, mkt, 1_000, 2_000, qty, 100).unwrap();

    // settle far outside the position's range
    p.oracle_mut().set(mkt, 8_000, 1_000_050);
    p.submit_settlement(mkt, 1_000_050).unwrap();
    p.finalize_settlement(mkt, 1_000_700).unwrap();

    assert_eq!(p.claim_payout(TRADER, id).unwrap(), 0);

    p.process_batch(0, 1_001_000).unwrap();
    let v = p.vault_summary().unwrap();
    // the vault keeps the premium: NAV grew by roughly cost plus fee
    assert!(v.nav > 10_000_000_000);
    assert!(v.nav < 10_000_000_000 + 2 * cost as u128);
    assert!(v.price > WAD);
    assert_eq!(v.peak, v.price);
    assert_eq!(v.drawdown, 0);
}

#[test]
fn vault_loses_when_the_position_wins() {
    let mut p = protocol();
    let mkt = standard_market(&mut p, 1_000_000);

    let qty = 200 * MICRO_SCALE;
    let cost = p.quote_buy(mkt, 1_000, 2_000, qty).unwrap();
    // a narrow range is cheap: winning pays out more than it cost
    assert!(cost < qty);
    let id = p.open_position(TRADER, mkt, 1_000, 2_000, qty, 100).unwrap();

    p.oracle_mut().set(mkt, 1_500, 1_000_050);
    p.submit_settlement(mkt, 1_000_050).unwrap();
    p.finalize_settlement(mkt, 1_000_700).unwrap();

    let trader_before = p.custody().balance_of(TRADER);
    assert_eq!(p.claim_payout(TRADER, id).unwrap(), qty);
    assert_eq!(p.custody().balance_of(TRADER), trader_before + qty);

    p.process_batch(0, 1_001_000).unwrap();
    let v = p.vault_summary().unwrap();
    assert!(v.nav < 10_000_000_000);
    assert!(v.price < WAD);
    // peak stays at the all-time high
    assert_eq!(v.peak, WAD);
    assert!(v.drawdown > 0 && v.drawdown < WAD);

    assert_conservation(&p, &[mkt], 10);
}

#[test]
fn price_peak_drawdown_across_two_batches() {
    let mut p = protocol();

    // batch 0: vault wins a premium
    let m0 = standard_market(&mut p, 1_000_000);
    let id0 = p
        .open_position(TRADER, m0, 1_000, 2_000, 300 * MICRO_SCALE, 100)
        .unwrap();
    p.oracle_mut().set(m0, 9_000, 1_000_050);
    p.submit_settlement(m0, 1_000_050).unwrap();
    p.finalize_settlement(m0, 1_000_700).unwrap();
    p.claim_payout(TRADER, id0).unwrap();
    p.process_batch(0, 1_001_000).unwrap();
    let after_gain = p.vault_summary().unwrap();
    assert!(after_gain.price > WAD);
    assert_eq!(after_gain.peak, after_gain.price);

    // batch 1: a winning trader drags the price back down
    let m1 = standard_market(&mut p, 2_000_000);
    let id1 = p
        .open_position(TRADER, m1, 1_000, 2_000, 300 * MICRO_SCALE, 1_100_000)
        .unwrap();
    p.oracle_mut().set(m1, 1_500, 2_000_050);
    p.submit_settlement(m1, 2_000_050).unwrap();
    p.finalize_settlement(m1, 2_000_700).unwrap();
    p.claim_payout(TRADER, id1).unwrap();
    p.process_batch(1, 2_001_000).unwrap();

    let after_loss = p.vault_summary().unwrap();
    assert!(after_loss.price < after_gain.price);
    // peak never falls
    assert_eq!(after_loss.peak, after_gain.peak);
    assert!(after_loss.drawdown > 0);

    assert_conservation(&p, &[m0, m1], 10);
}

#[test]
fn deposit_joins_before_a_zero_pnl_batch() {
    let mut p = protocol();
    let depositor: AccountId = 21;
    p.custody_mut().fund(depositor, 500_000_000);

    p.request_deposit(depositor, 500_000_000).unwrap();
    p.process_batch(0, 10_000).unwrap();
    let minted = p.claim_deposit(depositor).unwrap();
    // pe stays 1.0 across a zero-P&L batch: 1:1 mint, no refund
    assert_eq!(minted, 500_000_000);
    assert_eq!(p.custody().balance_of(depositor), 0);
    assert_eq!(p.share_balance_of(depositor), 500_000_000);

    let v = p.vault_summary().unwrap();
    assert_eq!(v.nav, 10_500_000_000);
    assert_eq!(v.shares, 10_500_000_000);
    assert_eq!(v.price, WAD);
}

#[test]
fn withdrawal_respects_the_claim_lag() {
    let mut p = protocol();
    p.request_withdraw(LP, 4_000_000_000).unwrap();
    p.process_batch(0, 10_000).unwrap();
    // processed but lagged one batch
    assert_eq!(p.claim_withdraw(LP), Err(CoreError::RequestNotResolved));
    p.process_batch(1, 20_000).unwrap();
    assert_eq!(p.claim_withdraw(LP).unwrap(), 4_000_000_000);

    let v = p.vault_summary().unwrap();
    assert_eq!(v.nav, 6_000_000_000);
    assert_eq!(v.shares, 6_000_000_000);
}

#[test]
fn failed_settlement_takes_the_secondary_path() {
    let mut p = protocol();
    let mkt = standard_market(&mut p, 1_000_000);
    let id = p
        .open_position(TRADER, mkt, 1_000, 2_000, 10 * MICRO_SCALE, 100)
        .unwrap();

    // the oracle's candidate is disputed; no finalize happens
    p.oracle_mut().set(mkt, 1_500, 1_000_050);
    p.submit_settlement(mkt, 1_000_050).unwrap();
    p.mark_settlement_failed(mkt, 1_000_700).unwrap();

    // the operator supplies the real outcome
    p.finalize_secondary(mkt, 1_500).unwrap();
    assert!(p.market_summary(mkt).unwrap().settled);
    assert_eq!(p.claim_payout(TRADER, id).unwrap(), 10 * MICRO_SCALE);
    p.process_batch(0, 1_001_000).unwrap();
    assert_conservation(&p, &[mkt], 10);
}

#[test]
fn reopen_restores_trading_and_the_batch_record() {
    let mut p = protocol();
    let mkt = standard_market(&mut p, 1_000_000);
    let id = p
        .open_position(TRADER, mkt, 1_000, 2_000, 10 * MICRO_SCALE, 100)
        .unwrap();
    p.oracle_mut().set(mkt, 1_500, 1_000_050);
    p.submit_settlement(mkt, 1_000_050).unwrap();
    p.finalize_settlement(mkt, 1_000_700).unwrap();

    p.reopen_market(mkt, 2_000_000, 1_000_800).unwrap();
    let m = p.market_summary(mkt).unwrap();
    assert!(m.trading);
    assert_eq!(m.escrow, 0);

    // trading genuinely resumes under the new settlement time
    p.increase_position(TRADER, id, 5 * MICRO_SCALE, 1_000_900)
        .unwrap();

    // the batch now processes as if the settlement never happened
    p.process_batch(0, 1_001_000).unwrap();
    let snap = p.batch_summary(0).unwrap().snapshot;
    assert_eq!(snap.lt, 0);
    assert_eq!(snap.fees, 0);

    // the second settlement cycle completes on the new clock
    p.oracle_mut().set(mkt, 1_500, 2_000_050);
    p.submit_settlement(mkt, 2_000_050).unwrap();
    p.finalize_settlement(mkt, 2_000_700).unwrap();
    assert_eq!(p.claim_payout(TRADER, id).unwrap(), 15 * MICRO_SCALE);
    p.process_batch(1, 2_001_000).unwrap();
    assert_conservation(&p, &[mkt], 10);
}

#[test]
fn claimed_settlement_cannot_reopen() {
    let mut p = protocol();
    let mkt = standard_market(&mut p, 1_000_000);
    let qty = 50 * MICRO_SCALE;
    let id = p.open_position(TRADER, mkt, 1_000, 2_000, qty, 100).unwrap();

    p.oracle_mut().set(mkt, 1_500, 1_000_050);
    p.submit_settlement(mkt, 1_000_050).unwrap();
    p.finalize_settlement(mkt, 1_000_700).unwrap();
    assert_eq!(p.claim_payout(TRADER, id).unwrap(), qty);

    // once the payout is gone the settlement is final: no reopen, no
    // secondary path, and no re-counted loss
    assert_eq!(
        p.reopen_market(mkt, 2_000_000, 1_000_800),
        Err(CoreError::MarketHasClaims(mkt))
    );
    assert_eq!(
        p.mark_settlement_failed(mkt, 1_000_800),
        Err(CoreError::AlreadySettled(mkt))
    );
    let m = p.market_summary(mkt).unwrap();
    assert!(m.settled);
    assert_eq!(m.escrow, 0);

    p.process_batch(0, 1_001_000).unwrap();
    // the loss is recorded exactly once and custody still backs the book
    assert_eq!(p.batch_summary(1), None);
    assert_conservation(&p, &[mkt], 10);
}

#[test]
fn backstop_grant_holds_the_floor_end_to_end() {
    // small vault, big winning trade: the loss would breach the 30% floor
    init_logging();
    let mut cfg = ProtocolConfig::sample();
    cfg.waterfall.backstop_fill_bps = 0;
    // report-only gate: the small vault could not otherwise carry this alpha
    cfg.risk.enforce = false;
    let mut p = Protocol::new(
        cfg,
        InMemoryCustody::new(),
        InMemoryRegistry::new(),
        InMemoryOracle::new(),
        ProportionalFeePolicy { fee_bps: 0 },
    )
    .unwrap();
    p.custody_mut().fund(LP, 10_000_000_000);
    p.custody_mut().fund(TRADER, 10_000_000_000);
    p.custody_mut().fund(OPERATOR, 10_000_000_000);
    p.seed_vault(LP, 1_000_000_000).unwrap(); // 1000 units
    p.fund_backstop(OPERATOR, 1_000_000_000).unwrap();

    // a concentrated prior commits tail budget for the grant
    let mkt = p
        .create_market(&MarketParams {
            min_tick: 0,
            max_tick: 10_000,
            tick_spacing: 100,
            alpha_wad: 100 * WAD,
            settlement_time: 1_000_000,
            seed_factors: Some(vec![50 * WAD; 100]),
        })
        .unwrap();
    let tail = p.market_summary(mkt).unwrap().tail_budget;
    // ln 50 ~ 3.912: roughly 391 units of committed budget
    assert!(tail > 390_000_000 && tail < 392_000_000, "tail {tail}");

    // two narrow bins: a win here costs the vault close to the full budget
    let qty = 1_500 * MICRO_SCALE;
    let id = p.open_position(TRADER, mkt, 1_000, 1_200, qty, 100).unwrap();
    p.oracle_mut().set(mkt, 1_100, 1_000_050);
    p.submit_settlement(mkt, 1_000_050).unwrap();
    p.finalize_settlement(mkt, 1_000_700).unwrap();
    p.claim_payout(TRADER, id).unwrap();

    let lt = p.batch_summary(0).unwrap().snapshot.lt;
    assert!(lt < -350_000_000, "loss should breach the floor, lt {lt}");

    p.process_batch(0, 1_001_000).unwrap();
    let snap = p.batch_summary(0).unwrap().snapshot;
    assert!(snap.grant > 0);
    // the floor held: NAV >= 70% of 1000
    let v = p.vault_summary().unwrap();
    assert!(v.nav >= 700_000_000);
}

#[test]
fn config_loads_from_toml_and_summaries_serialize() {
    let toml_src = toml_of_sample();
    let cfg = ProtocolConfig::from_toml_str(&toml_src).unwrap();
    assert_eq!(cfg, ProtocolConfig::sample());

    let p = protocol();
    let v = p.vault_summary().unwrap();
    let json = serde_json::to_string(&v).unwrap();
    assert!(json.contains("\"nav\""));
}

fn toml_of_sample() -> String {
    toml::to_string(&ProtocolConfig::sample()).unwrap()
}

#[test]
fn shared_protocol_serves_multiple_threads() {
    let p = protocol();
    let shared = SharedProtocol::new(p);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let shared = shared.clone();
            std::thread::spawn(move || {
                let trader = 100 + i as AccountId;
                shared.with(|p| {
                    p.custody_mut().fund(trader, 1_000_000_000);
                    p.request_deposit(trader, 1_000_000_000).unwrap();
                });
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    shared.with(|p| {
        let v = p.vault_summary().unwrap();
        assert_eq!(v.pending_deposits, 4_000_000_000);
        p.process_batch(0, 10_000).unwrap();
        for i in 0..4 {
            assert_eq!(p.claim_deposit(100 + i).unwrap(), 1_000_000_000);
        }
    });
}
