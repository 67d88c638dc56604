//! CLI commands

use cbi_core::{Address, Amount};
use cbi_engine::{BehaviorCounterStore, ReconciliationEngine, SqliteBehaviorStore};
use cbi_events::EventReader;
use cbi_scoring::ScoreModel;
use chrono::Duration;
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::context::AppContext;

/// Register a new borrower at the base score.
pub async fn register(ctx: &AppContext, user: &str) -> Result<(), anyhow::Error> {
    let address = Address::new(user)?;
    let record = ctx.apply(|ledger| ledger.register_user(&address))?;

    println!(
        "✅ Registered {} at score {} (seq: {})",
        address,
        ctx.bounds().base,
        record.sequence
    );
    Ok(())
}

/// Request a loan for a borrower.
///
/// Rejects up front when the pool cannot fund the principal, so the journal
/// never carries a loan the engine would only alarm on.
pub async fn request_loan(
    ctx: &AppContext,
    user: &str,
    amount: Decimal,
    duration_days: i64,
) -> Result<(), anyhow::Error> {
    let address = Address::new(user)?;
    let principal = Amount::positive(amount)?;

    let available = ctx.pool.balance().await?;
    if available < principal.value() {
        anyhow::bail!(
            "Pool cannot fund loan: available {}, required {}",
            available,
            principal.value()
        );
    }

    let record =
        ctx.apply(|ledger| ledger.request_loan(&address, principal, Duration::days(duration_days)))?;

    println!(
        "✅ Loan requested: {} for {} over {} days (seq: {})",
        principal, address, duration_days, record.sequence
    );
    println!("   Run `cbi reconcile` to move pool funds and update counters");
    Ok(())
}

/// Repay a loan as its borrower.
pub async fn repay(ctx: &AppContext, user: &str, loan_id: u64) -> Result<(), anyhow::Error> {
    let address = Address::new(user)?;
    let record = ctx.apply(|ledger| ledger.repay_loan(&address, loan_id))?;

    println!("✅ Loan {} repaid by {} (seq: {})", loan_id, address, record.sequence);
    Ok(())
}

/// Mark an overdue loan as defaulted (admin only).
pub async fn mark_default(ctx: &AppContext, loan_id: u64) -> Result<(), anyhow::Error> {
    let record = ctx.apply(|ledger| {
        let admin = ledger.admin().clone();
        ledger.mark_loan_default(&admin, loan_id)
    })?;

    println!("✅ Loan {} marked defaulted (seq: {})", loan_id, record.sequence);
    Ok(())
}

/// Set or clear a borrower's blacklist flag (admin only).
pub async fn blacklist(ctx: &AppContext, user: &str, flag: bool) -> Result<(), anyhow::Error> {
    let address = Address::new(user)?;
    let record = ctx.apply(|ledger| {
        let admin = ledger.admin().clone();
        ledger.blacklist_user(&admin, &address, flag)
    })?;

    if flag {
        println!("✅ {} blacklisted (seq: {})", address, record.sequence);
    } else {
        println!("✅ {} removed from blacklist (seq: {})", address, record.sequence);
    }
    Ok(())
}

/// Manually set a borrower's CBI score (admin only, clamped into bounds).
pub async fn update_score(ctx: &AppContext, user: &str, score: i32) -> Result<(), anyhow::Error> {
    let address = Address::new(user)?;
    let record = ctx.apply(|ledger| {
        let admin = ledger.admin().clone();
        ledger.update_cbi_score(&admin, &address, score)
    })?;

    let profile = ctx
        .ledger
        .get_user(&address)
        .ok_or_else(|| anyhow::anyhow!("User vanished after score update"))?;
    println!(
        "✅ Score for {} set to {} (seq: {})",
        address, profile.cbi_score, record.sequence
    );
    Ok(())
}

/// Deposit funds into the pool.
pub async fn deposit(ctx: &AppContext, amount: Decimal) -> Result<(), anyhow::Error> {
    ctx.pool.deposit(amount).await?;
    let balance = ctx.pool.balance().await?;

    println!("✅ Deposited {} (pool balance: {})", amount, balance);
    Ok(())
}

/// Show the pool balance and recent transactions.
pub async fn pool(ctx: &AppContext, limit: u32) -> Result<(), anyhow::Error> {
    let balance = ctx.pool.balance().await?;
    let transactions = ctx.pool.transactions(limit).await?;

    println!("Pool balance: {}", balance);
    if transactions.is_empty() {
        println!("No transactions");
        return Ok(());
    }

    println!("{:-<60}", "");
    println!("{:>6} | {:>10} | {:>14} | {:>8}", "ID", "Type", "Amount", "Loan");
    println!("{:-<60}", "");
    for tx in &transactions {
        let loan = tx
            .loan_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>6} | {:>10} | {:>14} | {:>8}",
            tx.id, tx.tx_type, tx.amount, loan
        );
    }
    Ok(())
}

/// Show a borrower's profile, counters, and model score.
pub async fn user(ctx: &AppContext, user: &str) -> Result<(), anyhow::Error> {
    let address = Address::new(user)?;
    let Some(profile) = ctx.ledger.get_user(&address) else {
        anyhow::bail!("User not registered: {}", address);
    };

    println!("User {}", address);
    println!("  CBI score:   {}", profile.cbi_score);
    println!("  Total loans: {}", profile.total_loans);
    println!("  Blacklisted: {}", profile.blacklisted);

    let store = SqliteBehaviorStore::connect(ctx.behavior_path()).await?;
    let counters = store.counters(&address).await?;
    let model = ScoreModel::new(ctx.scoring);

    println!("  Behavior:");
    println!("    early:      {}", counters.early_payments);
    println!("    on-time:    {}", counters.on_time_payments);
    println!("    late:       {}", counters.late_payments);
    println!("    missed:     {}", counters.missed_payments);
    println!("    consistent: {}", counters.consistent_repayments);
    println!("  Model score:  {}", model.score(&counters));
    Ok(())
}

/// List loans, optionally filtered by borrower.
pub async fn loans(ctx: &AppContext, user: Option<&str>) -> Result<(), anyhow::Error> {
    let loans = match user {
        Some(user) => ctx.ledger.loans_for(&Address::new(user)?),
        None => (0..ctx.ledger.loan_count())
            .filter_map(|id| ctx.ledger.get_loan(id))
            .collect(),
    };

    if loans.is_empty() {
        println!("No loans found");
        return Ok(());
    }

    println!("{:-<80}", "");
    println!(
        "{:>6} | {:>12} | {:>12} | {:>12} | {:>20}",
        "ID", "Borrower", "Amount", "Status", "Due"
    );
    println!("{:-<80}", "");
    for loan in &loans {
        println!(
            "{:>6} | {:>12} | {:>12} | {:>12} | {:>20}",
            loan.id,
            loan.borrower,
            loan.amount,
            loan.status(),
            loan.due_date.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

/// Run the reconciliation engine over the journal.
///
/// Moves pool funds for any unprocessed loan/repayment events, updates
/// behavior counters, and writes recomputed CBI scores back to the ledger
/// (journaling them). Safe to run any number of times.
pub async fn reconcile(ctx: &AppContext) -> Result<(), anyhow::Error> {
    let counters = Arc::new(SqliteBehaviorStore::connect(ctx.behavior_path()).await?);
    let engine = ReconciliationEngine::new(
        counters,
        Arc::clone(&ctx.pool),
        ScoreModel::new(ctx.scoring),
        Arc::new(ctx.score_writer()),
    );

    let reader = EventReader::from_directory(ctx.journal_path())?;
    let summary = engine.replay(&reader).await?;
    let flushed = engine.flush_pending().await;

    println!(
        "✅ Reconciled: {} processed, {} duplicates, {} skipped, {} flushed",
        summary.processed, summary.duplicates, summary.skipped, flushed
    );
    if engine.pending_len() > 0 {
        println!("⚠️  {} score write-backs still pending", engine.pending_len());
    }
    println!("   Pool balance: {}", ctx.pool.balance().await?);
    Ok(())
}
