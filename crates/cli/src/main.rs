//! CBI CLI - Main entry point

use cbi_cli::{commands, AppContext};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cbi")]
#[command(about = "CBI - micro-lending reconciliation core", long_about = None)]
struct Cli {
    /// Data directory path
    #[arg(short, long, default_value = "./data")]
    data: PathBuf,

    /// Admin address for privileged operations
    #[arg(long, default_value = "admin")]
    admin: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new borrower
    Register {
        /// Borrower address
        user: String,
    },

    /// Request a loan
    RequestLoan {
        /// Borrower address
        user: String,
        /// Principal amount
        amount: Decimal,
        /// Loan duration in days
        #[arg(long, default_value = "30")]
        days: i64,
    },

    /// Repay a loan (borrower only)
    Repay {
        /// Borrower address
        user: String,
        /// Loan ID
        loan_id: u64,
    },

    /// Mark an overdue loan as defaulted (admin)
    MarkDefault {
        /// Loan ID
        loan_id: u64,
    },

    /// Set or clear a borrower's blacklist flag (admin)
    Blacklist {
        /// Borrower address
        user: String,
        /// Clear the flag instead of setting it
        #[arg(long)]
        clear: bool,
    },

    /// Manually set a borrower's CBI score (admin)
    UpdateScore {
        /// Borrower address
        user: String,
        /// New score (clamped into bounds)
        score: i32,
    },

    /// Deposit funds into the pool
    Deposit {
        /// Amount to deposit
        amount: Decimal,
    },

    /// Show the pool balance and recent transactions
    Pool {
        /// Maximum number of transactions to show
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Show a borrower's profile and behavior counters
    User {
        /// Borrower address
        user: String,
    },

    /// List loans
    Loans {
        /// Filter by borrower address
        #[arg(long)]
        user: Option<String>,
    },

    /// Run the reconciliation engine over the journal
    Reconcile,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let ctx = AppContext::new(&cli.data, &cli.admin).await?;

    match cli.command {
        Commands::Register { user } => {
            commands::register(&ctx, &user).await?;
        }

        Commands::RequestLoan { user, amount, days } => {
            commands::request_loan(&ctx, &user, amount, days).await?;
        }

        Commands::Repay { user, loan_id } => {
            commands::repay(&ctx, &user, loan_id).await?;
        }

        Commands::MarkDefault { loan_id } => {
            commands::mark_default(&ctx, loan_id).await?;
        }

        Commands::Blacklist { user, clear } => {
            commands::blacklist(&ctx, &user, !clear).await?;
        }

        Commands::UpdateScore { user, score } => {
            commands::update_score(&ctx, &user, score).await?;
        }

        Commands::Deposit { amount } => {
            commands::deposit(&ctx, amount).await?;
        }

        Commands::Pool { limit } => {
            commands::pool(&ctx, limit).await?;
        }

        Commands::User { user } => {
            commands::user(&ctx, &user).await?;
        }

        Commands::Loans { user } => {
            commands::loans(&ctx, user.as_deref()).await?;
        }

        Commands::Reconcile => {
            commands::reconcile(&ctx).await?;
        }
    }

    Ok(())
}
