// ============================================================================
// gatekeeper-db — CLI inspection and admin tool for the credit ledger
// ============================================================================
// Usage:
//   gatekeeper-db stats                         Show ledger statistics
//   gatekeeper-db list-users [--suspended]      List accounts
//   gatekeeper-db usage USER_ID [--limit N]     Show a user's usage log
//   gatekeeper-db credit USER_ID AMOUNT         Top up an account
//   gatekeeper-db export --format json          Export full ledger as JSON
//   gatekeeper-db prune --older-than 30         Prune old usage entries
//   gatekeeper-db backup DEST                   Copy the ledger file
// ============================================================================

use anyhow::Result;
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use gatekeeper_core::{ChannelRequirement, GateConfig, LedgerDb};

/// Gatekeeper ledger inspection and administration tool
#[derive(Parser)]
#[command(name = "gatekeeper-db", version, about = "Inspect and manage the gatekeeper credit ledger")]
struct Cli {
    /// Path to the ledger file (default: ~/.gatekeeper/ledger.redb)
    #[arg(long, global = true)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show ledger statistics (users, credits, usage, channels)
    Stats,

    /// List accounts
    ListUsers {
        /// Only show suspended accounts
        #[arg(long)]
        suspended: bool,
    },

    /// Show one account in detail
    ShowUser {
        user_id: i64,
    },

    /// Show a user's usage log, most recent first
    Usage {
        user_id: i64,

        /// Maximum entries to print
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Top up an account's balance
    Credit {
        user_id: i64,
        amount: u32,
    },

    /// Suspend an account
    Suspend {
        user_id: i64,

        /// Reason shown to the user
        #[arg(long)]
        reason: Option<String>,
    },

    /// Reinstate a suspended account
    Unsuspend {
        user_id: i64,
    },

    /// Grant operator (gate-exempt, admin surface) status
    AddOperator {
        user_id: i64,

        /// Operator performing the grant
        #[arg(long, default_value = "0")]
        added_by: i64,
    },

    /// Revoke operator status
    RemoveOperator {
        user_id: i64,
    },

    /// Add a required channel
    AddChannel {
        /// Channel handle without '@'
        username: String,

        /// Display name (defaults to the handle)
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        invite_link: Option<String>,

        #[arg(long)]
        private: bool,

        /// Join-button label
        #[arg(long)]
        button_text: Option<String>,
    },

    /// Remove a required channel
    RemoveChannel {
        username: String,
    },

    /// List required channels
    ListChannels,

    /// Export full ledger contents as JSON
    Export {
        /// Output format (currently only json is supported)
        #[arg(long, default_value = "json")]
        format: String,
    },

    /// Prune old usage entries
    Prune {
        /// Delete usage entries older than this many days
        #[arg(long, default_value = "30")]
        older_than: i64,

        /// Show what would be pruned without actually deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Copy the ledger file to a backup destination
    Backup {
        dest: String,
    },
}

fn format_timestamp(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("(invalid: {})", ts))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let db = LedgerDb::open(cli.db_path.as_deref(), GateConfig::from_env())?;

    match cli.command {
        Commands::Stats => cmd_stats(&db),
        Commands::ListUsers { suspended } => cmd_list_users(&db, suspended),
        Commands::ShowUser { user_id } => cmd_show_user(&db, user_id),
        Commands::Usage { user_id, limit } => cmd_usage(&db, user_id, limit),
        Commands::Credit { user_id, amount } => cmd_credit(&db, user_id, amount),
        Commands::Suspend { user_id, reason } => cmd_suspend(&db, user_id, true, reason),
        Commands::Unsuspend { user_id } => cmd_suspend(&db, user_id, false, None),
        Commands::AddOperator { user_id, added_by } => {
            db.add_operator(user_id, added_by)?;
            println!("User {} is now an operator.", user_id);
            Ok(())
        }
        Commands::RemoveOperator { user_id } => {
            if db.remove_operator(user_id)? {
                println!("User {} is no longer an operator.", user_id);
            } else {
                println!("User {} was not an operator.", user_id);
            }
            Ok(())
        }
        Commands::AddChannel {
            username,
            name,
            invite_link,
            private,
            button_text,
        } => cmd_add_channel(&db, username, name, invite_link, private, button_text),
        Commands::RemoveChannel { username } => {
            if db.remove_channel(&username)? {
                println!("Removed channel @{}.", username);
            } else {
                println!("Channel @{} was not configured.", username);
            }
            Ok(())
        }
        Commands::ListChannels => cmd_list_channels(&db),
        Commands::Export { format } => cmd_export(&db, &format),
        Commands::Prune { older_than, dry_run } => cmd_prune(&db, older_than, dry_run),
        Commands::Backup { dest } => cmd_backup(&db, &dest),
    }
}

fn cmd_stats(db: &LedgerDb) -> Result<()> {
    let stats = db.stats()?;

    println!("=== Gatekeeper Ledger Stats ===");
    println!("Ledger: {}", db.path().display());
    println!();
    println!("Users:     {} total ({} suspended)", stats.total_users, stats.suspended_users);
    println!("Credits:   {} outstanding", stats.total_credits_outstanding);
    println!("Usage:     {} entries", stats.total_usage_entries);
    println!("Channels:  {}", stats.total_channels);
    println!("Operators: {}", stats.total_operators);

    Ok(())
}

fn cmd_list_users(db: &LedgerDb, suspended_only: bool) -> Result<()> {
    let mut accounts = db.list_accounts()?;
    if suspended_only {
        accounts.retain(|a| a.suspended);
    }

    if accounts.is_empty() {
        println!("No accounts found.");
        return Ok(());
    }

    println!(
        "{:<14}  {:<20}  {:>8}  {:>9}  {:>8}  {}",
        "USER ID", "HANDLE", "BALANCE", "REFERRALS", "ACTIONS", "REGISTERED"
    );
    println!("{}", "-".repeat(90));

    for account in &accounts {
        let handle = account.handle.chars().take(20).collect::<String>();
        println!(
            "{:<14}  {:<20}  {:>8}  {:>9}  {:>8}  {}{}",
            account.user_id,
            handle,
            account.balance,
            account.referral_count,
            account.lifetime_action_count,
            format_timestamp(account.registered_at),
            if account.suspended { "  [SUSPENDED]" } else { "" },
        );
    }

    println!("\nTotal: {} accounts", accounts.len());
    Ok(())
}

fn cmd_show_user(db: &LedgerDb, user_id: i64) -> Result<()> {
    let Some(account) = db.get_account(user_id)? else {
        println!("No account with id {}.", user_id);
        return Ok(());
    };

    println!("User:        {} (@{})", account.display_name(), account.handle);
    println!("ID:          {}", account.user_id);
    println!("Balance:     {} credit(s)", account.balance);
    println!("Registered:  {}", format_timestamp(account.registered_at));
    println!("Last seen:   {}", format_timestamp(account.last_seen_at));
    println!("Last grant:  {}", format_timestamp(account.last_grant_at));
    println!("Referred by: {}", account.referred_by.map(|r| r.to_string()).unwrap_or_else(|| "-".into()));
    println!("Referrals:   {}", account.referral_count);
    println!("Actions:     {}", account.lifetime_action_count);
    if account.suspended {
        println!(
            "Suspended:   yes ({})",
            account.suspend_reason.as_deref().unwrap_or("no reason recorded")
        );
    }
    Ok(())
}

fn cmd_usage(db: &LedgerDb, user_id: i64, limit: usize) -> Result<()> {
    let entries = db.usage_for_user(user_id, Some(limit))?;
    if entries.is_empty() {
        println!("No usage entries for {}.", user_id);
        return Ok(());
    }

    println!("{:<22}  {:<12}  {:<8}  {}", "TIME", "ACTION", "CONTEXT", "QUERY");
    println!("{}", "-".repeat(80));
    for entry in &entries {
        let query = entry.query_text.chars().take(30).collect::<String>();
        println!(
            "{:<22}  {:<12}  {:<8}  {}",
            format_timestamp(entry.timestamp),
            entry.action_label,
            entry.context_kind,
            query
        );
    }
    println!("\nTotal: {} entries", entries.len());
    Ok(())
}

fn cmd_credit(db: &LedgerDb, user_id: i64, amount: u32) -> Result<()> {
    if db.credit(user_id, amount)? {
        let balance = db.read_balance(user_id)?;
        println!("Credited {} to {}. New balance: {}.", amount, user_id, balance);
    } else {
        println!("No account with id {}.", user_id);
    }
    Ok(())
}

fn cmd_suspend(db: &LedgerDb, user_id: i64, suspended: bool, reason: Option<String>) -> Result<()> {
    if db.set_suspended(user_id, suspended, reason)? {
        println!(
            "Account {} {}.",
            user_id,
            if suspended { "suspended" } else { "reinstated" }
        );
    } else {
        println!("No account with id {}.", user_id);
    }
    Ok(())
}

fn cmd_add_channel(
    db: &LedgerDb,
    username: String,
    name: Option<String>,
    invite_link: Option<String>,
    private: bool,
    button_text: Option<String>,
) -> Result<()> {
    let username = username.trim_start_matches('@').to_string();
    let channel = ChannelRequirement {
        name: name.unwrap_or_else(|| username.clone()),
        invite_link: invite_link.unwrap_or_else(|| format!("https://t.me/{}", username)),
        is_private: private,
        button_text,
        username,
    };
    db.add_channel(&channel)?;
    println!("Added channel @{}.", channel.username);
    println!("Note: running bots pick this up on their next membership-gate reload.");
    Ok(())
}

fn cmd_list_channels(db: &LedgerDb) -> Result<()> {
    let channels = db.list_channels()?;
    if channels.is_empty() {
        println!("No required channels configured.");
        return Ok(());
    }

    for channel in &channels {
        println!(
            "@{:<24}  {}  {}{}",
            channel.username,
            channel.name,
            channel.invite_link,
            if channel.is_private { "  [private]" } else { "" },
        );
    }
    println!("\nTotal: {} channels", channels.len());
    Ok(())
}

fn cmd_export(db: &LedgerDb, format: &str) -> Result<()> {
    if format != "json" {
        anyhow::bail!("Unsupported format '{}'. Only 'json' is supported.", format);
    }

    let accounts = db.list_accounts()?;
    let usage = db.list_usage(None)?;
    let channels = db.list_channels()?;
    let operators = db.list_operators()?;
    let stats = db.stats()?;

    let export = serde_json::json!({
        "exported_at": Utc::now().to_rfc3339(),
        "stats": stats,
        "accounts": accounts,
        "usage": usage,
        "channels": channels,
        "operators": operators,
    });

    println!("{}", serde_json::to_string_pretty(&export)?);
    Ok(())
}

fn cmd_prune(db: &LedgerDb, older_than: i64, dry_run: bool) -> Result<()> {
    if dry_run {
        println!("=== DRY RUN — no data will be deleted ===\n");

        let cutoff = Utc::now().timestamp() - (older_than * 86400);
        let stale: Vec<_> = db
            .list_usage(None)?
            .into_iter()
            .filter(|e| e.timestamp < cutoff)
            .collect();

        println!(
            "Would prune {} usage entries older than {} days",
            stale.len(),
            older_than
        );
        for entry in &stale {
            println!(
                "  - {} {} by {} ({})",
                entry.entry_id,
                entry.action_label,
                entry.user_id,
                format_timestamp(entry.timestamp)
            );
        }
    } else {
        let pruned = db.prune_usage(older_than)?;
        println!("Pruned {} usage entries (older than {} days)", pruned, older_than);
    }

    Ok(())
}

fn cmd_backup(db: &LedgerDb, dest: &str) -> Result<()> {
    let bytes = std::fs::copy(db.path(), dest)?;
    println!("Backed up {} ({} bytes) to {}", db.path().display(), bytes, dest);
    Ok(())
}
