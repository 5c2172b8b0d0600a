use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};

use storekeeper_core::config::{CloneConfig, PaymentsConfig, StoreConfig};
use storekeeper_core::logging::{self, LogLevel};
use storekeeper_core::tasks::migrate_ids::{self, MigrateConfig, RunMode};
use storekeeper_core::tasks::payments_export::{self, HttpPaymentsApi};
use storekeeper_core::tasks::{
    backfill_name, clone_db, copy_fields, date_range_update, rename_offer_ids, rewrite_status,
};
use storekeeper_core::{interrupt, Store};

#[derive(Parser)]
#[command(name = "storekeeper")]
#[command(about = "Storekeeper CLI - one-shot database maintenance tasks")]
#[command(version)]
struct Cli {
    /// Log level: error, warn, info or debug
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Skip the confirmation prompt
    #[arg(long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate user identifiers to surrogate ids and verify references
    MigrateIds {
        /// Preview the migration without writing
        #[arg(long)]
        dry_run: bool,
        /// Only analyze and verify the current state
        #[arg(long, conflicts_with = "dry_run")]
        check_only: bool,
    },
    /// Copy users' phone fields to their renamed counterparts
    CopyPhoneFields {
        #[arg(long)]
        dry_run: bool,
        /// Overwrite targets that already have a value
        #[arg(long)]
        no_skip_existing: bool,
    },
    /// Backfill users' name from firstName/lastName
    BackfillName {
        #[arg(long)]
        dry_run: bool,
        /// Also rewrite names that are already set
        #[arg(long)]
        no_skip_existing: bool,
    },
    /// Rename id -> offerId inside orders' offers arrays
    RenameOfferIds {
        #[arg(long)]
        dry_run: bool,
    },
    /// Rewrite the retired PREPARING_FOR_DISPATCH delivery status
    UpdateDeliveryStatus {
        #[arg(long)]
        dry_run: bool,
    },
    /// Mark settled orders in a date range as DELIVERED
    UpdateOrdersByDateRange {
        /// Inclusive range start (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        start_date: String,
        /// Inclusive range end (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        end_date: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Clone a database into a test environment
    CloneDb {
        #[arg(long)]
        dry_run: bool,
    },
    /// Export per-customer payment aggregates to CSV
    ExportPaymentCustomers {
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<bool> {
    let level = LogLevel::parse(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;
    logging::set_log_level(level);
    install_signal_handler()?;

    let success = match cli.command {
        Commands::MigrateIds {
            dry_run,
            check_only,
        } => run_migrate_ids(dry_run, check_only, cli.yes)?,
        Commands::CopyPhoneFields {
            dry_run,
            no_skip_existing,
        } => {
            let env = store_config(dry_run)?;
            let config =
                copy_fields::CopyFieldsConfig::phone_fields(
                    env.batch_size,
                    env.dry_run,
                    env.skip_existing && !no_skip_existing,
                );
            let plan = format!(
                "copy {} field mapping(s) on '{}' in {}",
                config.mappings.len(),
                config.collection,
                endpoint(&env)
            );
            if !confirm(&plan, env.dry_run, cli.yes)? {
                return Ok(true);
            }
            logging::init_run_log("copy_phone_fields.log");
            let store = open_store(&env)?;
            copy_fields::run(&store, &config)?.is_success()
        }
        Commands::BackfillName {
            dry_run,
            no_skip_existing,
        } => {
            let env = store_config(dry_run)?;
            let config = backfill_name::BackfillNameConfig::for_users(
                env.batch_size,
                env.dry_run,
                env.skip_existing && !no_skip_existing,
            );
            let plan = format!(
                "backfill 'name' on '{}' in {}",
                config.collection,
                endpoint(&env)
            );
            if !confirm(&plan, env.dry_run, cli.yes)? {
                return Ok(true);
            }
            logging::init_run_log("backfill_name.log");
            let store = open_store(&env)?;
            backfill_name::run(&store, &config)?.is_success()
        }
        Commands::RenameOfferIds { dry_run } => {
            let env = store_config(dry_run)?;
            let config =
                rename_offer_ids::RenameOfferIdsConfig::for_orders(env.batch_size, env.dry_run);
            let plan = format!(
                "rename {}.{} -> {} on '{}' in {}",
                config.array_field,
                config.old_key,
                config.new_key,
                config.collection,
                endpoint(&env)
            );
            if !confirm(&plan, env.dry_run, cli.yes)? {
                return Ok(true);
            }
            logging::init_run_log("rename_offer_ids.log");
            let store = open_store(&env)?;
            rename_offer_ids::run(&store, &config)?.is_success()
        }
        Commands::UpdateDeliveryStatus { dry_run } => {
            let env = store_config(dry_run)?;
            let config = rewrite_status::RewriteStatusConfig::preparing_for_dispatch(
                env.batch_size,
                env.dry_run,
            );
            let plan = format!(
                "rewrite {} {:?} -> {:?} on '{}' in {}",
                config.field,
                config.from_value,
                config.to_value,
                config.collection,
                endpoint(&env)
            );
            if !confirm(&plan, env.dry_run, cli.yes)? {
                return Ok(true);
            }
            logging::init_run_log("update_delivery_status.log");
            let store = open_store(&env)?;
            rewrite_status::run(&store, &config)?.is_success()
        }
        Commands::UpdateOrdersByDateRange {
            start_date,
            end_date,
            dry_run,
        } => {
            let env = store_config(dry_run)?;
            let config = date_range_update::DateRangeConfig::for_orders(
                &start_date,
                &end_date,
                env.batch_size,
                env.dry_run,
            )?;
            let plan = format!(
                "mark eligible '{}' between {} and {} DELIVERED in {}",
                config.collection,
                date_range_update::format_timestamp(&config.start),
                date_range_update::format_timestamp(&config.end),
                endpoint(&env)
            );
            if !confirm(&plan, env.dry_run, cli.yes)? {
                return Ok(true);
            }
            logging::init_run_log("update_orders_by_date_range.log");
            let store = open_store(&env)?;
            date_range_update::run(&store, &config)?.is_success()
        }
        Commands::CloneDb { dry_run } => {
            let mut config = CloneConfig::from_env()?;
            config.dry_run = config.dry_run || dry_run;
            let plan = format!(
                "clone {}/{} -> {}/{}",
                config.source_uri, config.source_db, config.dest_uri, config.dest_db
            );
            if !confirm(&plan, config.dry_run, cli.yes)? {
                return Ok(true);
            }
            logging::init_run_log("clone_db.log");
            let source = Store::connect(&config.source_uri, &config.source_db)
                .context("failed to open source database")?;
            let dest = Store::create(&config.dest_uri, &config.dest_db)
                .context("failed to open destination database")?;
            clone_db::run(&source, &dest, &config)?;
            true
        }
        Commands::ExportPaymentCustomers { dry_run } => {
            let mut config = PaymentsConfig::from_env()?;
            config.dry_run = config.dry_run || dry_run;
            let plan = format!(
                "export payment customers from {} to {}",
                config.base_url, config.output_file
            );
            if !confirm(&plan, config.dry_run, cli.yes)? {
                return Ok(true);
            }
            logging::init_run_log("export_payment_customers.log");
            let api = HttpPaymentsApi::new(&config)?;
            payments_export::run(&api, &config)?;
            true
        }
    };

    logging::close_run_log();
    Ok(success)
}

fn run_migrate_ids(dry_run: bool, check_only: bool, yes: bool) -> Result<bool> {
    let env = store_config(dry_run)?;
    let mode = resolve_run_mode(env.dry_run, check_only);
    let config = MigrateConfig::for_users(env.batch_size, mode);
    let plan = format!(
        "migrate '{}' ids (dependents: {:?}) in {}",
        config.primary_collection,
        config.dependent_collections,
        endpoint(&env)
    );
    if !confirm(&plan, mode != RunMode::Live, yes)? {
        return Ok(true);
    }
    logging::init_run_log("user_id_migration.log");
    let store = open_store(&env)?;
    let outcome = migrate_ids::run_migration(&store, &config)?;
    Ok(outcome.is_success())
}

/// `--check-only` wins; otherwise a preview is a preview whether it was
/// requested on the command line or through `STORE_DRY_RUN`. A live run
/// happens only when nothing asked for mutation suppression.
fn resolve_run_mode(dry_run: bool, check_only: bool) -> RunMode {
    if check_only {
        RunMode::CheckOnly
    } else if dry_run {
        RunMode::DryRun
    } else {
        RunMode::Live
    }
}

fn store_config(dry_run_flag: bool) -> Result<StoreConfig> {
    let mut config = StoreConfig::from_env()?;
    config.dry_run = config.dry_run || dry_run_flag;
    Ok(config)
}

fn endpoint(config: &StoreConfig) -> String {
    format!("{}/{}", config.uri, config.db)
}

fn open_store(config: &StoreConfig) -> Result<Store> {
    Store::connect(&config.uri, &config.db)
        .with_context(|| format!("failed to open database {}", endpoint(config)))
}

/// Print the plan and ask for confirmation before a mutating run. Preview
/// runs never prompt. Returns false when the operator declined.
fn confirm(plan: &str, preview: bool, yes: bool) -> Result<bool> {
    println!("Plan: {}", plan);
    if preview {
        println!("(preview run, nothing will be written)");
        return Ok(true);
    }
    if yes {
        return Ok(true);
    }

    print!("Proceed? [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    if answer.trim().eq_ignore_ascii_case("y") {
        Ok(true)
    } else {
        println!("Aborted.");
        Ok(false)
    }
}

/// SIGINT/SIGTERM request a cooperative stop; tasks check the flag
/// between batches and unwind with their store already flushed.
fn install_signal_handler() -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    let mut signals = signal_hook::iterator::Signals::new([SIGINT, SIGTERM])?;
    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            interrupt::request_stop();
        }
    });
    Ok(())
}
