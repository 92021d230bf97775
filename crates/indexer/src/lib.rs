//! The three indexing jobs and their shared plumbing.
//!
//! Each job is its own process: `unified-scanner` discovers and
//! classifies addresses touched by ERC-20 transfers, `fund-updater`
//! refreshes USD valuations, `data-revalidator` repairs rows whose
//! classification is incomplete or stale. They share the job frame in
//! [`run`], the pure classification helpers in [`domain`], and the
//! persistence layer.

pub mod arguments;
pub mod domain;
pub mod fund;
pub mod revalidate;
pub mod run;
pub mod scanner;
pub mod token_list;

use {clap::Parser, std::process::ExitCode};

pub async fn start_scanner(args: impl Iterator<Item = String>) -> ExitCode {
    let args = arguments::ScannerArguments::parse_from(args);
    run::startup("unified-scanner", &args.shared);
    let config = args.scanner_config();
    run::execute("unified-scanner", args.shared, true, move |env| async move {
        scanner::UnifiedScanner::new(env, config).run().await
    })
    .await
}

pub async fn start_fund_updater(args: impl Iterator<Item = String>) -> ExitCode {
    let args = arguments::FundArguments::parse_from(args);
    run::startup("fund-updater", &args.shared);
    let config = args.fund_config();
    run::execute("fund-updater", args.shared, true, move |env| async move {
        fund::FundUpdater::new(env, config).run().await
    })
    .await
}

pub async fn start_revalidator(args: impl Iterator<Item = String>) -> ExitCode {
    let args = arguments::RevalidateArguments::parse_from(args);
    run::startup("data-revalidator", &args.shared);
    let config = args.revalidate_config();
    // The revalidator skips the schema bootstrap so its startup cannot
    // contend on DDL locks with an actively writing scanner.
    run::execute("data-revalidator", args.shared, false, move |env| async move {
        revalidate::DataRevalidator::new(env, config).run().await
    })
    .await
}
