use crate::crawler::Crawler;
use crate::crawler::Settings;
use crate::crawler::StopReason;
use anyhow::Error;
use clap::Parser;
use etherdump_lib::api::etherscan::EtherscanClient;
use etherdump_lib::api::RecordSource;
use etherdump_lib::config::Config;
use etherdump_lib::storage::Storage;
use log::info;
use log::warn;
use simplelog::CombinedLogger;
use simplelog::*;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

mod crawler;
extern crate log;
extern crate simplelog;

const LOG_FILE_NAME: &str = "etherdump.log";

/// Exit status after a second interrupt, 128 + SIGINT.
const EXIT_INTERRUPTED: i32 = 130;

/// Downloads the source code of verified contracts from Etherscan-like explorers.
#[derive(Parser, Debug)]
#[command(name = "etherdump", version)]
struct Cli {
    /// Explorer to crawl, e.g. etherscan.io or bscscan.com
    #[arg(short, long, default_value = "etherscan.io")]
    chain: String,

    /// Network (sub-domain) of the explorer, e.g. ropsten; mainnet if omitted
    #[arg(short, long)]
    network: Option<String>,

    /// Directory the contracts directory is created in
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Re-download contracts that already exist on disk
    #[arg(long)]
    overwrite: bool,

    /// Stop after downloading this many contracts
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    budget: Option<usize>,

    /// Abort on the first contract whose source can not be retrieved
    #[arg(long)]
    strict: bool,

    /// Set loglevel to DEBUG
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    let output_directory = output_directory(&cli.output, &cli.chain, cli.network.as_deref());
    let storage = Storage::new(&output_directory)?;
    init_logger(cli.verbose, storage.root())?;

    let config = Config::new()?;
    let client = EtherscanClient::new(&config, &cli.chain, cli.network.as_deref())?;
    info!("Crawling {} into {}", client.web_url(), storage.root().display());
    info!("{} contracts already downloaded", crawler::downloaded_count(storage.root()));

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    ctrlc::set_handler(move || {
        if interrupt(&flag) {
            warn!("Received second interrupt, exiting immediately");
            std::process::exit(EXIT_INTERRUPTED);
        }

        warn!("Received interrupt, stopping after the current contract (interrupt again to exit immediately)");
    })?;

    let settings = Settings {
        overwrite: cli.overwrite,
        budget: cli.budget,
        strict: cli.strict,
    };

    let summary = Crawler::new(&client, &storage, settings).with_cancel(cancel).run(client.records())?;
    match summary.stop {
        StopReason::Exhausted | StopReason::BudgetReached => info!("Done; {}", summary.stop),
        StopReason::Cancelled => warn!("Stopped early; {}", summary.stop),
    }

    Ok(())
}

/// Raises the cancel flag; returns true if it was already raised by an earlier interrupt.
fn interrupt(flag: &AtomicBool) -> bool {
    flag.swap(true, Ordering::SeqCst)
}

fn init_logger(verbose: bool, root: &Path) -> Result<(), Error> {
    let config = || {
        ConfigBuilder::new()
            .add_filter_allow_str("etherdump")
            .set_time_format_str("[%d.%m.%Y; %T]")
            .build()
    };

    let term_level = match verbose {
        true => LevelFilter::Debug,
        false => LevelFilter::Info,
    };

    CombinedLogger::init(vec![
        TermLogger::new(term_level, config(), TerminalMode::Mixed, ColorChoice::Auto),
        WriteLogger::new(
            LevelFilter::Debug,
            config(),
            std::fs::OpenOptions::new().create(true).append(true).open(root.join(LOG_FILE_NAME))?,
        ),
    ])?;

    Ok(())
}

/// Returns the directory contracts of `chain` are stored in, i.e. `contracts/<network>` for Etherscan and
/// `contracts_<explorer>/<network>` for every other explorer.
fn output_directory(root: &Path, chain: &str, network: Option<&str>) -> PathBuf {
    let network = network.unwrap_or("mainnet");

    match chain.starts_with("etherscan") {
        true => root.join("contracts").join(network),
        false => {
            let explorer = chain.split('.').next().unwrap_or(chain);
            root.join(format!("contracts_{explorer}")).join(network)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_directory_etherscan() {
        let root = Path::new("/data");
        assert_eq!(output_directory(root, "etherscan.io", None), root.join("contracts").join("mainnet"));
        assert_eq!(
            output_directory(root, "etherscan.io", Some("ropsten")),
            root.join("contracts").join("ropsten")
        );
    }

    #[test]
    fn output_directory_other_explorer() {
        let root = Path::new("/data");
        assert_eq!(
            output_directory(root, "bscscan.com", None),
            root.join("contracts_bscscan").join("mainnet")
        );
        assert_eq!(
            output_directory(root, "polygonscan.com", Some("testnet")),
            root.join("contracts_polygonscan").join("testnet")
        );
    }

    #[test]
    fn second_interrupt_is_detected() {
        let flag = AtomicBool::new(false);
        assert!(!interrupt(&flag));
        assert!(flag.load(Ordering::SeqCst));
        assert!(interrupt(&flag));
    }

    #[test]
    fn cli_budget_is_usize() {
        let cli = Cli::try_parse_from(["etherdump", "--budget", "1000000"]).unwrap();
        assert_eq!(cli.budget, Some(1_000_000usize));
        assert!(Cli::try_parse_from(["etherdump", "--budget", "-1"]).is_err());
        assert!(Cli::try_parse_from(["etherdump", "--budget", "many"]).is_err());
    }

    #[test]
    fn cli_defaults() {
        let cli = Cli::try_parse_from(["etherdump"]).unwrap();
        assert_eq!(cli.chain, "etherscan.io");
        assert!(cli.network.is_none());
        assert!(!cli.overwrite);
        assert!(cli.budget.is_none());
    }

    #[test]
    fn cli_rejects_zero_budget() {
        assert!(Cli::try_parse_from(["etherdump", "--budget", "0"]).is_err());
        let cli = Cli::try_parse_from(["etherdump", "-c", "bscscan.com", "-n", "testnet", "--budget", "3"]).unwrap();
        assert_eq!(cli.budget, Some(3));
        assert_eq!(cli.network.as_deref(), Some("testnet"));
    }
}
