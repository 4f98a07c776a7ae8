//! Crawl loop downloading the source of every listed contract.
//!
//! Records are consumed strictly one after another: each record is appended to the ledger, skipped if its
//! source file already exists (unless overwriting), otherwise its source is fetched and written. A failed
//! fetch only skips the record at hand whereas any storage error ends the crawl, as nothing could be
//! persisted afterwards anyway. The ledger is written before the fetch and therefore lists every record seen,
//! not only the downloaded ones.

use etherdump_lib::api::SourceFetcher;
use etherdump_lib::error::Error;
use etherdump_lib::model::ContractRecord;
use etherdump_lib::storage::Storage;
use log::debug;
use log::info;
use log::warn;
use std::fmt;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use walkdir::WalkDir;

#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Re-download contracts whose source file already exists.
    pub overwrite: bool,

    /// Stop after this many downloads; `None` crawls until the listing is exhausted.
    pub budget: Option<usize>,

    /// Abort on the first failed fetch instead of skipping the contract.
    pub strict: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The record source has no more contracts.
    Exhausted,
    BudgetReached,
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Exhausted => write!(f, "no more contracts listed"),
            StopReason::BudgetReached => write!(f, "maximum amount of contracts to download reached"),
            StopReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub seen: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub stop: StopReason,
}

/// Outcome of fetching a single contract's source.
enum Fetched {
    Source(String),
    Skip(Error),
    Fatal(Error),
}

pub struct Crawler<'a, F: SourceFetcher + ?Sized> {
    fetcher: &'a F,
    storage: &'a Storage,
    settings: Settings,
    cancel: Arc<AtomicBool>,
}

impl<'a, F: SourceFetcher + ?Sized> Crawler<'a, F> {
    pub fn new(fetcher: &'a F, storage: &'a Storage, settings: Settings) -> Self {
        Crawler {
            fetcher,
            storage,
            settings,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stops the crawl before the next record once `cancel` is set.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Crawls `records` until they are exhausted, the budget is reached or the crawl is cancelled.
    pub fn run<I>(&self, records: I) -> Result<Summary, Error>
    where
        I: IntoIterator<Item = Result<ContractRecord, Error>>,
    {
        let mut records = records.into_iter();
        let mut summary = Summary {
            seen: 0,
            downloaded: 0,
            skipped: 0,
            failed: 0,
            stop: StopReason::Exhausted,
        };

        if self.budget_reached(0) {
            summary.stop = StopReason::BudgetReached;
            return Ok(summary);
        }

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                summary.stop = StopReason::Cancelled;
                break;
            }

            let record = match records.next() {
                Some(record) => record?,
                None => break,
            };

            summary.seen += 1;
            debug!("Got contract {} ({})", record.address, record.name);
            self.storage.append_ledger(&record)?;

            let path = self.storage.destination_file(&record);
            if !self.settings.overwrite && self.storage.exists(&path) {
                summary.skipped += 1;
                info!(
                    "[{}] skipping, already exists --> {} ({:<20}) -> {}",
                    self.progress(summary.downloaded),
                    record.address,
                    record.name,
                    path.display()
                );
                continue;
            }

            let source = match self.fetch(&record) {
                Fetched::Source(source) => source,

                Fetched::Skip(why) => {
                    summary.failed += 1;
                    warn!("Failed to fetch {} ({}); {why}", record.address, record.name);
                    continue;
                }

                Fetched::Fatal(why) => return Err(why),
            };

            self.storage.ensure_shard(&record)?;
            self.storage.write_source(&path, &source)?;
            summary.downloaded += 1;

            info!(
                "[{}] dumped --> {} ({:<20}) -> {}",
                self.progress(summary.downloaded),
                record.address,
                record.name,
                path.display()
            );

            if self.budget_reached(summary.downloaded) {
                summary.stop = StopReason::BudgetReached;
                break;
            }
        }

        info!(
            "[{}] finished, {}; seen {}, downloaded {}, skipped {}, failed {}",
            self.progress(summary.downloaded),
            summary.stop,
            summary.seen,
            summary.downloaded,
            summary.skipped,
            summary.failed
        );

        Ok(summary)
    }

    fn fetch(&self, record: &ContractRecord) -> Fetched {
        let result = self.fetcher.source_code(&record.address).and_then(|source| {
            let source = source.trim();
            match source.is_empty() {
                true => Err(Error::EtherscanEmptySource(record.address.clone())),
                false => Ok(source.to_string()),
            }
        });

        match result {
            Ok(source) => Fetched::Source(source),
            Err(why) if self.settings.strict || why.is_storage() => Fetched::Fatal(why),
            Err(why) => Fetched::Skip(why),
        }
    }

    #[inline]
    fn budget_reached(&self, downloaded: usize) -> bool {
        matches!(self.settings.budget, Some(budget) if downloaded >= budget)
    }

    fn progress(&self, downloaded: usize) -> String {
        match self.settings.budget {
            Some(budget) => format!("{downloaded}/{budget}"),
            None => format!("{downloaded}/-"),
        }
    }
}

/// Returns the number of source files already present below `root`.
pub fn downloaded_count(root: &Path) -> usize {
    WalkDir::new(root)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|x| x.ok())
        .filter(|x| x.file_type().is_file() && x.path().extension().map_or(false, |ext| ext == "sol"))
        .count()
}
