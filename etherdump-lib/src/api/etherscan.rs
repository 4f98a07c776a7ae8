//! Client for Etherscan and explorers sharing its layout (bscscan.com, polygonscan.com, ...).
//!
//! Verified contracts are listed by scraping <https://etherscan.io/contractsVerified> page by page, the source
//! code of each contract is retrieved from the `module=contract&action=getsourcecode` API endpoint.

use crate::config::Config;
use crate::error::Error;
use crate::model;
use crate::model::ContractRecord;
use log::debug;
use log::warn;
use select::document::Document;
use select::predicate::Name;
use select::predicate::Predicate;
use serde::Deserialize;
use std::collections::VecDeque;
use url::Url;

use super::EtherscanResponseHandler;
use super::GenericResponseHandler;
use super::RecordSource;
use super::RequestHandler;
use super::SourceFetcher;

/// Column names of the verified contracts table, in order; the first two become the record's address and name.
const LISTING_COLUMNS: [&str; 10] = [
    "address",
    "name",
    "compiler",
    "compiler_version",
    "balance",
    "txns",
    "setting",
    "verified",
    "audited",
    "license",
];

/// Number of contracts per listing page, the maximum the explorer accepts.
const LISTING_PAGE_SIZE: usize = 100;

pub struct EtherscanClient {
    request_handler: RequestHandler,
    token: String,
    web: Url,
    api: Url,
}

#[derive(Deserialize)]
struct SourcePage {
    result: Vec<SourceEntry>,
}

#[derive(Deserialize)]
struct SourceEntry {
    #[serde(rename = "SourceCode")]
    source_code: String,
}

/// Returns the website and API base URL of an explorer, e.g. `https://ropsten.etherscan.io/` and
/// `https://api-ropsten.etherscan.io/api` for the `etherscan.io` chain on the `ropsten` network.
pub fn service_urls(chain: &str, network: Option<&str>) -> Result<(Url, Url), Error> {
    let (web, api) = match network {
        Some(network) => (
            format!("https://{network}.{chain}/"),
            format!("https://api-{network}.{chain}/api"),
        ),
        None => (format!("https://{chain}/"), format!("https://api.{chain}/api")),
    };

    let web_url = Url::parse(&web).map_err(|err| Error::InvalidUrl(web, err))?;
    let api_url = Url::parse(&api).map_err(|err| Error::InvalidUrl(api, err))?;

    Ok((web_url, api_url))
}

impl EtherscanClient {
    pub fn new(config: &Config, chain: &str, network: Option<&str>) -> Result<Self, Error> {
        let (web, api) = service_urls(chain, network)?;

        Ok(EtherscanClient {
            request_handler: RequestHandler::new(config.request_interval),
            token: config.token_etherscan.clone(),
            web,
            api,
        })
    }

    pub fn web_url(&self) -> &Url {
        &self.web
    }

    /// Returns an iterator over all verified contracts, requesting the next listing page only once the
    /// previous one was consumed.
    pub fn verified_contracts(&self) -> VerifiedContracts<impl FnMut(usize) -> Result<String, Error> + '_> {
        VerifiedContracts::new(move |page| {
            let url = self.listing_url(page)?;
            debug!("Requesting listing page {url}");

            self.request_handler.execute_text::<GenericResponseHandler>(url.as_str())
        })
    }

    pub fn get_source_code(&self, address: &str) -> Result<String, Error> {
        let mut url = self.api.clone();
        url.query_pairs_mut()
            .append_pair("module", "contract")
            .append_pair("action", "getsourcecode")
            .append_pair("address", address)
            .append_pair("apikey", &self.token);

        let page = self.request_handler.execute_deser::<EtherscanResponseHandler, SourcePage>(url.as_str())?;

        page.result
            .into_iter()
            .next()
            .map(|entry| entry.source_code)
            .ok_or_else(|| Error::EtherscanMissingSource(address.to_string()))
    }

    fn listing_url(&self, page: usize) -> Result<Url, Error> {
        let path = format!("contractsVerified/{page}?ps={LISTING_PAGE_SIZE}");
        self.web.join(&path).map_err(|err| Error::InvalidUrl(path, err))
    }
}

impl RecordSource for EtherscanClient {
    fn records(&self) -> Box<dyn Iterator<Item = Result<ContractRecord, Error>> + '_> {
        Box::new(self.verified_contracts())
    }
}

impl SourceFetcher for EtherscanClient {
    fn source_code(&self, address: &str) -> Result<String, Error> {
        self.get_source_code(address)
    }
}

/// Paginates through the verified contracts listing, starting at page one.
///
/// The listing ends with the first page that has no rows. Explorers also tend to keep serving their last
/// page for any index beyond it, hence a page identical to its predecessor ends the listing as well.
pub struct VerifiedContracts<F> {
    load_page: F,
    page: usize,
    buffer: VecDeque<ContractRecord>,
    previous: Option<Vec<String>>,
    done: bool,
}

impl<F> VerifiedContracts<F>
where
    F: FnMut(usize) -> Result<String, Error>,
{
    pub fn new(load_page: F) -> Self {
        VerifiedContracts {
            load_page,
            page: 0,
            buffer: VecDeque::new(),
            previous: None,
            done: false,
        }
    }

    fn next_page(&mut self) -> Result<(), Error> {
        self.page += 1;
        let html = (self.load_page)(self.page)?;
        let records = parse_verified_contracts(&html)?;

        let addresses: Vec<String> = records.iter().map(|x| x.address.clone()).collect();
        if records.is_empty() || self.previous.as_ref() == Some(&addresses) {
            debug!("Listing exhausted at page {}", self.page);
            self.done = true;
            return Ok(());
        }

        self.previous = Some(addresses);
        self.buffer.extend(records);

        Ok(())
    }
}

impl<F> Iterator for VerifiedContracts<F>
where
    F: FnMut(usize) -> Result<String, Error>,
{
    type Item = Result<ContractRecord, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.buffer.is_empty() && !self.done {
            if let Err(why) = self.next_page() {
                self.done = true;
                return Some(Err(why));
            }
        }

        self.buffer.pop_front().map(Ok)
    }
}

/// Extracts all contracts from the table of a verified contracts page.
pub fn parse_verified_contracts(html: &str) -> Result<Vec<ContractRecord>, Error> {
    let document = Document::from(html);
    let mut contracts = Vec::new();
    let mut data_rows = 0;

    for row in document.find(Name("tbody").child(Name("tr"))) {
        let row_column: Vec<String> = row.find(Name("td")).map(|x| x.text().trim().to_string()).collect();

        // A single cell spanning the whole table, e.g. "There are no matching entries"
        if row_column.len() < 2 {
            continue;
        }

        data_rows += 1;

        if !model::is_hex_address(&row_column[0]) {
            warn!("Ignoring listing row with unexpected address '{}'", row_column[0]);
            continue;
        }

        let mut contract = ContractRecord::new(row_column[0].clone(), row_column[1].clone());
        for (key, value) in LISTING_COLUMNS.iter().zip(row_column.iter()).skip(2) {
            contract = contract.with_field(*key, value.clone());
        }

        contracts.push(contract);
    }

    // Rows were listed but none of them could be read, most likely the page layout changed
    if contracts.is_empty() && data_rows > 0 {
        return Err(Error::EtherscanListingMalformed(
            "contractsVerified".to_string(),
            format!("none of the {data_rows} rows holds a contract address"),
        ));
    }

    if contracts.is_empty() && document.find(Name("tbody")).next().is_none() {
        return Err(Error::EtherscanListingMalformed(
            "contractsVerified".to_string(),
            "no table found".to_string(),
        ));
    }

    Ok(contracts)
}
