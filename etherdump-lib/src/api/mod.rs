//! Explorer API client and the traits the crawler consumes.

use crate::error::Error;
use crate::model::ContractRecord;
use log::debug;
use reqwest::blocking::Client;
use reqwest::blocking::RequestBuilder;
use reqwest::blocking::Response;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::cell::Cell;
use std::time::Duration;
use std::time::Instant;

pub mod etherscan;

/// Lazy, ordered sequence of verified contracts. Every call starts over from the first page.
pub trait RecordSource {
    fn records(&self) -> Box<dyn Iterator<Item = Result<ContractRecord, Error>> + '_>;
}

/// Per-address lookup of a contract's source code.
pub trait SourceFetcher {
    fn source_code(&self, address: &str) -> Result<String, Error>;
}

struct RequestHandler {
    client: Client,

    /// Minimum spacing between two requests, regardless of their outcome.
    interval: Duration,
    last_request: Cell<Option<Instant>>,
}

const USER_AGENT: &str = "etherdump";

/// Give up on a resource after this many unsuccessful responses.
const MAX_RETRIES: usize = 10;

/// Give up on a resource after this many failed attempts to send the request at all.
const MAX_SEND_FAILURES: usize = 5;

/// Give up on a resource after being rate limited this many times in a row.
const MAX_RATE_LIMITED: usize = 30;

/// Handler responsible for sites which don't need any special error handling
struct GenericResponseHandler;

/// Handler responsible for the explorer JSON API
struct EtherscanResponseHandler;

trait ResponseHandler {
    /// Prepares a request by i.e. setting it's headers or query parameters.
    fn prepare(request_handler: &RequestHandler, url: &str) -> RequestBuilder {
        request_handler.client.get(url).header(reqwest::header::USER_AGENT, USER_AGENT)
    }

    /// Given a response different error status codes are handled.
    fn process(response: Response) -> Result<ResponseHandlerResult, Error>;
}

#[derive(Debug)]
enum ResponseHandlerResult {
    Ok(Content),
    Retry(String),
    RetryWithCustomSleepDuration(u64),
}

#[derive(Debug)]
enum Content {
    Response(Response),
    Text(String),
}

impl Content {
    fn into_text(self) -> Result<String, Error> {
        match self {
            Content::Response(response) => response.text().map_err(Error::HttpRequest),
            Content::Text(content) => Ok(content),
        }
    }

    fn deserialize<U: DeserializeOwned>(self) -> Result<U, Error> {
        Ok(serde_json::from_str(&self.into_text()?)?)
    }
}

/// Unsuccessful attempts of retrieving a single resource.
#[derive(Default)]
struct Attempts {
    retries: usize,
    rate_limited: usize,
    send_failures: usize,
}

impl Attempts {
    fn retry(&mut self, url: &str, why: String) -> Result<(), Error> {
        self.retries += 1;
        debug!("Retrying because of '{why}' ({}/{MAX_RETRIES})", self.retries);

        match self.retries >= MAX_RETRIES {
            true => Err(Error::HttpRetriesExhausted(redact(url), self.retries, why)),
            false => Ok(()),
        }
    }

    fn rate_limited(&mut self, url: &str) -> Result<(), Error> {
        self.rate_limited += 1;

        match self.rate_limited >= MAX_RATE_LIMITED {
            true => Err(Error::HttpRetriesExhausted(
                redact(url),
                self.rate_limited,
                "Max rate limit reached".to_string(),
            )),
            false => Ok(()),
        }
    }

    fn send_failed(&mut self, why: reqwest::Error) -> Result<(), Error> {
        self.send_failures += 1;

        // Return an error if after N retries the reqwest crate is unable to send a request.
        match self.send_failures >= MAX_SEND_FAILURES {
            true => Err(Error::HttpRequest(why)),
            false => Ok(()),
        }
    }

    fn backoff(&self) -> Duration {
        Duration::from_secs(5 * (self.retries.max(self.send_failures) as u64))
    }
}

impl RequestHandler {
    pub fn new(interval: Duration) -> Self {
        RequestHandler {
            client: Client::default(),
            interval,
            last_request: Cell::new(None),
        }
    }

    /// Blocks until at least `interval` passed since the previous request.
    fn throttle(&self) {
        if let Some(last) = self.last_request.get() {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                std::thread::sleep(self.interval - elapsed);
            }
        }

        self.last_request.set(Some(Instant::now()));
    }

    fn execute<T: ResponseHandler>(&self, url: &str) -> Result<Content, Error> {
        let mut attempts = Attempts::default();

        loop {
            self.throttle();

            match T::prepare(self, url).send() {
                Ok(response) => match T::process(response)? {
                    ResponseHandlerResult::Ok(body) => return Ok(body),

                    ResponseHandlerResult::Retry(why) => attempts.retry(url, why)?,

                    ResponseHandlerResult::RetryWithCustomSleepDuration(duration) => {
                        attempts.rate_limited(url)?;
                        std::thread::sleep(Duration::from_secs(duration));
                        continue;
                    }
                },

                Err(why) => attempts.send_failed(why)?,
            }

            std::thread::sleep(attempts.backoff());
        }
    }

    pub fn execute_text<T: ResponseHandler>(&self, url: &str) -> Result<String, Error> {
        self.execute::<T>(url)?.into_text()
    }

    pub fn execute_deser<T: ResponseHandler, U: DeserializeOwned>(&self, url: &str) -> Result<U, Error> {
        self.execute::<T>(url)?.deserialize()
    }
}

impl ResponseHandler for GenericResponseHandler {
    fn process(response: Response) -> Result<ResponseHandlerResult, Error> {
        match response.status().as_u16() {
            200 => Ok(ResponseHandlerResult::Ok(Content::Response(response))),

            _ => Ok(ResponseHandlerResult::Retry(response.status().as_u16().to_string())),
        }
    }
}

impl ResponseHandler for EtherscanResponseHandler {
    fn process(response: Response) -> Result<ResponseHandlerResult, Error> {
        match response.status().as_u16() {
            200 => {
                let url = redact(response.url().as_str());
                let content = response.text().map_err(Error::HttpRequest)?;

                process_explorer_body(&url, content)
            }

            _ => Ok(ResponseHandlerResult::Retry(response.status().as_u16().to_string())),
        }
    }
}

/// The explorer answers with a 200 status code regardless of whether or not the request was successful; the
/// actual status is wrapped within the JSON body.
fn process_explorer_body(url: &str, content: String) -> Result<ResponseHandlerResult, Error> {
    #[derive(Deserialize)]
    struct Page {
        status: String,
        result: serde_json::Value,
    }

    let json = serde_json::from_str::<Page>(&content)?;

    match json.status.as_str() {
        "1" => Ok(ResponseHandlerResult::Ok(Content::Text(content))),

        // Anything other than a "1" as a JSON status is an error
        _ => {
            let result = match json.result {
                serde_json::Value::String(result) => result,
                other => other.to_string(),
            };

            match result.as_str() {
                "Invalid API Key" => Err(Error::EtherscanInvalidToken(url.to_string())),

                "Contract source code not verified" => {
                    Err(Error::EtherscanContractSourceCodeNotVerified(url.to_string()))
                }

                // 5 API calls per seconds, hence sleep 1 seconds before retrying
                result if result.starts_with("Max rate limit reached") => {
                    Ok(ResponseHandlerResult::RetryWithCustomSleepDuration(1))
                }

                _ => Ok(ResponseHandlerResult::Retry(result)),
            }
        }
    }
}

/// Strips the API token from URLs before they end up in logs or error messages.
fn redact(url: &str) -> String {
    match url.find("apikey=") {
        Some(idx) => {
            let rest = &url[idx + "apikey=".len()..];
            let tail = rest.find('&').map(|end| &rest[end..]).unwrap_or("");
            format!("{}apikey=***{tail}", &url[..idx])
        }
        None => url.to_string(),
    }
}
