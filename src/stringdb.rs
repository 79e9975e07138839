use std::time::Duration;

use csv::{Reader, ReaderBuilder, StringRecord, Trim};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::domain::{ConfidenceThreshold, NetworkType, Species};
use crate::error::KiraError;

pub const DEFAULT_BASE_URL: &str = "https://string-db.org/api";

/// Maps raw identifiers to STRING ids. Returns the raw TSV body.
pub trait IdentifierClient: Send + Sync {
    fn map_identifiers(&self, identifiers: &[String], species: Species)
    -> Result<String, KiraError>;
}

/// Retrieves the interaction network among STRING ids. Returns the raw TSV body.
pub trait InteractionClient: Send + Sync {
    fn fetch_network(
        &self,
        string_ids: &[String],
        species: Species,
        threshold: ConfidenceThreshold,
        network_type: NetworkType,
    ) -> Result<String, KiraError>;
}

impl<T: IdentifierClient + ?Sized> IdentifierClient for &T {
    fn map_identifiers(
        &self,
        identifiers: &[String],
        species: Species,
    ) -> Result<String, KiraError> {
        (**self).map_identifiers(identifiers, species)
    }
}

impl<T: InteractionClient + ?Sized> InteractionClient for &T {
    fn fetch_network(
        &self,
        string_ids: &[String],
        species: Species,
        threshold: ConfidenceThreshold,
        network_type: NetworkType,
    ) -> Result<String, KiraError> {
        (**self).fetch_network(string_ids, species, threshold, network_type)
    }
}

#[derive(Debug, Clone)]
pub struct StringClientOptions {
    pub base_url: String,
    pub caller_identity: String,
    pub resolve_timeout: Duration,
    pub network_timeout: Duration,
}

impl Default for StringClientOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            caller_identity: "kira-ppi".to_string(),
            resolve_timeout: Duration::from_secs(15),
            network_timeout: Duration::from_secs(60),
        }
    }
}

/// HTTP client for the STRING REST API.
///
/// Every call carries its own timeout and is sent exactly once; callers that
/// want another attempt rerun the whole pipeline.
#[derive(Clone)]
pub struct StringHttpClient {
    client: Client,
    options: StringClientOptions,
}

impl StringHttpClient {
    pub fn new(options: StringClientOptions) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-ppi/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::InteractionHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|err| KiraError::InteractionHttp(err.to_string()))?;
        Ok(Self { client, options })
    }

    pub fn identifiers_url(&self) -> String {
        format!(
            "{}/tsv/get_string_ids",
            self.options.base_url.trim_end_matches('/')
        )
    }

    pub fn network_url(&self) -> String {
        format!("{}/tsv/network", self.options.base_url.trim_end_matches('/'))
    }
}

impl IdentifierClient for StringHttpClient {
    fn map_identifiers(
        &self,
        identifiers: &[String],
        species: Species,
    ) -> Result<String, KiraError> {
        let form = [
            ("identifiers", identifiers.join("\n")),
            ("species", species.to_string()),
            ("limit", "1".to_string()),
            ("echo_query", "1".to_string()),
            ("caller_identity", self.options.caller_identity.clone()),
        ];
        let response = self
            .client
            .post(self.identifiers_url())
            .timeout(self.options.resolve_timeout)
            .form(&form)
            .send()
            .map_err(|err| KiraError::ResolverHttp(describe(&err)))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "identifier request failed".to_string());
            return Err(KiraError::ResolverStatus { status, message });
        }
        response
            .text()
            .map_err(|err| KiraError::ResolverHttp(describe(&err)))
    }
}

impl InteractionClient for StringHttpClient {
    fn fetch_network(
        &self,
        string_ids: &[String],
        species: Species,
        threshold: ConfidenceThreshold,
        network_type: NetworkType,
    ) -> Result<String, KiraError> {
        let form = [
            ("identifiers", string_ids.join("\n")),
            ("species", species.to_string()),
            ("required_score", threshold.to_string()),
            ("network_type", network_type.string_param().to_string()),
            ("caller_identity", self.options.caller_identity.clone()),
        ];
        let response = self
            .client
            .post(self.network_url())
            .timeout(self.options.network_timeout)
            .form(&form)
            .send()
            .map_err(|err| KiraError::InteractionHttp(describe(&err)))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "interaction request failed".to_string());
            return Err(KiraError::InteractionStatus { status, message });
        }
        response
            .text()
            .map_err(|err| KiraError::InteractionHttp(describe(&err)))
    }
}

/// Strict reader over a tab-separated STRING response: the first line is the
/// header and every row must have exactly as many fields.
pub fn response_reader(body: &str) -> Reader<&[u8]> {
    ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(false)
        .quoting(false)
        .trim(Trim::All)
        .from_reader(body.as_bytes())
}

pub fn column(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|header| header == name)
}

/// 1-based line of a record, falling back to `fallback` when unknown.
pub fn record_line(record: &StringRecord, fallback: usize) -> usize {
    record
        .position()
        .map_or(fallback, |pos| pos.line() as usize)
}

pub fn error_line(err: &csv::Error) -> usize {
    err.position().map_or(0, |pos| pos.line() as usize)
}

fn describe(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("timed out: {err}")
    } else {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_tolerate_trailing_slash() {
        let client = StringHttpClient::new(StringClientOptions {
            base_url: "https://example.org/api/".to_string(),
            ..StringClientOptions::default()
        })
        .unwrap();
        assert_eq!(
            client.identifiers_url(),
            "https://example.org/api/tsv/get_string_ids"
        );
        assert_eq!(client.network_url(), "https://example.org/api/tsv/network");
    }

    #[test]
    fn reader_rejects_ragged_rows_with_their_line() {
        let mut reader = response_reader("a\tb\n1\t2\n3\n");
        let headers = reader.headers().unwrap().clone();
        assert_eq!(column(&headers, "b"), Some(1));
        assert_eq!(record_line(&headers, 0), 1);
        let mut records = reader.records();
        let first = records.next().unwrap().unwrap();
        assert_eq!(record_line(&first, 0), 2);
        let err = records.next().unwrap().unwrap_err();
        assert_eq!(error_line(&err), 3);
    }
}
