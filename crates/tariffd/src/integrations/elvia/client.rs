use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderValue;
use reqwest::header::CONTENT_TYPE;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use tracing::debug;
use tracing::trace;

use super::models::GridTariff;
use super::models::GridTariffCollection;
use super::models::MeteringPointsGridTariffs;
use super::models::MeteringPointsRequest;
use super::models::TariffQuery;
use super::models::TariffQueryResult;
use super::models::TariffType;
use super::models::TariffTypes;
use crate::config::ElviaConfig;

const PING_PATH: &str = "Ping";
const SECURE_PATH: &str = "Secure";
const TARIFF_TYPES_PATH: &str = "digin/api/1/tarifftype";
const TARIFF_QUERY_PATH: &str = "digin/api/1/tariffquery";
const METERING_POINTS_PATH: &str = "digin/api/1/tariffquery/meteringpointsgridtariffs";

/// Header carrying the API portal subscription key
const API_KEY_HEADER: &str = "ocp-apim-subscription-key";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from talking to the Elvia API
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Timeout error fetching information from {url}")]
    Timeout { url: String },

    #[error("Error fetching information from {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Unexpected status {status} from {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("Error parsing information from {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("API key contains characters that are not allowed in an HTTP header")]
    InvalidApiKey,

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Trait for Elvia grid tariff API operations
///
/// This trait allows for mocking the API client for testing purposes
#[async_trait]
pub trait ElviaApi: Send + Sync {
    /// Check that the API is reachable
    async fn ping(&self) -> Result<(), Error>;

    /// Check that the API key is accepted
    async fn secure(&self) -> Result<(), Error>;

    /// All available private tariff types
    async fn tariff_types(&self) -> Result<Vec<TariffType>, Error>;

    /// Prices of a given tariff for a given period
    async fn tariff_query(&self, query: &TariffQuery) -> Result<GridTariff, Error>;

    /// Tariffs for the metering points in the request
    async fn metering_point_grid_tariffs(
        &self,
        request: &MeteringPointsRequest,
    ) -> Result<Vec<GridTariffCollection>, Error>;
}

/// Real API client implementation using reqwest
pub struct ReqwestClient {
    http: reqwest::Client,
    base_url: String,
}

impl ReqwestClient {
    /// Create a new client from configuration
    pub fn new(config: &ElviaConfig) -> Result<Self, Error> {
        Self::with_timeout(config, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(config: &ElviaConfig, timeout: Duration) -> Result<Self, Error> {
        let mut api_key =
            HeaderValue::from_str(&config.api_key).map_err(|_| Error::InvalidApiKey)?;
        api_key.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(API_KEY_HEADER, api_key);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(Error::Client)?;

        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn transport_error(url: &str, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout {
                url: url.to_string(),
            }
        } else {
            Error::Request {
                url: url.to_string(),
                source: e,
            }
        }
    }

    /// Send a request and return the body of a successful response
    async fn send(&self, request: RequestBuilder, url: &str) -> Result<Vec<u8>, Error> {
        let response = request
            .send()
            .await
            .map_err(|e| Self::transport_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                url: url.to_string(),
                status,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Self::transport_error(url, e))?;
        trace!("Response from {}: {}", url, String::from_utf8_lossy(&body));

        Ok(body.to_vec())
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        url: &str,
    ) -> Result<T, Error> {
        let body = self.send(request, url).await?;
        serde_json::from_slice(&body).map_err(|e| Error::Parse {
            url: url.to_string(),
            source: e,
        })
    }

    async fn get_ok(&self, path: &str) -> Result<(), Error> {
        let url = self.url(path);
        debug!("GET-request to url={}", url);
        self.send(self.http.get(&url), &url).await.map(|_| ())
    }
}

#[async_trait]
impl ElviaApi for ReqwestClient {
    async fn ping(&self) -> Result<(), Error> {
        self.get_ok(PING_PATH).await
    }

    async fn secure(&self) -> Result<(), Error> {
        self.get_ok(SECURE_PATH).await
    }

    async fn tariff_types(&self) -> Result<Vec<TariffType>, Error> {
        let url = self.url(TARIFF_TYPES_PATH);
        debug!("GET-request to url={}", url);
        let types: TariffTypes = self.send_json(self.http.get(&url), &url).await?;
        Ok(types.tariff_types)
    }

    async fn tariff_query(&self, query: &TariffQuery) -> Result<GridTariff, Error> {
        let url = self.url(TARIFF_QUERY_PATH);
        let params = query.query_pairs();
        debug!("GET-request to url={}. query={:?}", url, params);
        let result: TariffQueryResult = self
            .send_json(self.http.get(&url).query(&params), &url)
            .await?;
        Ok(result.grid_tariff)
    }

    async fn metering_point_grid_tariffs(
        &self,
        request: &MeteringPointsRequest,
    ) -> Result<Vec<GridTariffCollection>, Error> {
        let url = self.url(METERING_POINTS_PATH);
        debug!("POST-request to url={}. data={:?}", url, request);
        let result: MeteringPointsGridTariffs = self
            .send_json(self.http.post(&url).json(request), &url)
            .await?;
        Ok(result.grid_tariff_collections)
    }
}

/// Mock API client for testing
///
/// Clones share their queue, so a test can keep a handle after giving the
/// client to an integration.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MockElviaClient {
    inner: std::sync::Arc<std::sync::Mutex<MockState>>,
}

#[cfg(test)]
#[derive(Default)]
struct MockState {
    responses: std::collections::VecDeque<Result<Vec<GridTariffCollection>, Error>>,
    requests: Vec<MeteringPointsRequest>,
}

#[cfg(test)]
impl MockElviaClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful metering point response
    pub fn push_collections(&self, collections: Vec<GridTariffCollection>) {
        self.inner
            .lock()
            .unwrap()
            .responses
            .push_back(Ok(collections));
    }

    /// Queue a failed metering point response
    pub fn push_error(&self, error: Error) {
        self.inner.lock().unwrap().responses.push_back(Err(error));
    }

    /// Metering point requests received so far
    pub fn requests(&self) -> Vec<MeteringPointsRequest> {
        self.inner.lock().unwrap().requests.clone()
    }
}

#[cfg(test)]
#[async_trait]
impl ElviaApi for MockElviaClient {
    async fn ping(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn secure(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn tariff_types(&self) -> Result<Vec<TariffType>, Error> {
        Ok(Vec::new())
    }

    async fn tariff_query(&self, _query: &TariffQuery) -> Result<GridTariff, Error> {
        Err(Error::Status {
            url: TARIFF_QUERY_PATH.to_string(),
            status: reqwest::StatusCode::NOT_IMPLEMENTED,
        })
    }

    async fn metering_point_grid_tariffs(
        &self,
        request: &MeteringPointsRequest,
    ) -> Result<Vec<GridTariffCollection>, Error> {
        let mut state = self.inner.lock().unwrap();
        state.requests.push(request.clone());
        state.responses.pop_front().unwrap_or_else(|| {
            Err(Error::Status {
                url: METERING_POINTS_PATH.to_string(),
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            })
        })
    }
}
