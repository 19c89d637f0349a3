use std::time::Duration;

use changefeed_config::shared::StoreConfig;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::error::{ErrorKind, IndexerError, IndexerResult};
use crate::store::base::{CreateIndexOutcome, IndexStore};
use crate::store::bulk::{BulkResponse, encode_bulk_body};
use crate::types::IndexOp;
use crate::{bail, indexer_error};

const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Error type returned when creating an index that another client created first.
const RESOURCE_ALREADY_EXISTS: &str = "resource_already_exists_exception";

/// Longest response body excerpt kept in error details.
const MAX_BODY_EXCERPT: usize = 512;

#[derive(Debug, Clone)]
struct Credentials {
    username: String,
    password: Option<SecretString>,
}

/// [`IndexStore`] backed by the OpenSearch / Elasticsearch REST API.
#[derive(Debug, Clone)]
pub struct OpenSearchStore {
    client: Client,
    base_url: Url,
    credentials: Option<Credentials>,
}

impl OpenSearchStore {
    /// Builds a client for the cluster at `config.url`.
    ///
    /// Credentials embedded in the url as `user:password@` are removed from it and sent as basic
    /// auth. `config.username` and `config.password` take precedence over them.
    pub fn new(config: &StoreConfig) -> IndexerResult<Self> {
        let mut base_url = Url::parse(&config.url).map_err(|err| {
            indexer_error!(
                ErrorKind::ConfigError,
                "Store url is invalid",
                err.to_string(),
                source: err
            )
        })?;
        if base_url.cannot_be_a_base() {
            bail!(
                ErrorKind::ConfigError,
                "Store url cannot be used as a base url",
                config.url.clone()
            );
        }

        let url_credentials = take_url_credentials(&mut base_url);
        let credentials = match &config.username {
            Some(username) => Some(Credentials {
                username: username.clone(),
                password: config.password.clone(),
            }),
            None => url_credentials,
        };

        let mut builder = Client::builder();
        if let Some(timeout_ms) = config.request_timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout_ms));
        }
        let client = builder.build().map_err(|err| {
            indexer_error!(
                ErrorKind::ConfigError,
                "Failed to build the store HTTP client",
                err.to_string(),
                source: err
            )
        })?;

        info!(
            url = %base_url,
            authenticated = credentials.is_some(),
            "created search store client"
        );

        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // The base url was checked to be a base url on construction.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }

        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.credentials {
            Some(credentials) => builder.basic_auth(
                &credentials.username,
                credentials
                    .password
                    .as_ref()
                    .map(|password| password.expose_secret()),
            ),
            None => builder,
        }
    }
}

impl IndexStore for OpenSearchStore {
    fn name() -> &'static str {
        "opensearch"
    }

    async fn index_exists(&self, index: &str) -> IndexerResult<bool> {
        let response = self
            .request(Method::HEAD, self.endpoint(&[index]))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(failed_response(response, "Index existence check failed").await),
        }
    }

    async fn create_index(&self, index: &str) -> IndexerResult<CreateIndexOutcome> {
        let response = self
            .request(Method::PUT, self.endpoint(&[index]))
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(CreateIndexOutcome::Created);
        }

        if response.status() == StatusCode::BAD_REQUEST {
            let body = response.text().await?;
            if body.contains(RESOURCE_ALREADY_EXISTS) {
                return Ok(CreateIndexOutcome::AlreadyExists);
            }

            bail!(
                ErrorKind::StoreRequestFailed,
                "Index creation failed",
                format!("status 400: {}", excerpt(&body))
            );
        }

        Err(failed_response(response, "Index creation failed").await)
    }

    async fn bulk(&self, ops: &[IndexOp]) -> IndexerResult<BulkResponse> {
        if ops.is_empty() {
            return Ok(BulkResponse::default());
        }

        let body = encode_bulk_body(ops)?;
        debug!(ops = ops.len(), bytes = body.len(), "sending bulk request");

        let response = self
            .request(Method::POST, self.endpoint(&["_bulk"]))
            .header(CONTENT_TYPE, NDJSON_CONTENT_TYPE)
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(failed_response(response, "Bulk request failed").await);
        }

        let body = response.bytes().await?;
        let bulk_response = BulkResponse::from_slice(&body)?;
        if bulk_response.len() != ops.len() {
            bail!(
                ErrorKind::StoreResponseInvalid,
                "Bulk response does not match the request",
                format!(
                    "sent {} operations, received {} items",
                    ops.len(),
                    bulk_response.len()
                )
            );
        }

        Ok(bulk_response)
    }

    async fn close(&self) -> IndexerResult<()> {
        // The HTTP client has no session to end, pooled connections are dropped with it.
        debug!(url = %self.base_url, "closing search store client");

        Ok(())
    }
}

/// Strips `user:password@` from `url`, returning it as credentials.
fn take_url_credentials(url: &mut Url) -> Option<Credentials> {
    if url.username().is_empty() {
        return None;
    }

    let credentials = Credentials {
        username: url.username().to_owned(),
        password: url
            .password()
            .map(|password| SecretString::new(password.to_owned())),
    };

    // Both only fail for urls that cannot be a base, which is checked beforehand.
    let _ = url.set_username("");
    let _ = url.set_password(None);

    Some(credentials)
}

/// Turns a non-success response into an error, classifying authentication failures separately.
async fn failed_response(response: Response, description: &'static str) -> IndexerError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail = format!("status {}: {}", status.as_u16(), excerpt(&body));

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => indexer_error!(
            ErrorKind::StoreAuthenticationFailed,
            "Store rejected the credentials",
            detail
        ),
        _ => indexer_error!(ErrorKind::StoreRequestFailed, description, detail),
    }
}

fn excerpt(body: &str) -> &str {
    match body.char_indices().nth(MAX_BODY_EXCERPT) {
        Some((end, _)) => &body[..end],
        None => body,
    }
}
