//! Credits HTTP client implementation.

use std::time::Duration;

use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ClientError;
use crate::types::{
    ApiErrorResponse, BalanceResponse, EntriesResponse, EntryRequest, HoldReleaseResponse,
    ReleaseHoldRequest, RolloverResponse, WriteResponse,
};

/// Credits API client.
///
/// Authenticates with the service API key. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CreditsClient {
    client: Client,
    base_url: Url,
    api_key: String,
    service_name: String,
}

impl CreditsClient {
    /// Create a new credits client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the credits service (e.g., `"http://credits:8080"`)
    /// * `api_key` - Service API key for authentication
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if the URL is invalid.
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_options(base_url, api_key, ClientOptions::default())
    }

    /// Create a new credits client with custom options.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if the URL is invalid or the HTTP
    /// client cannot be built.
    pub fn with_options(
        base_url: &str,
        api_key: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| ClientError::Configuration(format!("invalid base URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::Configuration(format!(
                "invalid base URL: {base_url}"
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()
            .map_err(|e| ClientError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
            service_name: options.service_name,
        })
    }

    /// Get the balance, creating the account on first access.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn balance(&self, account_id: &str) -> Result<BalanceResponse, ClientError> {
        self.request::<(), _>(Method::GET, &[account_id, "balance"], None, None)
            .await
    }

    /// Debit credits.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InsufficientBalance` if the balance cannot cover
    /// the amount.
    pub async fn debit(
        &self,
        account_id: &str,
        request: &EntryRequest,
    ) -> Result<WriteResponse, ClientError> {
        self.write(account_id, "debit", request).await
    }

    /// Grant credits.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn grant(
        &self,
        account_id: &str,
        request: &EntryRequest,
    ) -> Result<WriteResponse, ClientError> {
        self.write(account_id, "grant", request).await
    }

    /// Reserve credits before the final cost is known.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InsufficientBalance` if the balance cannot cover
    /// the reservation.
    pub async fn hold(
        &self,
        account_id: &str,
        request: &EntryRequest,
    ) -> Result<WriteResponse, ClientError> {
        self.write(account_id, "holds", request).await
    }

    /// Refund credits.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn refund(
        &self,
        account_id: &str,
        request: &EntryRequest,
    ) -> Result<WriteResponse, ClientError> {
        self.write(account_id, "refund", request).await
    }

    /// Settle a hold, returning the part that was not consumed.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotFound` if the hold does not exist.
    pub async fn release_hold(
        &self,
        account_id: &str,
        hold_entry_id: &str,
        consumed: i64,
    ) -> Result<HoldReleaseResponse, ClientError> {
        self.request(
            Method::POST,
            &[account_id, "holds", hold_entry_id, "release"],
            None,
            Some(&ReleaseHoldRequest { consumed }),
        )
        .await
    }

    /// Apply the current cycle's grant if it is due.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn rollover(&self, account_id: &str) -> Result<RolloverResponse, ClientError> {
        self.request(
            Method::POST,
            &[account_id, "rollover"],
            None,
            Some(&serde_json::json!({})),
        )
        .await
    }

    /// The most recent ledger entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn entries(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<EntriesResponse, ClientError> {
        let limit = limit.to_string();
        self.request::<(), _>(
            Method::GET,
            &[account_id, "entries"],
            Some(("limit", limit.as_str())),
            None,
        )
        .await
    }

    async fn write(
        &self,
        account_id: &str,
        action: &str,
        request: &EntryRequest,
    ) -> Result<WriteResponse, ClientError> {
        let response: WriteResponse = self
            .request(Method::POST, &[account_id, action], None, Some(request))
            .await?;

        tracing::debug!(
            account_id = %account_id,
            entry_id = %response.entry_id,
            status = ?response.status,
            balance = response.balance,
            "Credits write completed"
        );

        Ok(response)
    }

    /// Build `/v1/accounts/{segments...}` with each segment percent-encoded.
    fn account_url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ClientError::Configuration(format!("invalid base URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(["v1", "accounts"])
            .extend(segments);
        Ok(url)
    }

    async fn request<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        query: Option<(&str, &str)>,
        body: Option<&B>,
    ) -> Result<T, ClientError> {
        let mut url = self.account_url(segments)?;
        if let Some((key, value)) = query {
            url.query_pairs_mut().append_pair(key, value);
        }

        let mut request = self
            .client
            .request(method, url)
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        Self::handle_response(response).await
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let error_body: Result<ApiErrorResponse, _> = response.json().await;

        match error_body {
            Ok(api_error) => {
                let code = api_error.error.code.as_str();
                let message = api_error.error.message;
                let detail = |key: &str| {
                    api_error
                        .error
                        .details
                        .as_ref()
                        .and_then(|d| d.get(key))
                        .and_then(serde_json::Value::as_i64)
                        .unwrap_or(0)
                };

                match code {
                    "insufficient_balance" => Err(ClientError::InsufficientBalance {
                        balance: detail("balance"),
                        required: detail("required"),
                    }),
                    "not_found" => Err(ClientError::NotFound { message }),
                    "transaction_conflict" => Err(ClientError::TransactionConflict { message }),
                    _ => Err(ClientError::Api {
                        code: code.to_string(),
                        message,
                        status: status.as_u16(),
                    }),
                }
            }
            Err(_) => Err(ClientError::Api {
                code: "unknown".to_string(),
                message: format!("HTTP {status}"),
                status: status.as_u16(),
            }),
        }
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 30).
    pub timeout_seconds: u64,
    /// Service name sent as `X-Service-Name`.
    pub service_name: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            service_name: "unknown".to_string(),
        }
    }
}

impl ClientOptions {
    /// Create options with a service name.
    #[must_use]
    pub fn with_service_name(name: impl Into<String>) -> Self {
        Self {
            service_name: name.into(),
            ..Self::default()
        }
    }

    /// Set the request timeout.
    #[must_use]
    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }
}
