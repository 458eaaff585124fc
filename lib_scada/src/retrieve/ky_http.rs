//! # HTTP Retrieval Utilities
//!
//! Asynchronous JSON API client around `reqwest`, with exponential backoff
//! retries of transient failures through `reqwest-middleware`, an optional
//! bearer token and a per-request timeout.

use std::time::Duration;

use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{MirrorError, Result};

/// Retries of a transient failure before it is reported.
const MAX_RETRIES: u32 = 3;

/// A standardized container for API responses.
///
/// Wraps the deserialized data along with the HTTP status and headers.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The successfully deserialized response body, if any.
    pub data: Option<T>,
    /// The raw error body returned by the server if the request failed.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
    /// The headers returned by the server.
    pub headers: HeaderMap,
}

impl<T> ApiResponse<T> {
    /// Turns the response into the payload or the matching [`MirrorError`].
    /// A 401 becomes [`MirrorError::Unauthorized`].
    pub fn into_result(self) -> Result<T> {
        if self.status == StatusCode::UNAUTHORIZED.as_u16() {
            return Err(MirrorError::Unauthorized);
        }
        match self.data {
            Some(data) if self.success => Ok(data),
            _ => Err(MirrorError::remote(
                Some(self.status),
                error_message(self.status, self.error_body.as_deref()),
            )),
        }
    }
}

/// Best human-readable message of an error body: the `detail`, `error` or
/// `message` field of a JSON object, the raw text, or the status line.
fn error_message(status: u16, body: Option<&str>) -> String {
    let body = body.map(str::trim).filter(|b| !b.is_empty());
    let Some(body) = body else {
        return StatusCode::from_u16(status)
            .map(|s| s.to_string())
            .unwrap_or_else(|_| format!("HTTP {status}"));
    };
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["detail", "error", "message"] {
            if let Some(text) = map.get(key).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }
    body.to_string()
}

/// A JSON API client bound to one base URL.
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// The underlying middleware-enabled client.
    inner: ClientWithMiddleware,
    /// The base URL to which all relative paths are joined.
    base_url: Url,
    /// An optional Bearer token used for authorization.
    auth_token: Option<String>,
}

impl ApiClient {
    /// Creates a client with the retry policy and the given request timeout.
    ///
    /// `base_url` should end in `/` so relative paths join below it.
    pub fn new(base_url: Url, auth_token: Option<String>, timeout: Duration) -> Result<Self> {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(MAX_RETRIES);

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MirrorError::Config(format!("cannot build HTTP client: {e}")))?;
        let client = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner: client,
            base_url,
            auth_token,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs one HTTP request and decodes the JSON answer.
    ///
    /// Non-2xx answers are returned as an unsuccessful [`ApiResponse`] with the
    /// error body captured; only URL, network and decode failures are `Err`.
    pub async fn request<T, Q, B>(
        &self,
        method: Method,
        path: &str,
        query: Option<&Q>,
        body: Option<&B>,
    ) -> Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
        B: Serialize + ?Sized,
    {
        let full_url = self.base_url.join(path)?;
        log::debug!("{} {}", method, full_url);
        let mut req = self.inner.request(method, full_url);

        if let Some(q) = query {
            req = req.query(q);
        }

        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        if let Some(b) = body {
            let json_body = serde_json::to_string(b)?;
            req = req.header(CONTENT_TYPE, "application/json").body(json_body);
        }

        let response: reqwest::Response = req.send().await?;
        let status = response.status();
        let resp_headers = response.headers().clone();

        if status.is_success() {
            let data = response.json::<T>().await?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers: resp_headers,
            })
        } else {
            let error_text = response.text().await.ok();
            log::warn!("Request to {} answered {}", path, status);
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
                headers: resp_headers,
            })
        }
    }

    /// `GET path?query`, decoded and mapped to [`MirrorError`].
    pub async fn get<T, Q>(&self, path: &str, query: Option<&Q>) -> Result<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        self.request::<T, Q, ()>(Method::GET, path, query, None)
            .await?
            .into_result()
    }

    /// `POST path` with a JSON body, decoded and mapped to [`MirrorError`].
    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request::<T, (), B>(Method::POST, path, None, Some(body))
            .await?
            .into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: Option<&str>) -> ApiResponse<u8> {
        ApiResponse {
            data: None,
            error_body: body.map(str::to_string),
            status,
            success: false,
            headers: HeaderMap::new(),
        }
    }

    #[test]
    fn unauthorized_is_its_own_error() {
        assert_eq!(response(401, None).into_result(), Err(MirrorError::Unauthorized));
    }

    #[test]
    fn error_bodies_become_messages() {
        assert_eq!(
            response(404, Some(r#"{"detail":"Not found."}"#)).into_result(),
            Err(MirrorError::remote(Some(404), "Not found."))
        );
        assert_eq!(
            response(400, Some(r#"{"error":"Alarm is not active"}"#)).into_result(),
            Err(MirrorError::remote(Some(400), "Alarm is not active"))
        );
        assert_eq!(
            response(502, Some("  bad gateway \n")).into_result(),
            Err(MirrorError::remote(Some(502), "bad gateway"))
        );
        assert_eq!(
            response(503, None).into_result(),
            Err(MirrorError::remote(Some(503), "503 Service Unavailable"))
        );
    }

    #[test]
    fn success_yields_the_payload() {
        let ok = ApiResponse {
            data: Some(7u8),
            error_body: None,
            status: 200,
            success: true,
            headers: HeaderMap::new(),
        };
        assert_eq!(ok.into_result(), Ok(7));
    }
}
