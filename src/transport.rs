//! HTTP transport used by the senders.
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sender::SendError;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Status and body of an answered request.
pub struct Response
{
    pub status: u16,
    pub body: String,
}

/// Something that can POST a JSON document to an endpoint.
///
/// Implementations only fail with `SendError::ConnectionFailure` when the endpoint cannot be
/// reached and with `SendError::Unexpected` for everything else. Non success status codes are
/// returned as a `Response`.
pub trait Transport
{
    fn post_json(&self, endpoint: &str, body: &Value) -> Result<Response, SendError>;
}

fn default_user_agent() -> String {
    format!("hrseed/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// Parameters for the HTTP client.
pub struct TransportParameters
{
    /// Value of the `User-Agent` header.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Request timeout, the client default applies when unset.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl Default for TransportParameters {
    fn default() -> Self {
        TransportParameters {
            user_agent: default_user_agent(),
            timeout_seconds: None,
        }
    }
}

/// Blocking reqwest client.
pub struct HttpTransport
{
    client: Client,
}

impl HttpTransport {
    pub fn new(params: &TransportParameters) -> Result<HttpTransport, SendError> {
        let mut builder = Client::builder().user_agent(params.user_agent.as_str());
        if let Some(timeout) = params.timeout_seconds {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let client = builder.build()
            .map_err(|err| SendError::Unexpected(format!("cannot build http client: {}", err)))?;
        Ok(HttpTransport { client })
    }
}

impl Transport for HttpTransport {
    fn post_json(&self, endpoint: &str, body: &Value) -> Result<Response, SendError> {
        let response = match self.client.post(endpoint).json(body).send() {
            Ok(response) => response,
            Err(err) if err.is_connect() => {
                return Err(SendError::ConnectionFailure {
                    endpoint: endpoint.to_string(),
                    reason: err.to_string(),
                });
            }
            Err(err) => return Err(SendError::Unexpected(err.to_string())),
        };

        let status = response.status().as_u16();
        let body = response.text()
            .map_err(|err| SendError::Unexpected(format!("cannot read response body: {}", err)))?;
        log::trace!(target: "hrseed::http", "POST \'{}\' answered with \'{}\'", endpoint, status);

        Ok(Response { status, body })
    }
}
