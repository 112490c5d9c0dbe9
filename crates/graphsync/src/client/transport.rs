//! HTTP seam for the query executor

use std::future::Future;
use std::time::Duration;

use serde_json::json;

use crate::error::TransportError;

/// One POST of a GraphQL document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphRequest {
    pub url: String,
    pub token: String,
    pub query: String,
}

impl GraphRequest {
    pub fn payload(&self) -> serde_json::Value {
        json!({ "query": self.query })
    }
}

/// Raw HTTP response; status codes are left for the executor to classify
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Something that can POST a GraphQL request
pub trait Transport: Send + Sync + 'static {
    fn post(
        &self,
        request: GraphRequest,
    ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send;
}

impl<T: Transport> Transport for std::sync::Arc<T> {
    fn post(
        &self,
        request: GraphRequest,
    ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send {
        (**self).post(request)
    }
}

/// Production transport on a shared `ureq` agent
///
/// ureq is blocking, so each request runs on tokio's blocking pool.
#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
    user_agent: String,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            agent,
            user_agent: format!("graphsync/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Transport for UreqTransport {
    fn post(
        &self,
        request: GraphRequest,
    ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send {
        let agent = self.agent.clone();
        let user_agent = self.user_agent.clone();
        async move {
            tokio::task::spawn_blocking(move || -> Result<HttpResponse, TransportError> {
                let mut response = agent
                    .post(&request.url)
                    .header("Authorization", &format!("bearer {}", request.token))
                    .header("User-Agent", &user_agent)
                    .send_json(request.payload())?;
                let status = response.status().as_u16();
                let body = response.body_mut().read_to_string()?;
                Ok(HttpResponse { status, body })
            })
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?
        }
    }
}

impl From<ureq::Error> for TransportError {
    fn from(error: ureq::Error) -> Self {
        match error {
            ureq::Error::StatusCode(status) => TransportError::Status(status),
            ureq::Error::Timeout(_) => TransportError::Timeout,
            ureq::Error::BodyExceedsLimit(_) => TransportError::Body(error.to_string()),
            ureq::Error::Io(ref io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                TransportError::Body(error.to_string())
            }
            other => TransportError::Connection(other.to_string()),
        }
    }
}
