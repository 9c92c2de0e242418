// In-memory fakes shared by the unit tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::http::{ApiRequest, ApiResponse, HttpTransport, TransportError};

pub(crate) const BASE_URL: &str = "http://test.local";

type Responder = dyn Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync;

/// Transport that answers every request with a closure and records what it
/// was sent.
pub(crate) struct FakeTransport {
    responder: Box<Responder>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl FakeTransport {
    pub(crate) fn new(
        responder: impl Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(FakeTransport {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of recorded requests whose URL ends with `path`.
    pub(crate) fn count(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.ends_with(path))
            .count()
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        // Let concurrent callers interleave the way real I/O would.
        tokio::task::yield_now().await;
        (self.responder)(&request)
    }
}

pub(crate) fn ok(body: &str) -> Result<ApiResponse, TransportError> {
    Ok(ApiResponse::new(200, body))
}

pub(crate) fn status(code: u16, body: &str) -> Result<ApiResponse, TransportError> {
    Ok(ApiResponse::new(code, body))
}
