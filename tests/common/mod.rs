#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use cart_session::{
    CartSession, DurableStore, Event, EventSender, HttpRequest, HttpResponse, Transport,
};
use tokio::sync::mpsc;

pub const BASE_URL: &str = "https://shop.test/wp-json/wc/store/v1";

#[derive(Default)]
struct MockState {
    responses: VecDeque<Result<HttpResponse, String>>,
    requests: Vec<HttpRequest>,
    active: usize,
    max_active: usize,
}

/// A mock transport that replays scripted responses in order and records
/// every request it receives.
///
/// Clones share the same script, so a test can keep one clone while the
/// session owns another.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    delay: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every `send`.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            state: Arc::default(),
            delay: Some(delay),
        }
    }

    pub fn push(&self, response: HttpResponse) {
        self.state
            .lock()
            .unwrap()
            .responses
            .push_back(Ok(response));
    }

    /// Script a failure where no response arrives.
    pub fn push_error(&self, message: &str) {
        self.state
            .lock()
            .unwrap()
            .responses
            .push_back(Err(message.to_string()));
    }

    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().requests.len()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn last_request(&self) -> Option<HttpRequest> {
        self.state.lock().unwrap().requests.last().cloned()
    }

    /// Highest number of requests that were in flight at once.
    pub fn max_concurrent(&self) -> usize {
        self.state.lock().unwrap().max_active
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        {
            let mut state = self.state.lock().unwrap();
            state.requests.push(request);
            state.active += 1;
            state.max_active = state.max_active.max(state.active);
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.active -= 1;
        match state.responses.pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => Err(anyhow::anyhow!("MockTransport: no more responses in queue")),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// A 200 response carrying `body` and the given headers.
pub fn cart_response(body: Value, nonce: Option<&str>, token: Option<&str>) -> HttpResponse {
    let mut response = HttpResponse::new(200, body.to_string());
    if let Some(nonce) = nonce {
        response.insert_header("Nonce", nonce);
    }
    if let Some(token) = token {
        response.insert_header("Cart-Token", token);
    }
    response
}

pub fn error_response(status: u16, message: &str) -> HttpResponse {
    let body = serde_json::json!({
        "code": "woocommerce_rest_error",
        "message": message,
        "data": {"status": status}
    });
    HttpResponse::new(status, body.to_string())
}

pub fn build_session(transport: &MockTransport, store: Arc<dyn DurableStore>) -> CartSession {
    CartSession::builder()
        .base_url(BASE_URL)
        .transport(transport.clone())
        .shared_store(store)
        .build()
        .expect("build session")
}

pub fn build_session_with_events(
    transport: &MockTransport,
    store: Arc<dyn DurableStore>,
) -> (CartSession, mpsc::Receiver<Event>) {
    let (events, rx) = EventSender::channel(64);
    let session = CartSession::builder()
        .base_url(BASE_URL)
        .transport(transport.clone())
        .shared_store(store)
        .events(events)
        .build()
        .expect("build session");
    (session, rx)
}

/// Drain every event already queued.
pub fn drain_events(rx: &mut mpsc::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Wait until `rx` yields `wanted`, skipping other events.
pub async fn wait_for_event(rx: &mut mpsc::Receiver<Event>, wanted: &Event) -> bool {
    let deadline = tokio::time::sleep(Duration::from_secs(5));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) if &event == wanted => return true,
                Some(_) => continue,
                None => return false,
            },
            _ = &mut deadline => return false,
        }
    }
}
