// In-memory fetcher for pipeline tests. Attempts go through the same retry
// budget as the HTTP fetcher.
use crate::model::{FetchError, FetchRequest};
use crate::scraper::fetcher::retry_with_budget;
use crate::scraper::traits::Fetcher;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum FakeResponse {
    Page(String),
    Status(u16),
    /// Serves each entry once in order, then repeats the last one.
    Sequence(Vec<FakeResponse>),
}

pub struct FakeFetcher {
    budget: u32,
    responses: Mutex<HashMap<String, FakeResponse>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self {
            budget: 3,
            responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_budget(mut self, budget: u32) -> Self {
        self.budget = budget;
        self
    }

    pub fn page(self, url: &str, html: &str) -> Self {
        self.set(url, FakeResponse::Page(html.to_string()));
        self
    }

    pub fn status(self, url: &str, status: u16) -> Self {
        self.set(url, FakeResponse::Status(status));
        self
    }

    pub fn set(&self, url: &str, response: FakeResponse) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    /// Attempts made against `url`, counting every retry.
    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    fn attempt(&self, key: &str) -> Result<String, FetchError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(key.to_string()).or_default();
            *count += 1;
            *count - 1
        };
        match self.responses.lock().unwrap().get(key) {
            Some(response) => Self::resolve(response, call),
            None => Err(FetchError::Server { status: 404 }),
        }
    }

    fn resolve(response: &FakeResponse, call: usize) -> Result<String, FetchError> {
        match response {
            FakeResponse::Page(html) => Ok(html.clone()),
            FakeResponse::Status(status) => Err(FetchError::Server { status: *status }),
            FakeResponse::Sequence(steps) => match steps.get(call).or(steps.last()) {
                Some(step) => Self::resolve(step, 0),
                None => Err(FetchError::Network("empty sequence".into())),
            },
        }
    }
}

/// Requests with query parameters are keyed as `url?k=v&k=v`.
pub fn request_key(req: &FetchRequest) -> String {
    if req.query.is_empty() {
        return req.url.clone();
    }
    let query: Vec<String> = req.query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{}?{}", req.url, query.join("&"))
}

#[async_trait::async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, req: &FetchRequest) -> Result<String, FetchError> {
        let key = request_key(req);
        retry_with_budget(self.budget, Duration::ZERO, |_| {
            let result = self.attempt(&key);
            async move { result }
        })
        .await
    }
}
