use crate::config::FetchConfig;
use crate::model::{FetchError, FetchRequest};
use crate::scraper::traits::Fetcher;

use rand::Rng;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, REFERER};
use reqwest::{Client, StatusCode};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
const ACCEPT_LANGUAGE_ZH: &str = "zh-TW,zh;q=0.9,en-US;q=0.8,en;q=0.7";

/// HTTP fetcher owned by one crawl run. The underlying client pools
/// connections and is shared by every worker.
pub struct HttpFetcher {
    client: Client,
    retries: u32,
    backoff: Duration,
    politeness_ms: (u64, u64),
}

impl HttpFetcher {
    pub fn new(cfg: &FetchConfig, base_url: &Url, pool_size: usize) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(ACCEPT_LANGUAGE_ZH));
        headers.insert(
            REFERER,
            HeaderValue::from_str(base_url.as_str()).map_err(|e| FetchError::Client(e.to_string()))?,
        );

        if cfg.accept_invalid_certs {
            warn!("Certificate validation disabled for this run");
        }

        let client = Client::builder()
            .user_agent(cfg.user_agent.as_str())
            .default_headers(headers)
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .pool_max_idle_per_host(pool_size)
            .danger_accept_invalid_certs(cfg.accept_invalid_certs)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            client,
            retries: cfg.retries,
            backoff: Duration::from_millis(cfg.backoff_ms),
            politeness_ms: (cfg.politeness_min_ms, cfg.politeness_max_ms),
        })
    }

    async fn attempt(&self, url: &Url, req: &FetchRequest) -> Result<String, FetchError> {
        let (min, max) = self.politeness_ms;
        let pause = rand::rng().random_range(min..=max);
        sleep(Duration::from_millis(pause)).await;

        let response = self
            .client
            .get(url.clone())
            .query(&req.query)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Server {
                status: status.as_u16(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, req: &FetchRequest) -> Result<String, FetchError> {
        let url = Url::parse(&req.url).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", req.url, e)))?;
        retry_with_budget(self.retries, self.backoff, |attempt| {
            debug!("GET {} (attempt {})", url, attempt);
            self.attempt(&url, req)
        })
        .await
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or has been
/// tried `budget` times. Exhausting the budget yields `BudgetExhausted`.
pub async fn retry_with_budget<T, F, Fut>(
    budget: u32,
    backoff: Duration,
    mut op: F,
) -> Result<T, FetchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let budget = budget.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= budget => {
                return Err(FetchError::BudgetExhausted {
                    attempts: attempt,
                    last: Box::new(e),
                });
            }
            Err(e) => {
                warn!("Attempt {}/{} failed: {}", attempt, budget, e);
                sleep(jittered(backoff)).await;
            }
        }
    }
}

fn jittered(base: Duration) -> Duration {
    if base.is_zero() {
        return base;
    }
    let factor = rand::rng().random_range(0.5..1.5);
    base.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn permanent_failure_uses_exactly_the_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = retry_with_budget(3, Duration::ZERO, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(FetchError::Server { status: 500 }) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(FetchError::BudgetExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, FetchError::Server { status: 500 }));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn recovers_before_budget_runs_out() {
        let result = retry_with_budget(3, Duration::ZERO, |attempt| async move {
            if attempt < 2 {
                Err(FetchError::Network("reset".into()))
            } else {
                Ok(attempt)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn non_retryable_error_is_returned_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = retry_with_budget(5, Duration::ZERO, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(FetchError::Client("bad".into())) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(FetchError::Client(_))));
    }

    #[tokio::test]
    async fn zero_budget_still_tries_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let _: Result<(), _> = retry_with_budget(0, Duration::ZERO, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(FetchError::Network("down".into())) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn jitter_stays_within_half_to_one_and_a_half() {
        let base = Duration::from_millis(1000);
        for _ in 0..100 {
            let d = jittered(base);
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn builds_client_from_default_config() {
        let base = Url::parse("https://dict.variants.moe.edu.tw/").unwrap();
        assert!(HttpFetcher::new(&FetchConfig::default(), &base, 5).is_ok());
    }

    #[tokio::test]
    async fn unparseable_url_fails_without_a_request() {
        let base = Url::parse("https://dict.variants.moe.edu.tw/").unwrap();
        let fetcher = HttpFetcher::new(&FetchConfig::default(), &base, 1).unwrap();
        let req = crate::model::WorkItem::new("A00001", "一", "dictView.jsp?ID=1").request();
        let err = fetcher.fetch(&req).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
    }
}
