use crate::model::{FetchError, FetchRequest};

#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// Returns the page body, or the reason the request could not be served.
    async fn fetch(&self, req: &FetchRequest) -> Result<String, FetchError>;
}
