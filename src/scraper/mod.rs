pub mod fetcher;
pub mod traits;

#[cfg(test)]
pub mod fake;

pub use fetcher::HttpFetcher;
pub use traits::Fetcher;
