use crate::config::CrawlConfig;
use crate::images::ImageSink;
use crate::jobs::Job;
use crate::model::{
    CrawlError, ExtractError, ItemOutcome, ItemState, PersistOutcome, RunReport, StorageError,
    WorkItem,
};
use crate::scraper::Fetcher;
use crate::storage::SqliteStorage;

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Runs jobs against one fetcher and one store.
pub struct Coordinator {
    fetcher: Arc<dyn Fetcher>,
    storage: Arc<Mutex<SqliteStorage>>,
    images: Option<ImageSink>,
    config: CrawlConfig,
}

impl Coordinator {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        storage: Arc<Mutex<SqliteStorage>>,
        config: CrawlConfig,
    ) -> Self {
        Self {
            fetcher,
            storage,
            images: None,
            config,
        }
    }

    pub fn with_image_sink(mut self, sink: ImageSink) -> Self {
        self.images = Some(sink);
        self
    }

    /// Crawls the job's frontier once.
    ///
    /// Per-item failures are counted in the report and leave the item in the
    /// frontier for the next run. Cancelling `cancel` stops new items from
    /// starting; in-flight items finish and are committed. The open batch is
    /// committed on every exit path.
    pub async fn run<J: Job>(
        &self,
        job: &J,
        cancel: &CancellationToken,
    ) -> Result<RunReport, CrawlError> {
        let name = job.name();
        let before_dispatch = |source: StorageError| CrawlError::Storage {
            job: name.to_string(),
            source,
        };

        let items = {
            let storage = self.storage.lock().await;
            job.frontier(&storage).map_err(before_dispatch)?
        };
        let mut report = RunReport::new(name, items.len());
        if items.is_empty() {
            info!("{}: nothing left to crawl", name);
            return Ok(report);
        }
        info!(
            "{}: {} items pending, {} workers",
            name,
            items.len(),
            self.config.workers
        );

        self.storage
            .lock()
            .await
            .begin_batch()
            .map_err(before_dispatch)?;

        // Cancelled by the caller or by a fatal store error.
        let stop = cancel.child_token();
        let batch_size = self.config.batch_size.max(1);
        let mut fatal: Option<StorageError> = None;
        let mut since_checkpoint = 0;

        let mut outcomes = Box::pin(
            stream::iter(items)
                .take_until(stop.clone().cancelled_owned())
                .map(|item| self.process(job, item))
                .buffer_unordered(self.config.workers.max(1)),
        );

        while let Some(outcome) = outcomes.next().await {
            report.record(&outcome);

            if let ItemState::StoreFailed(e) = outcome.state {
                if e.is_fatal() && fatal.is_none() {
                    error!("{}: store unavailable, stopping: {}", name, e);
                    stop.cancel();
                    fatal = Some(e);
                }
            }

            since_checkpoint += 1;
            if since_checkpoint >= batch_size && fatal.is_none() {
                since_checkpoint = 0;
                let storage = self.storage.lock().await;
                if let Err(e) = storage.checkpoint().and_then(|_| storage.begin_batch()) {
                    error!("{}: checkpoint failed, stopping: {}", name, e);
                    stop.cancel();
                    fatal = Some(e);
                }
            }
        }
        drop(outcomes);

        if let Err(e) = self.storage.lock().await.checkpoint() {
            error!("{}: final checkpoint failed: {}", name, e);
            fatal.get_or_insert(e);
        }

        report.cancelled = cancel.is_cancelled();
        if report.cancelled {
            warn!(
                "{}: cancelled after {} of {} items",
                name, report.processed, report.total
            );
        }

        match fatal {
            Some(source) => Err(CrawlError::Fatal {
                job: name.to_string(),
                source,
                report: Box::new(report),
            }),
            None => Ok(report),
        }
    }

    async fn process<J: Job>(&self, job: &J, item: WorkItem) -> ItemOutcome {
        let mut shape_retries = 0;

        let mut output = loop {
            debug!("{} {}: {:?}", job.name(), item.key, ItemState::Fetching);
            let html = match self.fetcher.fetch(&item.request()).await {
                Ok(html) => html,
                Err(e) => return finished(item, ItemState::FetchFailed(e)),
            };

            debug!("{} {}: {:?}", job.name(), item.key, ItemState::Extracting);
            match job.extract(&item, &html) {
                Ok(output) => break output,
                Err(e @ ExtractError::ShapeMismatch { .. })
                    if shape_retries < self.config.shape_retries =>
                {
                    shape_retries += 1;
                    warn!(
                        "{} {}: {}, fetching again in {} ms",
                        job.name(),
                        item.key,
                        e,
                        self.config.shape_retry_delay_ms
                    );
                    sleep(Duration::from_millis(self.config.shape_retry_delay_ms)).await;
                }
                Err(e) => return finished(item, ItemState::ExtractFailed(e)),
            }
        };

        let images_written = match &self.images {
            Some(sink) => {
                let images = job.images(&output);
                match sink.write_all(images).await {
                    Ok(_) => true,
                    Err(e) => {
                        warn!("{} {}: could not write images: {}", job.name(), item.key, e);
                        false
                    }
                }
            }
            None => false,
        };
        if !images_written {
            job.forget_images(&mut output);
        }

        let persisted = {
            let mut storage = self.storage.lock().await;
            job.persist(&mut storage, &item, &output)
        };
        match persisted {
            Ok(PersistOutcome::Inserted(rows)) => finished(item, ItemState::Persisted { rows }),
            Ok(PersistOutcome::Duplicate) => ItemOutcome {
                item,
                state: ItemState::Persisted { rows: 0 },
                duplicate: true,
            },
            Err(e) => finished(item, ItemState::StoreFailed(e)),
        }
    }
}

fn finished(item: WorkItem, state: ItemState) -> ItemOutcome {
    ItemOutcome {
        item,
        state,
        duplicate: false,
    }
}
