use crate::error::{Result, SetupError};
use crate::server::installer::core::downloader::{ArtifactDownloader, DownloadOutcome, DownloadTask};
use crate::server::installer::types::ProgressReporter;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Totals for a finished batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub downloaded: usize,
    pub already_present: usize,
}

/// Bounded worker pool over an `ArtifactDownloader`.
pub struct BatchDownloader {
    downloader: Arc<dyn ArtifactDownloader>,
    concurrency: usize,
}

impl BatchDownloader {
    pub fn new(downloader: Arc<dyn ArtifactDownloader>, concurrency: usize) -> Self {
        Self {
            downloader,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn download_all(
        &self,
        tasks: Vec<DownloadTask>,
        reporter: Arc<dyn ProgressReporter>,
        base_progress: i32,
        progress_weight: f32,
    ) -> Result<BatchSummary> {
        // Deduplicate tasks by destination to avoid concurrent writes to the same file
        let mut unique_tasks = Vec::new();
        let mut seen_paths = std::collections::HashSet::new();
        for task in tasks {
            if seen_paths.insert(task.destination.clone()) {
                unique_tasks.push(task);
            }
        }

        let total = unique_tasks.len();
        if total == 0 {
            return Ok(BatchSummary::default());
        }

        let finished = Arc::new(AtomicUsize::new(0));
        let fresh = Arc::new(AtomicUsize::new(0));
        reporter.set_step_count(0, Some(total as u32));

        let results = stream::iter(unique_tasks)
            .map(|task| {
                let downloader = self.downloader.clone();
                let reporter = reporter.clone();
                let finished = finished.clone();
                let fresh = fresh.clone();

                async move {
                    // Check for cancellation/pause before starting
                    if reporter.is_cancelled() {
                        return Err(SetupError::Cancelled);
                    }

                    while reporter.is_paused() {
                        if reporter.is_cancelled() {
                            return Err(SetupError::Cancelled);
                        }
                        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                    }

                    let outcome = downloader.download(&task, &*reporter).await.map_err(|e| {
                        log::warn!("Failed to download {:?}: {}", task.destination, e);
                        e
                    })?;
                    if matches!(outcome, DownloadOutcome::Downloaded { .. }) {
                        fresh.fetch_add(1, Ordering::SeqCst);
                    }

                    let count = finished.fetch_add(1, Ordering::SeqCst) + 1;
                    let progress =
                        base_progress + ((count as f32 / total as f32) * progress_weight) as i32;
                    reporter.set_percent(progress);
                    reporter.set_step_count(count as u32, Some(total as u32));
                    reporter.set_message(&format!("Downloading files... ({}/{})", count, total));

                    if count % 10 == 0 || count == total {
                        log::info!("Batch download progress: {}/{} ({}%)", count, total, progress);
                    }

                    Ok(())
                }
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<Result<()>>>()
            .await;

        // Cancellation wins over whatever else failed in the same batch.
        let mut first_error = None;
        for result in results {
            match result {
                Err(SetupError::Cancelled) => return Err(SetupError::Cancelled),
                Err(e) if first_error.is_none() => first_error = Some(e),
                _ => {}
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let downloaded = fresh.load(Ordering::SeqCst);
        Ok(BatchSummary {
            downloaded,
            already_present: total - downloaded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::installer::types::SilentProgressReporter;
    use futures::future::BoxFuture;
    use std::sync::Mutex;

    struct RecordingDownloader {
        seen: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    impl ArtifactDownloader for RecordingDownloader {
        fn download<'a>(
            &'a self,
            task: &'a DownloadTask,
            _reporter: &'a dyn ProgressReporter,
        ) -> BoxFuture<'a, Result<DownloadOutcome>> {
            Box::pin(async move {
                let url = task.primary_url().to_string();
                self.seen.lock().unwrap().push(url.clone());
                if self.fail_on.as_deref() == Some(url.as_str()) {
                    return Err(SetupError::DownloadFailed {
                        url,
                        attempts: 3,
                        cause: "boom".into(),
                    });
                }
                Ok(DownloadOutcome::Downloaded { bytes: 1 })
            })
        }
    }

    #[tokio::test]
    async fn duplicates_are_fetched_once() {
        let fake = Arc::new(RecordingDownloader {
            seen: Mutex::new(Vec::new()),
            fail_on: None,
        });
        let batch = BatchDownloader::new(fake.clone(), 4);
        let tasks = vec![
            DownloadTask::new("a", "/tmp/x/a.jar"),
            DownloadTask::new("a-again", "/tmp/x/a.jar"),
            DownloadTask::new("b", "/tmp/x/b.jar"),
        ];

        let summary = batch
            .download_all(tasks, Arc::new(SilentProgressReporter), 0, 100.0)
            .await
            .unwrap();
        assert_eq!(summary.downloaded, 2);
        assert_eq!(fake.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn a_failed_file_fails_the_batch() {
        let fake = Arc::new(RecordingDownloader {
            seen: Mutex::new(Vec::new()),
            fail_on: Some("b".into()),
        });
        let batch = BatchDownloader::new(fake, 1);
        let tasks = vec![
            DownloadTask::new("a", "/tmp/y/a.jar"),
            DownloadTask::new("b", "/tmp/y/b.jar"),
        ];

        let err = batch
            .download_all(tasks, Arc::new(SilentProgressReporter), 0, 100.0)
            .await
            .unwrap_err();
        assert!(matches!(err, SetupError::DownloadFailed { .. }));
    }
}
