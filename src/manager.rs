use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::control::ControlSignals;
use crate::error::ManagerError;
use crate::pool::{Dispatcher, RunSummary};
use crate::settings::Settings;
use crate::status::{StatusEvent, StatusSink};
use crate::transfer::{DownloadRequest, TransferContext};

/// Operator-facing entry point: download, pause, resume, cancel, clear.
pub struct DownloadManager {
    signals: Arc<ControlSignals>,
    sink: Arc<dyn StatusSink>,
    dispatcher: Dispatcher,
    cancel_pulse: Duration,
}

impl DownloadManager {
    /// Must be called from within a tokio runtime.
    pub fn new(settings: &Settings, sink: Arc<dyn StatusSink>) -> Result<Self> {
        std::fs::create_dir_all(&settings.download_dir).with_context(|| {
            format!(
                "Failed to create download directory: {:?}",
                settings.download_dir
            )
        })?;

        let client = settings
            .build_client()
            .context("Failed to build HTTP client")?;
        let signals = Arc::new(ControlSignals::new());
        let ctx = TransferContext::new(client, settings, Arc::clone(&signals), Arc::clone(&sink));
        let dispatcher = Dispatcher::spawn(ctx, settings.concurrency);

        info!(
            dir = %settings.download_dir.display(),
            concurrency = settings.concurrency,
            "download manager started"
        );

        Ok(Self {
            signals,
            sink,
            dispatcher,
            cancel_pulse: settings.cancel_pulse,
        })
    }

    /// Queues `url` for download. Blank input is rejected and nothing is queued.
    pub fn download(&self, url: &str) -> Result<(), ManagerError> {
        let url = url.trim();
        if url.is_empty() {
            let err = ManagerError::EmptyUrl;
            self.sink.publish(&StatusEvent::Rejected {
                message: err.to_string(),
            });
            return Err(err);
        }

        debug!(url, "queued");
        self.dispatcher.submit(DownloadRequest::new(url))
    }

    pub fn pause(&self) {
        self.signals.set_paused(true);
        self.sink.publish(&StatusEvent::info("Downloads paused."));
    }

    pub fn resume(&self) {
        self.signals.set_paused(false);
        self.sink.publish(&StatusEvent::info("Downloads resumed."));
    }

    /// Pulses the cancel flag. Only transfers that poll it during the pulse stop.
    pub async fn cancel(&self) {
        self.sink.publish(&StatusEvent::info("Downloads canceled."));
        self.signals.pulse_cancel(self.cancel_pulse).await;
    }

    /// Clears the displayed status. Running transfers are not touched.
    pub fn clear(&self) {
        self.sink.clear();
    }

    pub fn history(&self) -> Vec<String> {
        self.sink.history()
    }

    pub fn publish(&self, event: StatusEvent) {
        self.sink.publish(&event);
    }

    pub fn is_paused(&self) -> bool {
        self.signals.is_paused()
    }

    pub fn queued(&self) -> usize {
        self.dispatcher.queued()
    }

    pub fn active(&self) -> usize {
        self.dispatcher.active()
    }

    pub fn summary(&self) -> RunSummary {
        self.dispatcher.summary()
    }

    /// Waits for everything already queued to finish.
    pub async fn shutdown(self) -> RunSummary {
        let summary = self.dispatcher.shutdown().await;
        info!(%summary, "download manager stopped");
        summary
    }
}
