use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info};

use crate::error::ManagerError;
use crate::status::StatusEvent;
use crate::transfer::{DownloadRequest, TransferContext, TransferOutcome};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub canceled: usize,
    pub failed: usize,
    pub peak_active: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Summary: Completed: {} | Canceled: {} | Failed: {} | Peak concurrency: {}",
            self.completed, self.canceled, self.failed, self.peak_active
        )
    }
}

#[derive(Default)]
struct Gauges {
    queued: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
    completed: AtomicUsize,
    canceled: AtomicUsize,
    failed: AtomicUsize,
}

impl Gauges {
    fn started(&self) {
        self.queued.fetch_sub(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now, Ordering::SeqCst);
    }

    fn finished(&self, outcome: Option<&TransferOutcome>) {
        let counter = match outcome {
            Some(TransferOutcome::Completed { .. }) => &self.completed,
            Some(TransferOutcome::Canceled { .. }) => &self.canceled,
            Some(TransferOutcome::Failed(_)) | None => &self.failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn summary(&self) -> RunSummary {
        RunSummary {
            completed: self.completed.load(Ordering::SeqCst),
            canceled: self.canceled.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            peak_active: self.peak_active.load(Ordering::SeqCst),
        }
    }
}

/// Bounded pool that runs queued downloads in submission order.
///
/// The queue is unbounded: `submit` never waits and never pushes back.
pub struct Dispatcher {
    sender: mpsc::UnboundedSender<DownloadRequest>,
    gauges: Arc<Gauges>,
    handle: JoinHandle<()>,
}

impl Dispatcher {
    pub fn spawn(ctx: TransferContext, concurrency: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let gauges = Arc::new(Gauges::default());
        let handle = tokio::spawn(dispatch_loop(
            ctx,
            concurrency.max(1),
            receiver,
            Arc::clone(&gauges),
        ));

        Self {
            sender,
            gauges,
            handle,
        }
    }

    pub fn submit(&self, request: DownloadRequest) -> Result<(), ManagerError> {
        self.gauges.queued.fetch_add(1, Ordering::SeqCst);
        self.sender.send(request).map_err(|_| {
            self.gauges.queued.fetch_sub(1, Ordering::SeqCst);
            ManagerError::ShutDown
        })
    }

    pub fn queued(&self) -> usize {
        self.gauges.queued.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.gauges.active.load(Ordering::SeqCst)
    }

    pub fn summary(&self) -> RunSummary {
        self.gauges.summary()
    }

    /// Stops accepting requests and waits for queued and running ones to finish.
    pub async fn shutdown(self) -> RunSummary {
        drop(self.sender);
        if let Err(e) = self.handle.await {
            error!(error = %e, "dispatcher task failed");
        }
        self.gauges.summary()
    }
}

async fn dispatch_loop(
    ctx: TransferContext,
    concurrency: usize,
    mut receiver: mpsc::UnboundedReceiver<DownloadRequest>,
    gauges: Arc<Gauges>,
) {
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut running = JoinSet::new();

    while let Some(request) = receiver.recv().await {
        // Only this loop acquires permits, so waiting here keeps FIFO order.
        let permit = loop {
            tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => break permit,
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    reap(joined, &ctx, &gauges);
                }
            }
        };
        let Ok(permit) = permit else {
            break;
        };

        gauges.started();
        debug!(url = %request.url, active = gauges.active.load(Ordering::SeqCst), "dispatching");

        let task_ctx = ctx.clone();
        let task_gauges = Arc::clone(&gauges);
        running.spawn(async move {
            let outcome = task_ctx.run(&request).await;
            task_gauges.finished(Some(&outcome));
            drop(permit);
        });
        reap_ready(&mut running, &ctx, &gauges);
    }

    while let Some(joined) = running.join_next().await {
        reap(joined, &ctx, &gauges);
    }
    info!(summary = %gauges.summary(), "dispatcher drained");
}

/// Collects tasks that already finished without waiting on the rest.
fn reap_ready(running: &mut JoinSet<()>, ctx: &TransferContext, gauges: &Gauges) {
    while let Some(joined) = running.try_join_next() {
        reap(joined, ctx, gauges);
    }
}

fn reap(joined: Result<(), JoinError>, ctx: &TransferContext, gauges: &Gauges) {
    if let Err(e) = joined {
        error!(error = %e, "transfer task aborted");
        gauges.finished(None);
        ctx.sink()
            .publish(&StatusEvent::info(format!("Error downloading image: {}", e)));
    }
}
