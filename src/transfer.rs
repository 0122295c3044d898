use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use futures::TryStreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tracing::{debug, info, instrument, warn};

use crate::control::ControlSignals;
use crate::error::TransferError;
use crate::naming::{filename_from_url, sanitize_filename, unique_filename};
use crate::settings::Settings;
use crate::status::{Progress, StatusEvent, StatusSink};

/// One URL the operator asked for. Duplicate URLs are independent requests.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub submitted_at: DateTime<Local>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            submitted_at: Local::now(),
        }
    }
}

#[derive(Debug)]
pub enum TransferOutcome {
    Completed { path: PathBuf, bytes: u64 },
    /// Stopped by the cancel signal. The partial file stays on disk.
    Canceled { path: PathBuf, bytes: u64 },
    Failed(TransferError),
}

/// Everything a transfer needs, shared by all transfers of one manager.
#[derive(Clone)]
pub struct TransferContext {
    client: Client,
    download_dir: PathBuf,
    signals: Arc<ControlSignals>,
    sink: Arc<dyn StatusSink>,
    chunk_size: usize,
    pause_poll: Duration,
}

impl TransferContext {
    pub fn new(
        client: Client,
        settings: &Settings,
        signals: Arc<ControlSignals>,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            client,
            download_dir: settings.download_dir.clone(),
            signals,
            sink,
            chunk_size: settings.chunk_size.max(1),
            pause_poll: settings.pause_poll,
        }
    }

    pub fn sink(&self) -> &Arc<dyn StatusSink> {
        &self.sink
    }

    /// Runs one download to its end and publishes the terminal event.
    #[instrument(skip(self, request), fields(url = %request.url))]
    pub async fn run(&self, request: &DownloadRequest) -> TransferOutcome {
        debug!(submitted_at = %request.submitted_at, "transfer started");

        let outcome = match self.transfer(&request.url).await {
            Ok(outcome) => outcome,
            Err(e) => TransferOutcome::Failed(e),
        };

        let event = match &outcome {
            TransferOutcome::Completed { path, bytes } => {
                info!(path = %path.display(), bytes, "download complete");
                StatusEvent::Completed {
                    name: display_name(path),
                    bytes: *bytes,
                }
            }
            TransferOutcome::Canceled { path, bytes } => {
                info!(path = %path.display(), bytes, "download canceled");
                StatusEvent::Canceled {
                    name: display_name(path),
                    bytes: *bytes,
                }
            }
            TransferOutcome::Failed(e) => {
                warn!(error = %e, protocol = e.is_protocol(), "download failed");
                StatusEvent::Failed {
                    url: request.url.clone(),
                    reason: e.to_string(),
                }
            }
        };
        self.sink.publish(&event);

        outcome
    }

    async fn transfer(&self, url: &str) -> Result<TransferOutcome, TransferError> {
        let proposed = sanitize_filename(&filename_from_url(url)?);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(TransferError::network)?;

        if response.status() != StatusCode::OK {
            return Err(TransferError::HttpStatus {
                status: response.status().as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        if !content_type.is_some_and(|ct| ct.starts_with("image")) {
            debug!(?content_type, "response is not an image");
            return Err(TransferError::NotAnImage {
                url: url.to_string(),
            });
        }

        let total_bytes = response.content_length();
        let name = unique_filename(&self.download_dir, &proposed);
        let path = self.download_dir.join(&name);
        debug!(path = %path.display(), total_bytes, "resolved destination");

        let mut file = File::create(&path)
            .await
            .map_err(|e| TransferError::io(&path, e))?;

        let body = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        let mut reader = StreamReader::new(Box::pin(body));

        let copied = self
            .copy_chunks(&mut reader, &mut file, &name, &path, total_bytes)
            .await;
        // flush whatever was written, even when the copy stopped early
        let flushed = file.flush().await.map_err(|e| TransferError::io(&path, e));
        let outcome = copied?;
        flushed?;
        Ok(outcome)
    }

    async fn copy_chunks<R>(
        &self,
        reader: &mut R,
        file: &mut File,
        name: &str,
        path: &Path,
        total_bytes: Option<u64>,
    ) -> Result<TransferOutcome, TransferError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buffer = vec![0u8; self.chunk_size];
        let mut bytes_read: u64 = 0;

        loop {
            let n = reader
                .read(&mut buffer)
                .await
                .map_err(|source| TransferError::Read { source })?;
            if n == 0 {
                break;
            }

            if self.signals.is_cancelled() {
                return Ok(TransferOutcome::Canceled {
                    path: path.to_path_buf(),
                    bytes: bytes_read,
                });
            }
            if self.signals.is_paused() {
                self.wait_while_paused(name).await;
                if self.signals.is_cancelled() {
                    return Ok(TransferOutcome::Canceled {
                        path: path.to_path_buf(),
                        bytes: bytes_read,
                    });
                }
            }

            file.write_all(&buffer[..n])
                .await
                .map_err(|e| TransferError::io(path, e))?;
            bytes_read += n as u64;

            self.sink.publish(&StatusEvent::Progress {
                name: name.to_string(),
                progress: Progress::compute(bytes_read, total_bytes),
            });
        }

        Ok(TransferOutcome::Completed {
            path: path.to_path_buf(),
            bytes: bytes_read,
        })
    }

    async fn wait_while_paused(&self, name: &str) {
        debug!(name, "transfer paused");
        self.sink.publish(&StatusEvent::Paused {
            name: name.to_string(),
        });
        while self.signals.is_paused() {
            tokio::time::sleep(self.pause_poll).await;
        }
        debug!(name, "transfer resumed");
        self.sink.publish(&StatusEvent::Resumed {
            name: name.to_string(),
        });
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusBoard;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        ctx: TransferContext,
        signals: Arc<ControlSignals>,
        board: Arc<StatusBoard>,
        dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::with_download_dir(dir.path());
        settings.pause_poll = Duration::from_millis(20);
        let signals = Arc::new(ControlSignals::new());
        let board = Arc::new(StatusBoard::new());
        let ctx = TransferContext::new(
            settings.build_client().unwrap(),
            &settings,
            Arc::clone(&signals),
            board.clone(),
        );
        Harness {
            ctx,
            signals,
            board,
            dir,
        }
    }

    fn image_body(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn writes_full_body_for_image() {
        let server = MockServer::start().await;
        let body = image_body(10_000);
        Mock::given(method("GET"))
            .and(path("/img/photo.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/jpeg")
                    .set_body_bytes(body.clone()),
            )
            .mount(&server)
            .await;

        let h = harness();
        let url = format!("{}/img/photo.jpg", server.uri());
        let outcome = h.ctx.run(&DownloadRequest::new(url)).await;

        let TransferOutcome::Completed { path, bytes } = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(bytes, 10_000);
        assert_eq!(path, h.dir.path().join("photo.jpg"));
        assert_eq!(std::fs::read(&path).unwrap(), body);

        let lines = h.board.lines();
        assert_eq!(
            lines,
            vec!["Downloading photo.jpg: 100%", "Download completed: photo.jpg"]
        );
    }

    #[tokio::test]
    async fn second_download_of_same_name_gets_suffix() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/photo.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/jpeg")
                    .set_body_bytes(image_body(100)),
            )
            .mount(&server)
            .await;

        let h = harness();
        let url = format!("{}/photo.jpg", server.uri());
        for expected in ["photo.jpg", "photo_1.jpg", "photo_2.jpg"] {
            match h.ctx.run(&DownloadRequest::new(url.clone())).await {
                TransferOutcome::Completed { path, .. } => {
                    assert_eq!(path.file_name().unwrap(), expected);
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn html_response_is_rejected_without_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html></html>"),
            )
            .mount(&server)
            .await;

        let h = harness();
        let url = format!("{}/page.jpg", server.uri());
        let outcome = h.ctx.run(&DownloadRequest::new(url.clone())).await;

        assert!(matches!(
            outcome,
            TransferOutcome::Failed(TransferError::NotAnImage { .. })
        ));
        assert_eq!(std::fs::read_dir(h.dir.path()).unwrap().count(), 0);
        assert!(h
            .board
            .contains(&format!("URL does not point to an image: {}", url)));
    }

    #[tokio::test]
    async fn non_200_status_is_rejected_without_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let h = harness();
        let url = format!("{}/missing.png", server.uri());
        let outcome = h.ctx.run(&DownloadRequest::new(url)).await;

        assert!(matches!(
            outcome,
            TransferOutcome::Failed(TransferError::HttpStatus { status: 404, .. })
        ));
        assert_eq!(std::fs::read_dir(h.dir.path()).unwrap().count(), 0);
        assert!(h.board.contains("HTTP error code: 404"));
    }

    #[tokio::test]
    async fn connection_failure_is_reported() {
        let h = harness();
        // port 9 (discard) is not expected to accept HTTP connections
        let outcome = h
            .ctx
            .run(&DownloadRequest::new("http://127.0.0.1:9/a.png"))
            .await;

        assert!(matches!(
            outcome,
            TransferOutcome::Failed(TransferError::Network { .. })
        ));
        assert!(h.board.contains("Error downloading image"));
    }

    #[tokio::test]
    async fn paused_transfer_writes_nothing_until_resumed() {
        let server = MockServer::start().await;
        let body = image_body(20_000);
        Mock::given(method("GET"))
            .and(path("/big.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(body.clone()),
            )
            .mount(&server)
            .await;

        let h = harness();
        h.signals.set_paused(true);

        let ctx = h.ctx.clone();
        let url = format!("{}/big.png", server.uri());
        let task = tokio::spawn(async move { ctx.run(&DownloadRequest::new(url)).await });

        let dest = h.dir.path().join("big.png");
        for _ in 0..100 {
            if h.board.contains("Downloads paused: big.png") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(h.board.contains("Downloads paused: big.png"));

        let before = std::fs::metadata(&dest).unwrap().len();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), before);
        assert_eq!(before, 0);

        h.signals.set_paused(false);
        let outcome = task.await.unwrap();

        assert!(matches!(
            outcome,
            TransferOutcome::Completed { bytes: 20_000, .. }
        ));
        assert_eq!(std::fs::read(&dest).unwrap(), body);
        assert!(h.board.contains("Downloads resumed: big.png"));
    }

    #[tokio::test]
    async fn pause_mid_stream_resumes_at_same_offset() {
        let h = harness();
        let body = image_body(200_000);
        let (mut writer, mut reader) = tokio::io::duplex(4096);

        // about 1000 bytes every 5 ms
        let source = body.clone();
        let feeder = tokio::spawn(async move {
            for chunk in source.chunks(1000) {
                writer.write_all(chunk).await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let ctx = h.ctx.clone();
        let dest = h.dir.path().join("slow.png");
        let task_dest = dest.clone();
        let task = tokio::spawn(async move {
            let mut file = File::create(&task_dest).await.unwrap();
            let outcome = ctx
                .copy_chunks(&mut reader, &mut file, "slow.png", &task_dest, Some(200_000))
                .await;
            file.flush().await.unwrap();
            outcome
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        h.signals.set_paused(true);
        for _ in 0..100 {
            if h.board.contains("Downloads paused: slow.png") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(h.board.contains("Downloads paused: slow.png"));

        // let the last write before the pause land
        tokio::time::sleep(Duration::from_millis(30)).await;
        let paused_at = std::fs::metadata(&dest).unwrap().len();
        assert!(paused_at > 0);
        assert!(paused_at < 200_000);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), paused_at);

        h.signals.set_paused(false);
        let outcome = task.await.unwrap().unwrap();
        feeder.await.unwrap();

        assert!(matches!(
            outcome,
            TransferOutcome::Completed { bytes: 200_000, .. }
        ));
        assert_eq!(std::fs::read(&dest).unwrap(), body);
        assert!(h.board.contains("Downloads resumed: slow.png"));
    }

    #[tokio::test]
    async fn cancel_observed_after_pause_leaves_partial_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(image_body(50_000)),
            )
            .mount(&server)
            .await;

        let h = harness();
        h.signals.set_paused(true);

        let ctx = h.ctx.clone();
        let url = format!("{}/big.png", server.uri());
        let task = tokio::spawn(async move { ctx.run(&DownloadRequest::new(url)).await });

        for _ in 0..100 {
            if h.board.contains("Downloads paused: big.png") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // hold the cancel flag long enough for the woken transfer to see it
        h.signals.set_cancelled(true);
        h.signals.set_paused(false);
        let outcome = task.await.unwrap();
        h.signals.set_cancelled(false);

        let TransferOutcome::Canceled { path, bytes } = outcome else {
            panic!("expected cancellation, got {outcome:?}");
        };
        assert!(bytes < 50_000);
        assert!(path.exists(), "partial file is left in place");
        assert!(h.board.contains("Downloads canceled: big.png"));
    }

    #[tokio::test]
    async fn missing_content_length_reports_indeterminate_progress() {
        let h = harness();
        let body = image_body(5_000);
        let mut reader = std::io::Cursor::new(body.clone());
        let path = h.dir.path().join("stream.png");
        let mut file = File::create(&path).await.unwrap();

        let outcome = h
            .ctx
            .copy_chunks(&mut reader, &mut file, "stream.png", &path, None)
            .await
            .unwrap();
        file.flush().await.unwrap();

        assert!(matches!(
            outcome,
            TransferOutcome::Completed { bytes: 5_000, .. }
        ));
        assert_eq!(h.board.lines(), vec!["Downloading stream.png: 4.88 KiB"]);
    }
}
