use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use signal_hook::SigId;
use tracing::{debug, warn};

use crate::config::ensure_parent;
use crate::error::LauncherError;
use crate::http::HttpFetch;

const CHUNK_SIZE: usize = 64 * 1024;
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Progress { percent: u8, message: String },
    Finished { success: bool, message: String },
    Error(String),
}

#[cfg(test)]
impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// Cooperative cancellation flag shared between a caller and an install worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), LauncherError> {
        if self.is_cancelled() {
            Err(LauncherError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Routes SIGINT and SIGTERM into this token until the guard is dropped.
    ///
    /// The first signal cancels. A second one while the token is already
    /// cancelled exits with status 130, and so does any signal after the
    /// guard is gone, since the handlers cannot be fully removed.
    pub fn cancel_on_interrupt(&self) -> std::io::Result<InterruptGuard> {
        let finished = Arc::new(AtomicBool::new(false));
        let mut cancel_ids = Vec::new();
        for signal in [SIGINT, SIGTERM] {
            // Shutdown checks run before the flag below is raised.
            flag::register_conditional_shutdown(signal, 130, Arc::clone(&self.0))?;
            flag::register_conditional_shutdown(signal, 130, Arc::clone(&finished))?;
            cancel_ids.push(flag::register(signal, Arc::clone(&self.0))?);
        }
        Ok(InterruptGuard {
            cancel_ids,
            finished,
        })
    }
}

#[derive(Debug)]
pub struct InterruptGuard {
    cancel_ids: Vec<SigId>,
    finished: Arc<AtomicBool>,
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        for id in self.cancel_ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }
        self.finished.store(true, Ordering::SeqCst);
    }
}

/// Sending half of an attempt's progress stream.
///
/// Percentages never go backwards, and the terminal methods consume the sink
/// so an attempt can report at most one outcome.
#[derive(Debug)]
pub struct ProgressSink {
    tx: Sender<ProgressEvent>,
    last_percent: u8,
}

pub fn progress_channel() -> (ProgressSink, Receiver<ProgressEvent>) {
    let (tx, rx) = mpsc::channel();
    (
        ProgressSink {
            tx,
            last_percent: 0,
        },
        rx,
    )
}

impl ProgressSink {
    pub fn progress(&mut self, percent: u8, message: impl Into<String>) {
        let percent = percent.min(100).max(self.last_percent);
        self.last_percent = percent;
        // A dropped receiver only means nobody is watching.
        let _ = self.tx.send(ProgressEvent::Progress {
            percent,
            message: message.into(),
        });
    }

    pub fn finish(self, success: bool, message: impl Into<String>) {
        let _ = self.tx.send(ProgressEvent::Finished {
            success,
            message: message.into(),
        });
    }

    pub fn error(self, message: impl Into<String>) {
        let _ = self.tx.send(ProgressEvent::Error(message.into()));
    }
}

/// Maps transferred bytes onto `[start, end]` of the overall attempt.
#[derive(Debug, Clone, Copy)]
pub struct PercentSpan {
    pub start: u8,
    pub end: u8,
}

impl PercentSpan {
    fn at(&self, done: u64, total: Option<u64>) -> u8 {
        match total {
            Some(total) if total > 0 => {
                let width = u64::from(self.end.saturating_sub(self.start));
                let scaled = done.min(total) * width / total;
                self.start.saturating_add(u8::try_from(scaled).unwrap_or(u8::MAX)).min(self.end)
            }
            _ => self.start,
        }
    }
}

/// Streams `url` into `dest`, reporting throttled progress.
///
/// Any failure, including cancellation, removes `dest` before returning.
pub fn download_to(
    http: &dyn HttpFetch,
    url: &str,
    dest: &Path,
    cancel: &CancelToken,
    sink: &mut ProgressSink,
    span: PercentSpan,
) -> Result<u64, LauncherError> {
    let result = stream_to_file(http, url, dest, cancel, sink, span);
    if let Err(err) = &result {
        match fs::remove_file(dest) {
            Ok(()) => debug!(path = %dest.display(), "removed partial download"),
            Err(remove_err) if remove_err.kind() == std::io::ErrorKind::NotFound => {}
            Err(remove_err) => warn!(
                "failed to remove partial download {}: {remove_err}",
                dest.display()
            ),
        }
        debug!("download of {url} stopped: {err}");
    }
    result
}

fn stream_to_file(
    http: &dyn HttpFetch,
    url: &str,
    dest: &Path,
    cancel: &CancelToken,
    sink: &mut ProgressSink,
    span: PercentSpan,
) -> Result<u64, LauncherError> {
    cancel.check()?;
    let mut body = http.open_stream(url)?;
    ensure_parent(dest)?;
    let mut file = File::create(dest)?;
    let total = body.content_length;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut downloaded: u64 = 0;
    let mut last_emit = Instant::now();
    let mut last_percent = span.start;
    sink.progress(span.start, "Downloading");

    loop {
        let read = body
            .reader
            .read(&mut buf)
            .map_err(|err| LauncherError::Network(format!("{url}: {err}")))?;
        if read == 0 {
            break;
        }
        cancel.check()?;
        file.write_all(&buf[..read])?;
        downloaded += read as u64;

        let percent = span.at(downloaded, total);
        if percent > last_percent || last_emit.elapsed() >= PROGRESS_INTERVAL {
            sink.progress(percent, transfer_message(downloaded, total));
            last_percent = percent;
            last_emit = Instant::now();
        }
    }
    file.flush()?;
    file.sync_all()?;

    if let Some(expected) = total {
        if downloaded != expected {
            return Err(LauncherError::Network(format!(
                "{url}: transfer ended after {downloaded} of {expected} bytes"
            )));
        }
    }
    sink.progress(span.end, transfer_message(downloaded, total));
    Ok(downloaded)
}

fn transfer_message(done: u64, total: Option<u64>) -> String {
    let mb = |bytes: u64| bytes as f64 / (1024_f64 * 1024_f64);
    match total {
        Some(total) if total > 0 => {
            format!("Downloading {:.1} MB / {:.1} MB", mb(done), mb(total))
        }
        _ => format!("Downloading {:.1} MB", mb(done)),
    }
}
