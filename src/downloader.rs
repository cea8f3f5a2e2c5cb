//! Concurrent attachment downloads.
//!
//! The [`Downloader`] is a pool of worker tasks fed through a bounded queue.
//! It starts stopped; while stopped, [`Downloader::download_file`] answers
//! [`Enqueued::NotStarted`] so callers can treat "files disabled" like "no
//! files". [`Downloader::stop`] closes the queue and waits for the workers to
//! drain it.
//!
//! Within one start/stop session every destination path is queued at most
//! once; a second reference to the same file answers [`Enqueued::Duplicate`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::client::{Client, SlackApi};
use crate::types::AttachmentRef;
use crate::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded { path: PathBuf, bytes: u64 },
    /// The destination already existed with a non-zero size.
    Skipped { path: PathBuf },
}

/// Result of handing a file to the downloader.
#[derive(Debug)]
pub enum Enqueued {
    Queued(DownloadTicket),
    /// The same destination was already queued in this session.
    Duplicate,
    NotStarted,
}

/// Resolves to the outcome of one queued download.
#[derive(Debug)]
pub struct DownloadTicket {
    file: String,
    rx: oneshot::Receiver<Result<DownloadOutcome>>,
}

impl DownloadTicket {
    pub fn file(&self) -> &str {
        &self.file
    }

    pub async fn outcome(self) -> Result<DownloadOutcome> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(AppError::Download {
                file: self.file,
                source: Box::new(AppError::Cancelled),
            }),
        }
    }
}

struct Job {
    path: PathBuf,
    file: AttachmentRef,
    reply: oneshot::Sender<Result<DownloadOutcome>>,
}

struct Running {
    tx: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    queued: HashSet<PathBuf>,
}

pub struct Downloader<A> {
    client: Arc<Client<A>>,
    workers: usize,
    queue: usize,
    state: Mutex<Option<Running>>,
}

impl<A: SlackApi + 'static> Downloader<A> {
    pub fn new(client: Arc<Client<A>>, workers: usize, queue: usize) -> Self {
        Self {
            client,
            workers: workers.max(1),
            queue: queue.max(1),
            state: Mutex::new(None),
        }
    }

    fn state(&self) -> MutexGuard<'_, Option<Running>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.state().is_some()
    }

    /// Spawns the worker pool. Calling it on a running downloader does nothing.
    pub fn start(&self) {
        let mut state = self.state();
        if state.is_some() {
            return;
        }

        let (tx, rx) = mpsc::channel::<Job>(self.queue);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let workers = (0..self.workers)
            .map(|id| {
                let rx = rx.clone();
                let client = self.client.clone();
                tokio::spawn(worker(id, client, rx))
            })
            .collect();

        info!(workers = self.workers, "downloader started");
        *state = Some(Running {
            tx,
            workers,
            queued: HashSet::new(),
        });
    }

    /// Queues `file` for download into `dir`.
    ///
    /// Waits while the queue is full. The per-file result is delivered through
    /// the returned ticket; only cancellation fails the call itself.
    pub async fn download_file(&self, dir: &Path, file: AttachmentRef) -> Result<Enqueued> {
        let path = dir.join(filename(&file));
        let tx = match &mut *self.state() {
            Some(running) => {
                if !running.queued.insert(path.clone()) {
                    return Ok(Enqueued::Duplicate);
                }
                running.tx.clone()
            }
            None => return Ok(Enqueued::NotStarted),
        };

        let (reply, rx) = oneshot::channel();
        let label = file.name.clone();
        let job = Job { path, file, reply };

        let cancel = self.client.cancel_token();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            sent = tx.send(job) => sent.map_err(|_| AppError::Cancelled)?,
        }

        Ok(Enqueued::Queued(DownloadTicket { file: label, rx }))
    }

    /// Closes the queue and blocks until every queued file has been handled.
    pub async fn stop(&self) {
        let Some(running) = self.state().take() else {
            return;
        };
        drop(running.tx);
        for handle in running.workers {
            if let Err(e) = handle.await {
                error!(error = %e, "download worker failed");
            }
        }
        info!("downloader stopped");
    }
}

async fn worker<A: SlackApi>(
    id: usize,
    client: Arc<Client<A>>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
) {
    loop {
        let job = rx.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };

        let result = if client.cancel_token().is_cancelled() {
            Err(AppError::Cancelled)
        } else {
            save(&client, &job.path, &job.file).await
        };
        let result = result.map_err(|e| AppError::Download {
            file: job.file.name.clone(),
            source: Box::new(e),
        });

        match &result {
            Ok(DownloadOutcome::Downloaded { path, bytes }) => {
                debug!(worker = id, path = %path.display(), bytes, "downloaded")
            }
            Ok(DownloadOutcome::Skipped { path }) => {
                debug!(worker = id, path = %path.display(), "already present, skipped")
            }
            Err(e) => warn!(worker = id, file_id = %job.file.file_id, error = %e, "download failed"),
        }
        // The caller may have stopped waiting for the ticket.
        let _ = job.reply.send(result);
    }
    debug!(worker = id, "download worker exiting");
}

/// Name of the file on disk: `<file id>-<name>`, falling back to the last URL
/// path segment when the API gave no name.
pub fn filename(file: &AttachmentRef) -> String {
    let name = if file.name.is_empty() {
        Url::parse(&file.url)
            .ok()
            .and_then(|u| u.path_segments().and_then(|mut s| s.next_back()).map(str::to_string))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "file".to_string())
    } else {
        file.name.clone()
    };
    format!("{}-{}", sanitize(&file.file_id), sanitize(&name))
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect()
}

async fn save<A: SlackApi>(
    client: &Client<A>,
    path: &Path,
    file: &AttachmentRef,
) -> Result<DownloadOutcome> {
    Url::parse(&file.url).map_err(|e| AppError::SlackApi(format!("invalid file URL {:?}: {e}", file.url)))?;

    let path = path.to_path_buf();
    if let Ok(meta) = tokio::fs::metadata(&path).await
        && meta.is_file()
        && meta.len() > 0
    {
        return Ok(DownloadOutcome::Skipped { path });
    }

    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| AppError::CreateDir {
                path: dir.display().to_string(),
                source: e,
            })?;
    }

    let mut partial = path.clone().into_os_string();
    partial.push(".part");
    let partial = PathBuf::from(partial);
    let bytes = match client.get_file(&file.url, &partial).await {
        Ok(n) => n,
        Err(e) => {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
    };
    tokio::fs::rename(&partial, &path)
        .await
        .map_err(|e| AppError::WriteFile {
            path: path.display().to_string(),
            source: e,
        })?;

    Ok(DownloadOutcome::Downloaded { path, bytes })
}
