//! Workspace export in the layout of Slack's own export archive.
//!
//! ```text
//! <dir>/users.json
//! <dir>/channels.json
//! <dir>/channels_full.json.bak
//! <dir>/<channel>/<YYYY-MM-DD>.json
//! <dir>/<channel>/attachments/<file id>-<name>
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::client::{Client, SlackApi};
use crate::downloader::{DownloadOutcome, DownloadTicket, Downloader, Enqueued};
use crate::naming::{by_date, filter_official, valid_name};
use crate::output::{
    ATTACHMENTS_DIR, CHANNELS_BACKUP_FILE, CHANNELS_FILE, USERS_FILE, create_dir, save_channel,
    write_json,
};
use crate::settings::ExportSettings;
use crate::types::{Channel, ChannelType, Message, TimeWindow, User, UserIndex, extract_files};
use crate::{AppError, Result};

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub window: TimeWindow,
    pub include_files: bool,
    pub include_threads: bool,
    /// Write `channels.json` without the records the official importer
    /// rejects, keeping the full list in `channels_full.json.bak`.
    pub official_compat: bool,
    /// Skip channels whose history cannot be fetched instead of aborting.
    pub continue_on_channel_error: bool,
    pub download_workers: usize,
    pub download_queue: usize,
}

impl ExportOptions {
    pub fn from_settings(settings: &ExportSettings, window: TimeWindow) -> Self {
        Self {
            window,
            include_files: settings.include_files,
            include_threads: settings.include_threads,
            official_compat: settings.official_compat,
            continue_on_channel_error: settings.continue_on_channel_error,
            download_workers: settings.download_workers,
            download_queue: settings.download_queue,
        }
    }
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self::from_settings(&ExportSettings::default(), TimeWindow::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub users: usize,
    pub channels: usize,
    pub channels_written: usize,
    pub channels_filtered: usize,
    pub messages: usize,
    pub files_queued: usize,
    pub files_downloaded: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    /// Channels that could not be named.
    pub skipped_channels: Vec<String>,
    /// Channels whose history fetch failed (only with
    /// `continue_on_channel_error`).
    pub failed_channels: Vec<String>,
}

/// Drives one export run.
pub struct Exporter<A> {
    dir: PathBuf,
    client: Arc<Client<A>>,
    downloader: Downloader<A>,
    options: ExportOptions,
}

impl<A: SlackApi + 'static> Exporter<A> {
    pub fn new(dir: impl Into<PathBuf>, client: Arc<Client<A>>, options: ExportOptions) -> Self {
        let downloader = Downloader::new(
            client.clone(),
            options.download_workers,
            options.download_queue,
        );
        Self {
            dir: dir.into(),
            client,
            downloader,
            options,
        }
    }

    pub async fn run(&self) -> Result<ExportSummary> {
        let mut summary = ExportSummary::default();

        let users = self.export_users().await?;
        let index = UserIndex::from(users.as_slice());
        summary.users = index.len();
        if index.is_empty() {
            warn!("no users returned, direct messages will be named by user ID");
        }

        if self.options.include_files {
            self.downloader.start();
        }

        let mut tickets = Vec::new();
        let result = self.messages(&index, &mut summary, &mut tickets).await;

        // Files already queued are written (or failed) before we report back,
        // whatever happened to the channels.
        self.downloader.stop().await;
        collect_downloads(tickets, &mut summary).await;

        result?;
        info!(
            users = summary.users,
            channels = summary.channels_written,
            messages = summary.messages,
            files = summary.files_downloaded,
            "export finished"
        );
        Ok(summary)
    }

    /// Fetches all users and writes `users.json`.
    pub async fn export_users(&self) -> Result<Vec<User>> {
        create_dir(&self.dir)?;
        let users = self
            .client
            .users()
            .await
            .map_err(|e| e.in_call("fetching users"))?;
        write_json(&self.dir.join(USERS_FILE), &users)?;
        info!(count = users.len(), "users exported");
        Ok(users)
    }

    async fn messages(
        &self,
        index: &UserIndex,
        summary: &mut ExportSummary,
        tickets: &mut Vec<DownloadTicket>,
    ) -> Result<()> {
        let mut chans: Vec<Channel> = Vec::new();
        let mut pager = self.client.channels(&ChannelType::ALL);

        while let Some(page) = pager.next_page().await.map_err(|e| e.in_call("channels"))? {
            for ch in page {
                match self.export_conversation(&ch, index, summary, tickets).await {
                    Ok(()) => {}
                    Err(err @ AppError::Channel { .. })
                        if self.options.continue_on_channel_error
                            && !self.client.cancel_token().is_cancelled() =>
                    {
                        warn!(channel_id = %ch.id, channel = ch.label(), error = %err, "skipping channel");
                        summary.failed_channels.push(ch.id.clone());
                    }
                    Err(err) => return Err(err),
                }
                chans.push(ch);
            }
        }

        summary.channels = chans.len();
        if self.options.official_compat {
            write_json(&self.dir.join(CHANNELS_BACKUP_FILE), &chans)?;
            let filtered = filter_official(&chans);
            summary.channels_filtered = chans.len() - filtered.len();
            write_json(&self.dir.join(CHANNELS_FILE), &filtered)?;
        } else {
            write_json(&self.dir.join(CHANNELS_FILE), &chans)?;
        }
        Ok(())
    }

    async fn export_conversation(
        &self,
        ch: &Channel,
        index: &UserIndex,
        summary: &mut ExportSummary,
        tickets: &mut Vec<DownloadTicket>,
    ) -> Result<()> {
        let name = match valid_name(ch, index) {
            Ok(name) => name,
            Err(err @ AppError::UnknownEntity { .. }) => {
                warn!(
                    channel_id = %ch.id,
                    record = %serde_json::to_string(ch).unwrap_or_default(),
                    "{err}, skipping"
                );
                summary.skipped_channels.push(ch.id.clone());
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let basedir = self.dir.join(&name);
        let messages = self
            .fetch_messages(ch, &basedir.join(ATTACHMENTS_DIR), summary, tickets)
            .await
            .map_err(|e| AppError::Channel {
                channel_id: ch.id.clone(),
                channel: name.clone(),
                source: Box::new(e),
            })?;
        if messages.is_empty() {
            debug!(channel = %name, "no messages in window");
            return Ok(());
        }

        let count = save_channel(&basedir, &by_date(messages)?)?;
        summary.channels_written += 1;
        summary.messages += count;
        info!(channel = %name, channel_id = %ch.id, messages = count, "channel exported");
        Ok(())
    }

    async fn fetch_messages(
        &self,
        ch: &Channel,
        attachments: &Path,
        summary: &mut ExportSummary,
        tickets: &mut Vec<DownloadTicket>,
    ) -> Result<Vec<Message>> {
        let window = &self.options.window;
        let mut all = Vec::new();
        // broadcast replies show up both in the history and in their thread
        let mut seen: HashSet<String> = HashSet::new();
        let mut pager = self.client.history(&ch.id, window);

        while let Some(page) = pager.next_page().await? {
            let mut batch = Vec::with_capacity(page.len());
            for msg in page {
                if !seen.insert(msg.ts.clone()) {
                    continue;
                }
                let replies = if self.options.include_threads && msg.is_thread_parent() {
                    self.client.thread_replies(&ch.id, &msg.ts, window).await?
                } else {
                    Vec::new()
                };
                batch.push(msg);
                batch.extend(replies.into_iter().filter(|r| seen.insert(r.ts.clone())));
            }
            self.queue_files(&batch, &ch.id, attachments, summary, tickets)
                .await?;
            all.extend(batch);
            debug!(channel_id = %ch.id, count = all.len(), "fetched history page");
        }
        Ok(all)
    }

    /// Hands the files of `messages` to the downloader. A stopped downloader
    /// means file export is off and counts as nothing queued.
    async fn queue_files(
        &self,
        messages: &[Message],
        channel_id: &str,
        dir: &Path,
        summary: &mut ExportSummary,
        tickets: &mut Vec<DownloadTicket>,
    ) -> Result<usize> {
        if !self.downloader.is_running() {
            return Ok(0);
        }
        let mut queued = 0;
        for file in extract_files(messages, channel_id) {
            match self.downloader.download_file(dir, file).await? {
                Enqueued::Queued(ticket) => {
                    debug!(file = ticket.file(), "sent");
                    tickets.push(ticket);
                    queued += 1;
                }
                Enqueued::Duplicate => debug!(channel_id, "attachment already queued"),
                Enqueued::NotStarted => return Ok(0),
            }
        }
        summary.files_queued += queued;
        Ok(queued)
    }
}

async fn collect_downloads(tickets: Vec<DownloadTicket>, summary: &mut ExportSummary) {
    for ticket in tickets {
        match ticket.outcome().await {
            Ok(DownloadOutcome::Downloaded { .. }) => summary.files_downloaded += 1,
            Ok(DownloadOutcome::Skipped { .. }) => summary.files_skipped += 1,
            Err(e) => {
                warn!(error = %e, "attachment not exported");
                summary.files_failed += 1;
            }
        }
    }
}

/// Streams the full channel list into `path` without exporting history.
pub async fn export_channel_list<A: SlackApi>(client: &Client<A>, path: &Path) -> Result<usize> {
    let mut chans = Vec::new();
    let mut pager = client.channels(&ChannelType::ALL);
    while let Some(page) = pager.next_page().await.map_err(|e| e.in_call("channels"))? {
        chans.extend(page);
    }
    write_json(path, &chans)?;
    Ok(chans.len())
}
