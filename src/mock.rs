//! In-memory [`SlackApi`] used by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::client::SlackApi;
use crate::types::{
    Channel, ChannelType, ChannelsPage, Message, MessagesPage, TeamInfo, TimeWindow, User,
    UsersPage,
};
use crate::{AppError, Result};

pub struct MockApi {
    users: Vec<User>,
    channels: Vec<Channel>,
    history: HashMap<String, Vec<Message>>,
    replies: HashMap<(String, String), Vec<Message>>,
    files: HashMap<String, Vec<u8>>,
    failing_history: HashSet<String>,
    /// Calls left to answer with a rate limit, per channel.
    rate_limited_history: Mutex<HashMap<String, usize>>,
    /// Transfers left to break off halfway, per URL.
    broken_transfers: Mutex<HashMap<String, usize>>,
    page_size: usize,
    file_calls: AtomicUsize,
    fetched: Mutex<Vec<String>>,
}

impl MockApi {
    pub fn new() -> Self {
        Self {
            users: Vec::new(),
            channels: Vec::new(),
            history: HashMap::new(),
            replies: HashMap::new(),
            files: HashMap::new(),
            failing_history: HashSet::new(),
            rate_limited_history: Mutex::new(HashMap::new()),
            broken_transfers: Mutex::new(HashMap::new()),
            page_size: 2,
            file_calls: AtomicUsize::new(0),
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn with_users(mut self, users: Vec<User>) -> Self {
        self.users = users;
        self
    }

    pub fn with_channels(mut self, channels: Vec<Channel>) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_history(mut self, channel_id: &str, messages: Vec<Message>) -> Self {
        self.history.insert(channel_id.to_string(), messages);
        self
    }

    pub fn with_replies(mut self, channel_id: &str, thread_ts: &str, messages: Vec<Message>) -> Self {
        self.replies
            .insert((channel_id.to_string(), thread_ts.to_string()), messages);
        self
    }

    pub fn with_file(mut self, url: &str, body: Vec<u8>) -> Self {
        self.files.insert(url.to_string(), body);
        self
    }

    pub fn with_failing_history(mut self, channel_id: &str) -> Self {
        self.failing_history.insert(channel_id.to_string());
        self
    }

    /// The next `times` history calls for `channel_id` are throttled.
    pub fn with_rate_limited_history(self, channel_id: &str, times: usize) -> Self {
        if let Ok(mut left) = self.rate_limited_history.lock() {
            left.insert(channel_id.to_string(), times);
        }
        self
    }

    /// The next `times` transfers of `url` write half the body and then fail.
    pub fn with_broken_transfers(self, url: &str, times: usize) -> Self {
        if let Ok(mut left) = self.broken_transfers.lock() {
            left.insert(url.to_string(), times);
        }
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Number of `get_file` calls made so far.
    pub fn file_calls(&self) -> usize {
        self.file_calls.load(Ordering::SeqCst)
    }

    /// URLs successfully served, in order.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().map(|f| f.clone()).unwrap_or_default()
    }

    fn take_one(counter: &Mutex<HashMap<String, usize>>, key: &str) -> bool {
        let Ok(mut left) = counter.lock() else {
            return false;
        };
        match left.get_mut(key) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    fn page<T: Clone>(&self, items: &[T], cursor: Option<&str>, limit: u16) -> (Vec<T>, Option<String>) {
        let start: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let size = self.page_size.min(limit.max(1) as usize);
        let end = (start + size).min(items.len());
        let page = items.get(start..end).map(|s| s.to_vec()).unwrap_or_default();
        let next = (end < items.len()).then(|| end.to_string());
        (page, next)
    }
}

fn in_window(ts: &str, window: &TimeWindow) -> bool {
    let ts: f64 = ts.parse().unwrap_or(0.0);
    let after_oldest = window
        .oldest
        .as_deref()
        .and_then(|o| o.parse::<f64>().ok())
        .is_none_or(|o| ts >= o);
    let before_latest = window
        .latest
        .as_deref()
        .and_then(|l| l.parse::<f64>().ok())
        .is_none_or(|l| ts < l);
    after_oldest && before_latest
}

#[async_trait]
impl SlackApi for MockApi {
    async fn team_info(&self) -> Result<TeamInfo> {
        Ok(TeamInfo {
            id: "T1".to_string(),
            name: "Test Workspace".to_string(),
            domain: "test".to_string(),
        })
    }

    async fn users_page(&self, cursor: Option<&str>, limit: u16) -> Result<UsersPage> {
        let (users, next_cursor) = self.page(&self.users, cursor, limit);
        Ok(UsersPage { users, next_cursor })
    }

    async fn conversations_page(
        &self,
        _types: &[ChannelType],
        cursor: Option<&str>,
        limit: u16,
    ) -> Result<ChannelsPage> {
        let (channels, next_cursor) = self.page(&self.channels, cursor, limit);
        Ok(ChannelsPage {
            channels,
            next_cursor,
        })
    }

    async fn history_page(
        &self,
        channel_id: &str,
        window: &TimeWindow,
        cursor: Option<&str>,
        limit: u16,
    ) -> Result<MessagesPage> {
        if self.failing_history.contains(channel_id) {
            return Err(AppError::SlackApi("channel_not_found".to_string()));
        }
        if Self::take_one(&self.rate_limited_history, channel_id) {
            return Err(AppError::SlackRateLimit { retry_after: None });
        }
        let messages: Vec<Message> = self
            .history
            .get(channel_id)
            .map(|m| m.iter().filter(|m| in_window(&m.ts, window)).cloned().collect())
            .unwrap_or_default();
        let (messages, next_cursor) = self.page(&messages, cursor, limit);
        Ok(MessagesPage {
            messages,
            has_more: next_cursor.is_some(),
            next_cursor,
        })
    }

    async fn replies_page(
        &self,
        channel_id: &str,
        thread_ts: &str,
        _window: &TimeWindow,
        cursor: Option<&str>,
        limit: u16,
    ) -> Result<MessagesPage> {
        let key = (channel_id.to_string(), thread_ts.to_string());
        let messages = self.replies.get(&key).cloned().unwrap_or_default();
        let (messages, next_cursor) = self.page(&messages, cursor, limit);
        Ok(MessagesPage {
            messages,
            has_more: next_cursor.is_some(),
            next_cursor,
        })
    }

    async fn get_file(&self, url: &str, writer: &mut (dyn AsyncWrite + Unpin + Send)) -> Result<()> {
        self.file_calls.fetch_add(1, Ordering::SeqCst);
        let body = self
            .files
            .get(url)
            .ok_or_else(|| AppError::SlackApi(format!("HTTP 404 Not Found for {url}")))?;
        if Self::take_one(&self.broken_transfers, url) {
            writer.write_all(body.get(..body.len() / 2).unwrap_or_default()).await?;
            return Err(AppError::Transient(format!("connection reset reading {url}")));
        }
        writer.write_all(body).await?;
        if let Ok(mut fetched) = self.fetched.lock() {
            fetched.push(url.to_string());
        }
        Ok(())
    }
}
