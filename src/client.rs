//! Rate-limited access to the Slack Web API.
//!
//! [`SlackApi`] is the raw transport; [`Client`] puts every call behind its
//! tier's limiter and the retry policy, and exposes cursor pagers over the
//! paginated listings.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::limiter::{Limits, Tier};
use crate::retry::with_retry;
use crate::settings::LimitSettings;
use crate::types::{
    Channel, ChannelType, ChannelsPage, Message, MessagesPage, TeamInfo, TimeWindow, User,
    UsersPage,
};
use crate::{AppError, Result};

/// The remote operations the exporter needs. Implementations report
/// throttling as [`AppError::SlackRateLimit`] and retryable server or network
/// failures as [`AppError::Transient`].
#[async_trait]
pub trait SlackApi: Send + Sync {
    async fn team_info(&self) -> Result<TeamInfo>;

    async fn users_page(&self, cursor: Option<&str>, limit: u16) -> Result<UsersPage>;

    async fn conversations_page(
        &self,
        types: &[ChannelType],
        cursor: Option<&str>,
        limit: u16,
    ) -> Result<ChannelsPage>;

    async fn history_page(
        &self,
        channel_id: &str,
        window: &TimeWindow,
        cursor: Option<&str>,
        limit: u16,
    ) -> Result<MessagesPage>;

    async fn replies_page(
        &self,
        channel_id: &str,
        thread_ts: &str,
        window: &TimeWindow,
        cursor: Option<&str>,
        limit: u16,
    ) -> Result<MessagesPage>;

    /// Streams the file at `url` into `writer`.
    async fn get_file(&self, url: &str, writer: &mut (dyn AsyncWrite + Unpin + Send)) -> Result<()>;
}

const USERS_PER_REQUEST: u16 = 200;

#[derive(Debug, Clone, Copy)]
struct PageSizes {
    channels: u16,
    messages: u16,
    replies: u16,
}

/// The rate-limited facade. Cheap to share behind an [`Arc`]; holds no state
/// besides the tier limiters.
pub struct Client<A> {
    api: Arc<A>,
    limits: Limits,
    pages: PageSizes,
    cancel: CancellationToken,
}

impl<A: SlackApi> Client<A> {
    pub fn new(api: Arc<A>, settings: &LimitSettings, cancel: CancellationToken) -> Self {
        Self {
            api,
            limits: Limits::new(settings),
            pages: PageSizes {
                channels: settings.channels_per_request,
                messages: settings.messages_per_request,
                replies: settings.replies_per_request,
            },
            cancel,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn team_info(&self) -> Result<TeamInfo> {
        let api = &*self.api;
        with_retry(&self.cancel, self.limits.get(Tier::Tier3), "team.info", || {
            api.team_info()
        })
        .await
    }

    /// Fetches every user of the workspace, following the cursor to the end.
    pub async fn users(&self) -> Result<Vec<User>> {
        let api = &*self.api;
        let limit = USERS_PER_REQUEST;
        let mut users = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let current = cursor.as_deref();
            let page = with_retry(&self.cancel, self.limits.get(Tier::Tier2), "users.list", || {
                api.users_page(current, limit)
            })
            .await?;
            users.extend(page.users);
            debug!(count = users.len(), "fetched users page");
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(users)
    }

    pub async fn channels_page(
        &self,
        types: &[ChannelType],
        cursor: Option<&str>,
    ) -> Result<ChannelsPage> {
        let api = &*self.api;
        let limit = self.pages.channels;
        with_retry(&self.cancel, self.limits.get(Tier::Tier2), "conversations.list", || {
            api.conversations_page(types, cursor, limit)
        })
        .await
    }

    pub async fn history_page(
        &self,
        channel_id: &str,
        window: &TimeWindow,
        cursor: Option<&str>,
    ) -> Result<MessagesPage> {
        let api = &*self.api;
        let limit = self.pages.messages;
        with_retry(
            &self.cancel,
            self.limits.get(Tier::Tier3),
            "conversations.history",
            || api.history_page(channel_id, window, cursor, limit),
        )
        .await
    }

    pub async fn replies_page(
        &self,
        channel_id: &str,
        thread_ts: &str,
        window: &TimeWindow,
        cursor: Option<&str>,
    ) -> Result<MessagesPage> {
        let api = &*self.api;
        let limit = self.pages.replies;
        with_retry(
            &self.cancel,
            self.limits.get(Tier::Tier3),
            "conversations.replies",
            || api.replies_page(channel_id, thread_ts, window, cursor, limit),
        )
        .await
    }

    /// Fetches all replies of a thread, the parent message excluded.
    pub async fn thread_replies(
        &self,
        channel_id: &str,
        thread_ts: &str,
        window: &TimeWindow,
    ) -> Result<Vec<Message>> {
        let mut replies = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .replies_page(channel_id, thread_ts, window, cursor.as_deref())
                .await?;
            replies.extend(page.messages.into_iter().filter(|m| m.ts != thread_ts));
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(replies)
    }

    /// Downloads `url` into the file at `path`, returning its size.
    ///
    /// Every attempt recreates the file and streams the body straight into it,
    /// so a retried transfer never keeps a prefix of the failed one.
    pub async fn get_file(&self, url: &str, path: &Path) -> Result<u64> {
        let api = &*self.api;
        let write_err = |e| AppError::WriteFile {
            path: path.display().to_string(),
            source: e,
        };
        with_retry(&self.cancel, self.limits.get(Tier::Tier4), "files.download", move || async move {
            let mut out = File::create(path).await.map_err(write_err)?;
            api.get_file(url, &mut out).await?;
            out.flush().await.map_err(write_err)?;
            let meta = out.metadata().await.map_err(write_err)?;
            Ok::<_, AppError>(meta.len())
        })
        .await
    }

    /// Lazily pages through the conversations of the given types.
    pub fn channels<'a>(&'a self, types: &'a [ChannelType]) -> ChannelPager<'a, A> {
        ChannelPager {
            client: self,
            types,
            cursor: None,
            done: false,
        }
    }

    /// Lazily pages through a channel's history inside `window`.
    pub fn history<'a>(&'a self, channel_id: &'a str, window: &'a TimeWindow) -> HistoryPager<'a, A> {
        HistoryPager {
            client: self,
            channel_id,
            window,
            cursor: None,
            done: false,
        }
    }
}

/// Produces one page of channels per call until the listing is exhausted.
pub struct ChannelPager<'a, A> {
    client: &'a Client<A>,
    types: &'a [ChannelType],
    cursor: Option<String>,
    done: bool,
}

impl<A: SlackApi> ChannelPager<'_, A> {
    pub async fn next_page(&mut self) -> Result<Option<Vec<Channel>>> {
        if self.done {
            return Ok(None);
        }
        let page = self
            .client
            .channels_page(self.types, self.cursor.as_deref())
            .await?;
        match page.next_cursor {
            Some(next) if !next.is_empty() => self.cursor = Some(next),
            _ => self.done = true,
        }
        Ok(Some(page.channels))
    }
}

/// Produces one page of a channel's history per call until the API reports
/// no more messages.
pub struct HistoryPager<'a, A> {
    client: &'a Client<A>,
    channel_id: &'a str,
    window: &'a TimeWindow,
    cursor: Option<String>,
    done: bool,
}

impl<A: SlackApi> HistoryPager<'_, A> {
    pub async fn next_page(&mut self) -> Result<Option<Vec<Message>>> {
        if self.done {
            return Ok(None);
        }
        let page = self
            .client
            .history_page(self.channel_id, self.window, self.cursor.as_deref())
            .await?;
        match page.next_cursor {
            Some(next) if page.has_more && !next.is_empty() => self.cursor = Some(next),
            _ => self.done = true,
        }
        Ok(Some(page.messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockApi;
    use crate::settings::TierSettings;

    fn client(api: MockApi) -> Client<MockApi> {
        let mut settings = LimitSettings::default();
        settings.channels_per_request = 2;
        for tier in [&mut settings.tier2, &mut settings.tier3, &mut settings.tier4] {
            *tier = TierSettings {
                boost: 6000,
                burst: 100,
                retries: 3,
            };
        }
        Client::new(Arc::new(api), &settings, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_team_info() {
        let team = client(MockApi::new()).team_info().await.unwrap();
        assert_eq!(team.id, "T1");
    }

    #[tokio::test]
    async fn test_users_follows_cursor() {
        let api = MockApi::new().with_users((0..5).map(|i| User::new(format!("U{i}"), format!("user{i}"))).collect());
        let client = client(api);

        let users = client.users().await.unwrap();

        assert_eq!(users.len(), 5);
        assert_eq!(users[4].name, "user4");
    }

    #[tokio::test]
    async fn test_channel_pager_yields_every_page() {
        let channels = (0..5).map(|i| Channel::named(format!("C{i}"), format!("chan{i}"))).collect();
        let client = client(MockApi::new().with_channels(channels));

        let mut pager = client.channels(&ChannelType::ALL);
        let mut sizes = Vec::new();
        while let Some(page) = pager.next_page().await.unwrap() {
            sizes.push(page.len());
        }

        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(pager.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_history_pager_stops_when_no_more() {
        let messages = (0..7)
            .map(|i| Message::new(format!("{}.000100", 1650000000 + i), "U1", "hi"))
            .collect();
        let api = MockApi::new()
            .with_channels(vec![Channel::named("C1", "general")])
            .with_history("C1", messages)
            .with_page_size(3);
        let client = client(api);
        let window = TimeWindow::default();

        let mut pager = client.history("C1", &window);
        let mut total = 0;
        let mut pages = 0;
        while let Some(page) = pager.next_page().await.unwrap() {
            total += page.len();
            pages += 1;
        }

        assert_eq!(total, 7);
        assert_eq!(pages, 3);
    }

    #[tokio::test]
    async fn test_thread_replies_exclude_parent() {
        let mut parent = Message::new("100.000001", "U1", "question");
        parent.thread_ts = Some(parent.ts.clone());
        parent.reply_count = Some(2);
        let mut r1 = Message::new("101.000001", "U2", "a1");
        r1.thread_ts = Some(parent.ts.clone());
        let mut r2 = Message::new("102.000001", "U1", "a2");
        r2.thread_ts = Some(parent.ts.clone());

        let api = MockApi::new().with_replies("C1", &parent.ts, vec![parent.clone(), r1, r2]);
        let client = client(api);

        let replies = client
            .thread_replies("C1", &parent.ts, &TimeWindow::default())
            .await
            .unwrap();

        assert_eq!(replies.len(), 2);
        assert!(replies.iter().all(|m| m.ts != parent.ts));
    }

    #[tokio::test]
    async fn test_get_file_writes_body() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("F1.part");
        let api = MockApi::new().with_file("https://files.example/F1", b"hello".to_vec());
        let client = client(api);

        let n = client.get_file("https://files.example/F1", &path).await.unwrap();

        assert_eq!(n, 5);
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_file_retry_starts_from_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("F1.part");
        let api = MockApi::new()
            .with_file("https://files.example/F1", b"hello".to_vec())
            .with_broken_transfers("https://files.example/F1", 2);
        let client = client(api);

        let n = client.get_file("https://files.example/F1", &path).await.unwrap();

        assert_eq!(n, 5);
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_unknown_file_error_is_annotated() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(MockApi::new());

        let err = client
            .get_file("https://files.example/missing", &dir.path().join("missing"))
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("files.download:"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_history_is_retried() {
        let messages = vec![Message::new("1650000000.000100", "U1", "hi")];
        let api = MockApi::new()
            .with_history("C1", messages)
            .with_rate_limited_history("C1", 2);
        let client = client(api);

        let page = client
            .history_page("C1", &TimeWindow::default(), None)
            .await
            .unwrap();

        assert_eq!(page.messages.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_beyond_retries_is_exhausted() {
        let api = MockApi::new()
            .with_history("C1", vec![Message::new("1650000000.000100", "U1", "hi")])
            .with_rate_limited_history("C1", 10);
        let client = client(api);

        let err = client
            .history_page("C1", &TimeWindow::default(), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::RetryExhausted { ref operation, attempts: 3 } if operation == "conversations.history"
        ));
    }
}
