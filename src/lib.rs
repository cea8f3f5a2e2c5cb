use chrono::{NaiveDate, NaiveTime};

pub mod auth;
pub mod cli;
pub mod client;
pub mod commands;
pub mod downloader;
pub mod error;
pub mod export;
pub mod limiter;
pub mod naming;
pub mod output;
pub mod retry;
pub mod settings;
pub mod slack;
pub mod types;

#[cfg(test)]
mod mock;

pub use cli::{Cli, Commands};
pub use error::{AppError, Result};

use types::TimeWindow;

pub fn load_token() -> Result<String> {
    std::env::var("SLACK_TOKEN").map_err(|_| AppError::MissingToken)
}

/// The `d` session cookie from `SLACK_COOKIE`, if set.
pub fn load_cookie() -> Option<String> {
    std::env::var("SLACK_COOKIE").ok().filter(|c| !c.is_empty())
}

pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| AppError::InvalidDate(s.to_string()))
}

/// Slack timestamp of midnight UTC at the start of `date`.
pub fn date_to_slack_ts(date: NaiveDate) -> String {
    let timestamp = date.and_time(NaiveTime::MIN).and_utc().timestamp();
    format!("{}.000000", timestamp)
}

/// History window covering whole days, `to` included.
pub fn time_window(from: Option<NaiveDate>, to: Option<NaiveDate>) -> TimeWindow {
    TimeWindow {
        oldest: from.map(date_to_slack_ts),
        latest: to.map(|d| date_to_slack_ts(d.succ_opt().unwrap_or(d))),
    }
}
