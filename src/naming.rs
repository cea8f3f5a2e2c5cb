//! Directory names and date sharding of exported channels.

use std::collections::BTreeMap;

use chrono::DateTime;
use tracing::{debug, warn};

use crate::types::{Channel, Message, UserIndex};
use crate::{AppError, Result};

/// Prefix of direct message directories.
pub const IM_PREFIX: &str = "IM-";

/// Messages of one channel keyed by `YYYY-MM-DD`, each day in API order.
pub type MessagesByDate = BTreeMap<String, Vec<Message>>;

/// Returns the export directory name of a channel.
///
/// Named channels (public, private, group DMs) use `name_normalized`. Direct
/// messages have no name and become `IM-<user name>`, or `IM-<user id>` when the
/// peer is not in the index. Anything else is an unknown entity.
pub fn valid_name(channel: &Channel, users: &UserIndex) -> Result<String> {
    if !channel.name_normalized.is_empty() {
        return Ok(channel.name_normalized.clone());
    }

    if !channel.is_im {
        return Err(AppError::UnknownEntity {
            channel_id: channel.id.clone(),
        });
    }

    let peer = channel.user.as_deref().unwrap_or_default();
    match users.get(peer) {
        Some(user) => Ok(format!("{IM_PREFIX}{}", user.name)),
        None => {
            warn!(channel_id = %channel.id, user_id = peer, "user not found, using ID as name");
            let fallback = if peer.is_empty() { &channel.id } else { peer };
            Ok(format!("{IM_PREFIX}{fallback}"))
        }
    }
}

/// Whether the official Slack import can handle the channel record.
pub fn is_official_compatible(channel: &Channel) -> bool {
    channel.is_im || !channel.name.is_empty() || !channel.name_normalized.is_empty()
}

/// Drops the channel records the official import tool chokes on.
pub fn filter_official(channels: &[Channel]) -> Vec<Channel> {
    channels
        .iter()
        .filter(|ch| {
            let keep = is_official_compatible(ch);
            if !keep {
                debug!(channel_id = %ch.id, "filtered out channel without name");
            }
            keep
        })
        .cloned()
        .collect()
}

/// Converts a Slack timestamp (`"1650000000.000100"`) to its UTC calendar date.
pub fn ts_to_date(ts: &str) -> Result<String> {
    let (secs, micros) = ts.split_once('.').unwrap_or((ts, "0"));
    let secs: i64 = secs
        .parse()
        .map_err(|_| AppError::InvalidTimestamp(ts.to_string()))?;
    if !micros.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::InvalidTimestamp(ts.to_string()));
    }
    let dt = DateTime::from_timestamp(secs, 0).ok_or_else(|| AppError::InvalidTimestamp(ts.to_string()))?;
    Ok(dt.format("%Y-%m-%d").to_string())
}

/// Splits messages into per-day buckets, keeping their relative order.
pub fn by_date(messages: Vec<Message>) -> Result<MessagesByDate> {
    let mut out = MessagesByDate::new();
    for msg in messages {
        let date = ts_to_date(&msg.ts)?;
        out.entry(date).or_default().push(msg);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::User;

    fn users() -> UserIndex {
        UserIndex::from(vec![User::new("U1", "alice"), User::new("U2", "bob")].as_slice())
    }

    #[test]
    fn test_name_normalized_wins() {
        let mut ch = Channel::named("C1", "General");
        ch.name_normalized = "general".to_string();
        assert_eq!(valid_name(&ch, &users()).unwrap(), "general");

        // even for a direct message
        let mut im = Channel::im("D1", "U1");
        im.name_normalized = "odd-im".to_string();
        assert_eq!(valid_name(&im, &users()).unwrap(), "odd-im");
    }

    #[test]
    fn test_im_uses_peer_name() {
        let ch = Channel::im("D1", "U2");
        assert_eq!(valid_name(&ch, &users()).unwrap(), "IM-bob");
    }

    #[test]
    fn test_im_unknown_peer_uses_id() {
        let ch = Channel::im("D1", "U9");
        assert_eq!(valid_name(&ch, &users()).unwrap(), "IM-U9");
    }

    #[test]
    fn test_unnamed_channel_is_unknown_entity() {
        let ch = Channel {
            is_im: false,
            ..Channel::im("X1", "U1")
        };
        let err = valid_name(&ch, &users()).unwrap_err();
        assert!(matches!(err, AppError::UnknownEntity { channel_id } if channel_id == "X1"));
    }

    #[test]
    fn test_filter_drops_only_unnamed_non_im() {
        let mut strange = Channel::named("X1", "");
        strange.name_normalized.clear();
        let chans = vec![Channel::named("C1", "general"), Channel::im("D1", "U1"), strange];

        let filtered = filter_official(&chans);

        let ids: Vec<_> = filtered.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["C1", "D1"]);
    }

    #[test]
    fn test_filter_is_idempotent() {
        let mut strange = Channel::named("X1", "");
        strange.name_normalized.clear();
        let mut half = Channel::named("C2", "random");
        half.name_normalized.clear();
        let chans = vec![
            strange.clone(),
            Channel::named("C1", "general"),
            half,
            Channel::im("D1", "U1"),
            strange,
        ];

        let once = filter_official(&chans);
        let twice = filter_official(&once);

        assert_eq!(once, twice);
        assert_eq!(once.len(), 3);
    }

    #[test]
    fn test_ts_to_date() {
        assert_eq!(ts_to_date("1650000000.000100").unwrap(), "2022-04-15");
        assert_eq!(ts_to_date("0.000000").unwrap(), "1970-01-01");
        assert_eq!(ts_to_date("1650067199").unwrap(), "2022-04-15");
        assert_eq!(ts_to_date("1650067200.000001").unwrap(), "2022-04-16");
    }

    #[test]
    fn test_ts_to_date_rejects_garbage() {
        assert!(matches!(ts_to_date("yesterday"), Err(AppError::InvalidTimestamp(_))));
        assert!(matches!(ts_to_date("12.ab"), Err(AppError::InvalidTimestamp(_))));
        assert!(matches!(ts_to_date(""), Err(AppError::InvalidTimestamp(_))));
    }

    #[test]
    fn test_by_date_partitions_without_loss() {
        let stamps = [
            "1650067300.000002",
            "1650000000.000100",
            "1650067200.000001",
            "1650000500.000000",
            "1650153700.000000",
        ];
        let messages: Vec<Message> = stamps
            .iter()
            .enumerate()
            .map(|(i, ts)| Message::new(*ts, "U1", format!("m{i}")))
            .collect();

        let grouped = by_date(messages.clone()).unwrap();

        assert_eq!(grouped.len(), 3);
        let mut all: Vec<Message> = grouped.values().flatten().cloned().collect();
        assert_eq!(all.len(), messages.len());
        all.sort_by(|a, b| a.ts.cmp(&b.ts));
        let mut expected = messages.clone();
        expected.sort_by(|a, b| a.ts.cmp(&b.ts));
        assert_eq!(all, expected);

        let day = &grouped["2022-04-16"];
        assert_eq!(day[0].ts, "1650067300.000002");
        assert_eq!(day[1].ts, "1650067200.000001");
    }
}
