//! One pass of message deletion across a channel's history

use anyhow::Result;
use chrono::{DateTime, Utc};
use serenity::all::{ChannelId, GetMessages, Http, MessageId};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

/// Discord's maximum page size for message history
pub const PAGE_SIZE: u8 = 100;
/// Pause between single-message deletions
pub const DELETE_GAP: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageMessage {
    pub id: MessageId,
    pub timestamp: DateTime<Utc>,
}

/// Message history of a channel
#[serenity::async_trait]
pub trait ChannelMessages: Send + Sync {
    /// Up to `limit` messages older than `before` (or the newest ones), newest first.
    async fn page(
        &self,
        channel_id: ChannelId,
        before: Option<MessageId>,
        limit: u8,
    ) -> Result<Vec<PageMessage>>;

    async fn delete(&self, channel_id: ChannelId, message_id: MessageId) -> Result<()>;
}

pub struct SerenityMessages {
    http: Arc<Http>,
}

impl SerenityMessages {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[serenity::async_trait]
impl ChannelMessages for SerenityMessages {
    async fn page(
        &self,
        channel_id: ChannelId,
        before: Option<MessageId>,
        limit: u8,
    ) -> Result<Vec<PageMessage>> {
        let mut request = GetMessages::new().limit(limit);
        if let Some(before) = before {
            request = request.before(before);
        }

        Ok(channel_id
            .messages(&self.http, request)
            .await?
            .into_iter()
            .map(|msg| PageMessage {
                id: msg.id,
                timestamp: DateTime::from_timestamp(msg.timestamp.unix_timestamp(), 0)
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn delete(&self, channel_id: ChannelId, message_id: MessageId) -> Result<()> {
        channel_id.delete_message(&self.http, message_id).await?;
        Ok(())
    }
}

/// Inclusive timestamp window; open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bounds {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl Bounds {
    /// Everything posted at or before `end`
    pub fn until(end: DateTime<Utc>) -> Self {
        Self {
            start: None,
            end: Some(end),
        }
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| timestamp >= start)
            && self.end.map_or(true, |end| timestamp <= end)
    }
}

/// Delete every message within `bounds`, newest first, one at a time.  Ends on an empty or
/// short page, a failed fetch, or `stop`.  Returns how many messages were deleted.
pub async fn sweep(
    messages: &dyn ChannelMessages,
    channel_id: ChannelId,
    bounds: Bounds,
    stop: &CancellationToken,
) -> usize {
    let mut before = None;
    let mut deleted = 0;

    loop {
        if stop.is_cancelled() {
            return deleted;
        }

        let page = match messages.page(channel_id, before, PAGE_SIZE).await {
            Ok(page) => page,
            Err(e) => {
                crate::log_warn!("Could not fetch messages in {}: {:#}", channel_id, e);
                return deleted;
            }
        };
        let Some(last) = page.last() else {
            return deleted;
        };

        for msg in page.iter().filter(|msg| bounds.contains(msg.timestamp)) {
            tokio::select! {
                _ = stop.cancelled() => return deleted,
                result = messages.delete(channel_id, msg.id) => match result {
                    Ok(()) => deleted += 1,
                    Err(e) => crate::log_warn!("Could not delete message {}: {:#}", msg.id, e),
                },
            }
            tokio::select! {
                _ = stop.cancelled() => return deleted,
                _ = tokio::time::sleep(DELETE_GAP) => {}
            }
        }

        if page.len() < PAGE_SIZE as usize {
            return deleted;
        }
        before = Some(last.id);
    }
}
