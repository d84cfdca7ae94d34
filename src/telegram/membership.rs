//! Yes/no gate consulted before the mother bot routes an event.

use async_trait::async_trait;
use moka::future::Cache;
use teloxide::prelude::*;
use teloxide::types::Recipient;

use crate::core::config;

#[async_trait]
pub trait MembershipGate: Send + Sync {
    async fn is_authorized(&self, user_id: i64) -> bool;

    /// Drops any cached answer, e.g. after the user taps "I joined".
    async fn refresh(&self, _user_id: i64) {}
}

/// Lets everyone through; used for storefront bots and when no channel is set.
pub struct AllowAll;

#[async_trait]
impl MembershipGate for AllowAll {
    async fn is_authorized(&self, _user_id: i64) -> bool {
        true
    }
}

/// Requires membership in a channel, asked through `getChatMember`.
///
/// Answers are cached for a few minutes. API failures let the user through
/// and are not cached, so a misconfigured channel never locks everyone out.
pub struct ChannelMembershipGate {
    bot: Bot,
    channel: Recipient,
    cache: Cache<i64, bool>,
}

impl ChannelMembershipGate {
    pub fn new(bot: Bot, channel: &str) -> Self {
        Self {
            bot,
            channel: parse_channel(channel),
            cache: Cache::builder()
                .max_capacity(config::membership::CACHE_CAPACITY)
                .time_to_live(config::membership::cache_ttl())
                .build(),
        }
    }
}

/// `@name` (or a bare name) is a public username; a number is a chat id.
pub fn parse_channel(channel: &str) -> Recipient {
    let channel = channel.trim();
    match channel.parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) if channel.starts_with('@') => Recipient::ChannelUsername(channel.to_string()),
        Err(_) => Recipient::ChannelUsername(format!("@{}", channel)),
    }
}

#[async_trait]
impl MembershipGate for ChannelMembershipGate {
    async fn is_authorized(&self, user_id: i64) -> bool {
        if let Some(cached) = self.cache.get(&user_id).await {
            return cached;
        }
        let Ok(uid) = u64::try_from(user_id) else {
            return false;
        };

        match self.bot.get_chat_member(self.channel.clone(), UserId(uid)).await {
            Ok(member) => {
                let present = member.is_present();
                self.cache.insert(user_id, present).await;
                present
            }
            Err(e) => {
                log::warn!("Membership check for {} failed, letting through: {}", user_id, e);
                true
            }
        }
    }

    async fn refresh(&self, user_id: i64) {
        self.cache.invalidate(&user_id).await;
    }
}
