//! Voice channel audio
//!
//! Input → [`source::resolve`] → tracks → [`player::Player`] queue → [`recovery::RecoveryStream`]
//! over a parser's [`streamer::Streamer`] → 20 ms frames → Opus → [`transport::VoiceGateway`].

pub mod frames;
pub mod player;
pub mod recovery;
pub mod source;
pub mod status;
pub mod streamer;
pub mod transport;

use anyhow::Result;
use player::Player;
use serenity::all::{Client, ClientBuilder, GuildId};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use streamer::StreamerRegistry;
use transport::VoiceGateway;

/// Owns the voice gateway and one player per guild
pub struct VoiceManager {
    gateway: Arc<dyn VoiceGateway>,
    streamers: Arc<StreamerRegistry>,
    players: Mutex<HashMap<GuildId, Arc<Player>>>,
}

impl VoiceManager {
    pub fn new(gateway: Arc<dyn VoiceGateway>, streamers: StreamerRegistry) -> Self {
        Self {
            gateway,
            streamers: Arc::new(streamers),
            players: Mutex::new(HashMap::new()),
        }
    }

    /// The gateway this build supports, with the stock streamers
    pub fn from_build() -> Self {
        #[cfg(feature = "voice")]
        let gateway: Arc<dyn VoiceGateway> = Arc::new(transport::SongbirdGateway::new());
        #[cfg(not(feature = "voice"))]
        let gateway: Arc<dyn VoiceGateway> = Arc::new(transport::Unsupported);

        Self::new(gateway, StreamerRegistry::with_defaults())
    }

    /// Build the Discord client with whatever the voice gateway needs registered.
    pub async fn attach(&self, builder: ClientBuilder) -> Result<Client> {
        Ok(self.gateway.register(builder).await?)
    }

    /// The guild's player, created on first use
    pub fn player(&self, guild_id: GuildId) -> Arc<Player> {
        let mut players = self
            .players
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        players
            .entry(guild_id)
            .or_insert_with(|| {
                Arc::new(Player::new(
                    guild_id,
                    self.gateway.clone(),
                    self.streamers.clone(),
                ))
            })
            .clone()
    }

    /// The guild's player, if it has one
    pub fn existing(&self, guild_id: GuildId) -> Option<Arc<Player>> {
        self.players
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&guild_id)
            .cloned()
    }

    /// Stop the guild's player.  Leaving the channel also discards the player.
    pub async fn stop(&self, guild_id: GuildId, exit: bool) -> Result<()> {
        let Some(player) = self.existing(guild_id) else {
            return Ok(());
        };
        player.stop(exit).await?;
        if exit {
            self.players
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(&guild_id);
        }
        Ok(())
    }
}
