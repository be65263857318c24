use crate::{
    config::Config, mind::Mind, purge::PurgeEngine, registry::Registry, session::SystemBus,
    storage::Storage, voice::VoiceManager,
};
use std::sync::Arc;

/// Process-wide services.  Built once in `main` and shared by every session.
#[derive(Clone)]
pub struct Services {
    pub cfg: Arc<Config>,
    pub storage: Arc<Storage>,
    pub registry: Arc<Registry>,
    pub purge: Arc<PurgeEngine>,
    pub voice: Arc<VoiceManager>,
    pub mind: Arc<Mind>,
    pub bus: SystemBus,
}

/// Collection of data that is shared across events
pub struct Context<'a> {
    // The bot's own context types
    pub cfg: &'a Arc<Config>,
    pub storage: &'a Arc<Storage>,
    pub registry: &'a Arc<Registry>,
    pub purge: &'a Arc<PurgeEngine>,
    pub voice: &'a Arc<VoiceManager>,
    pub mind: &'a Arc<Mind>,
    pub bus: &'a SystemBus,
    // Discord/Serenity context types
    pub cache: &'a Arc<serenity::all::Cache>,
    pub http: &'a Arc<serenity::all::Http>,
    pub cache_http: &'a CacheHttp,
}

impl Services {
    pub fn ctx<'a>(&'a self, discord_ctx: &'a CacheHttp) -> Context<'a> {
        Context {
            cfg: &self.cfg,
            storage: &self.storage,
            registry: &self.registry,
            purge: &self.purge,
            voice: &self.voice,
            mind: &self.mind,
            bus: &self.bus,
            cache: &discord_ctx.cache,
            http: &discord_ctx.http,
            cache_http: discord_ctx,
        }
    }
}

/// Many Serenity functions take a `impl CacheHttp` in order to first check the cache if the item
/// is available and fall back to an http request otherwise.  The most readily available type that
/// impl's this is named very differently in a way that could be confusing, and so we alias it.
pub type CacheHttp = serenity::all::Context;
