mod command;
mod config;
mod context;
mod definition;
mod dispatch;
mod error;
mod event;
mod handler;
mod helper;
mod llm;
mod logging;
mod mind;
mod permissions;
mod purge;
mod readme;
mod registry;
mod respond;
mod session;
mod shortlink;
mod storage;
mod sync;
mod translate;
mod voice;

use crate::{
    config::Config,
    context::Services,
    llm::{HttpLlm, LlmClient},
    mind::{
        speech::{Outbound, SerenityOutbound},
        Mind,
    },
    purge::{sweep::SerenityMessages, PurgeEngine},
    session::{SessionManager, SystemBus},
    storage::Storage,
    voice::VoiceManager,
};
use serenity::all::Http;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let cfg = Arc::new(Config::load()?);
    let storage = Arc::new(Storage::load(cfg.storage_path.clone()).await?);

    // Services that talk to Discord outside of an event get their own REST client.
    let http = Arc::new(Http::new(&cfg.discord_token));
    let purge = Arc::new(PurgeEngine::new(
        storage.clone(),
        Arc::new(SerenityMessages::new(http.clone())),
    ));

    let llm: Arc<dyn LlmClient> = Arc::new(HttpLlm::new(&cfg.ai)?);
    let outbound: Arc<dyn Outbound> = Arc::new(SerenityOutbound::new(http));
    let mind = Arc::new(Mind::load(&cfg, llm, outbound).await?);

    let registry = Arc::new(command::registry(&cfg)?);
    crate::log_internal!("Registered {} commands", registry.names().count());

    let (bus, bus_rx) = SystemBus::new();
    let services = Services {
        cfg,
        storage,
        registry,
        purge,
        voice: Arc::new(VoiceManager::from_build()),
        mind,
        bus,
    };

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                crate::log_internal!("Shutting down");
                shutdown.cancel();
            }
        });
    }

    Arc::new(SessionManager::new(services, bus_rx, shutdown))
        .run()
        .await
}
