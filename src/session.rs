//! Gateway session lifecycle
//!
//! One Serenity client per session.  A session ends when the gateway reports a disconnect, when
//! the liveness probe gives up, or when the process shuts down; the manager then tears the client
//! down and opens a fresh one after a short backoff.

use crate::{
    context::Services,
    event::{Envelope, Event},
    handler::Handler,
    logging::PrintColor,
    readme,
    shortlink,
    sync::{self, CommandCatalog, RefreshTarget, SerenityCatalog},
};
use anyhow::{anyhow, Result};
use serenity::{
    all::{GatewayIntents, GuildId, Http, ShardManager},
    Client,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
const PROBE_SETTLE: Duration = Duration::from_secs(15);
const PROBE_INTERVAL: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_MAX_FAILURES: u32 = 3;
const BUS_CAPACITY: usize = 64;

/// In-process requests for the session
#[derive(Debug, Clone, PartialEq)]
pub enum SystemEvent {
    RefreshCommands {
        guild_id: GuildId,
        target: RefreshTarget,
    },
}

/// Sending half of the bounded system event bus
#[derive(Clone)]
pub struct SystemBus(mpsc::Sender<SystemEvent>);

impl SystemBus {
    pub fn new() -> (Self, mpsc::Receiver<SystemEvent>) {
        let (tx, rx) = mpsc::channel(BUS_CAPACITY);
        (Self(tx), rx)
    }

    /// Queue an event without waiting.  Fails when the bus is full.
    pub fn publish(&self, event: SystemEvent) -> Result<()> {
        self.0
            .try_send(event)
            .map_err(|e| anyhow!("System event bus rejected event: {}", e))
    }
}

/// Collapses any number of disconnect reports into one session restart
pub struct DisconnectSignal {
    fired: AtomicBool,
    session: CancellationToken,
}

impl DisconnectSignal {
    pub fn new(session: CancellationToken) -> Self {
        Self {
            fired: AtomicBool::new(false),
            session,
        }
    }

    /// Returns `true` only for the report that ended the session.
    pub fn fire(&self, reason: &str) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        crate::log_warn!("Session disconnected: {}", reason);
        self.session.cancel();
        true
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

/// What the liveness probe needs from the gateway
#[serenity::async_trait]
pub trait HealthCheck: Send + Sync {
    /// The SDK is between connections and has no heartbeat latency yet
    async fn reconnecting(&self) -> bool;
    /// A cheap authenticated request
    async fn check(&self) -> Result<()>;
}

struct GatewayHealth {
    http: Arc<Http>,
    shard_manager: Arc<ShardManager>,
}

#[serenity::async_trait]
impl HealthCheck for GatewayHealth {
    async fn reconnecting(&self) -> bool {
        let runners = self.shard_manager.runners.lock().await;
        runners.values().any(|runner| runner.latency.is_none())
    }

    async fn check(&self) -> Result<()> {
        tokio::time::timeout(PROBE_TIMEOUT, self.http.get_current_user()).await??;
        Ok(())
    }
}

/// Poll the API until it fails `PROBE_MAX_FAILURES` times in a row, then report a disconnect.
///
/// Heartbeat latency alone looks healthy after a host resumes from sleep even when the socket is
/// dead, so the probe makes a real request.
pub async fn liveness_probe(
    health: &dyn HealthCheck,
    disconnect: &DisconnectSignal,
    session: &CancellationToken,
) {
    tokio::select! {
        _ = session.cancelled() => return,
        _ = tokio::time::sleep(PROBE_SETTLE) => {}
    }

    let mut interval = tokio::time::interval(PROBE_INTERVAL);
    let mut failures = 0;
    loop {
        tokio::select! {
            _ = session.cancelled() => return,
            _ = interval.tick() => {}
        }

        if health.reconnecting().await {
            continue;
        }

        match health.check().await {
            Ok(()) => failures = 0,
            Err(e) => {
                failures += 1;
                crate::log_warn!(
                    "Liveness probe failed ({}/{}): {:#}",
                    failures,
                    PROBE_MAX_FAILURES,
                    e
                );
                if failures >= PROBE_MAX_FAILURES {
                    disconnect.fire("liveness probe exhausted");
                    return;
                }
            }
        }
    }
}

/// Owns the gateway connection and the process-wide background services
pub struct SessionManager {
    services: Services,
    token: String,
    intents: GatewayIntents,
    bus: Mutex<mpsc::Receiver<SystemEvent>>,
    background_started: AtomicBool,
    shutdown: CancellationToken,
}

impl SessionManager {
    pub fn new(
        services: Services,
        bus: mpsc::Receiver<SystemEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        // Things we want discord to tell us about.
        let intents = GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MEMBERS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::GUILD_MESSAGE_REACTIONS
            | GatewayIntents::GUILD_VOICE_STATES
            | GatewayIntents::MESSAGE_CONTENT;

        Self {
            token: services.cfg.discord_token.clone(),
            services,
            intents,
            bus: Mutex::new(bus),
            background_started: AtomicBool::new(false),
            shutdown,
        }
    }

    /// Run sessions back to back until shutdown.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }

            crate::log_internal!("Opening session... ");
            if let Err(e) = self.clone().run_session().await {
                crate::log_error!("Session failed: {:#}", e);
            }

            if self.shutdown.is_cancelled() {
                return Ok(());
            }
            crate::log_internal!("Reconnecting in {}s", RECONNECT_BACKOFF.as_secs());
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
            }
        }
    }

    async fn run_session(self: Arc<Self>) -> Result<()> {
        let session = self.shutdown.child_token();
        let disconnect = Arc::new(DisconnectSignal::new(session.clone()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let builder = Client::builder(&self.token, self.intents)
            .event_handler(Handler::new(events_tx, disconnect.clone()));
        let mut client = self.services.voice.attach(builder).await?;

        let shard_manager = client.shard_manager.clone();
        let http = client.http.clone();
        let catalog: Arc<dyn CommandCatalog> = Arc::new(SerenityCatalog::new(http.clone()));

        let mut tasks = JoinSet::new();
        tasks.spawn(self.clone().event_pump(events_rx, catalog.clone(), session.clone()));
        tasks.spawn(self.clone().forward_system_events(catalog, session.clone()));
        {
            let disconnect = disconnect.clone();
            let session = session.clone();
            let health = GatewayHealth {
                http,
                shard_manager: shard_manager.clone(),
            };
            tasks.spawn(async move { liveness_probe(&health, &disconnect, &session).await });
        }
        tasks.spawn(self.services.mind.clone().run(session.clone()));

        let mut gateway = tokio::spawn(async move { client.start().await });
        let finished = tokio::select! {
            _ = session.cancelled() => None,
            result = &mut gateway => Some(result),
        };

        // Whatever ended the session, end all of it.
        session.cancel();
        shard_manager.shutdown_all().await;
        let result = match finished {
            Some(result) => result,
            None => gateway.await,
        };
        while tasks.join_next().await.is_some() {}
        crate::log_internal!("Session closed");

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(anyhow!("Gateway task failed: {}", e)),
        }
    }

    /// Hand queued events to the dispatcher, each in its own task.  Lifecycle events are
    /// handled inline so nothing is dispatched before the background services are up.
    async fn event_pump(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<Envelope>,
        catalog: Arc<dyn CommandCatalog>,
        session: CancellationToken,
    ) {
        let mut handlers = JoinSet::new();
        loop {
            tokio::select! {
                _ = session.cancelled() => break,
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            crate::log_error!("Event handler panicked: {}", e);
                        }
                    }
                }
                envelope = events.recv() => {
                    let Some(Envelope { discord_ctx, event }) = envelope else {
                        break;
                    };
                    match event {
                        Event::Ready(ready) => {
                            crate::log_event!("Connected as {}", ready.user.color());
                            let first = self.start_background_once().await;
                            let force = first && self.services.cfg.init_slash_commands;
                            for guild in &ready.guilds {
                                self.prepare_guild(&discord_ctx.http, &catalog, guild.id, force)
                                    .await;
                            }
                        }
                        Event::GuildCreate { guild_id, is_new } => {
                            if is_new {
                                crate::log_event!("Joined guild {}", guild_id);
                            }
                            // Blacklist is checked on every create; commands only for new joins.
                            if is_new || self.services.cfg.is_blacklisted(guild_id) {
                                self.prepare_guild(&discord_ctx.http, &catalog, guild_id, false)
                                    .await;
                            }
                        }
                        event => {
                            let services = self.services.clone();
                            handlers.spawn(async move { event.handle(&services, &discord_ctx).await });
                        }
                    }
                }
            }
        }

        // In-flight handlers may finish their replies on their own.
        handlers.detach_all();
    }

    /// Leave blacklisted guilds; sync commands for the rest in the background.
    async fn prepare_guild(
        &self,
        http: &Arc<Http>,
        catalog: &Arc<dyn CommandCatalog>,
        guild_id: GuildId,
        force: bool,
    ) {
        if self.services.cfg.is_blacklisted(guild_id) {
            crate::log_warn!("Leaving blacklisted guild {}", guild_id);
            if let Err(e) = guild_id.leave(http).await {
                crate::log_error!("Could not leave guild {}: {}", guild_id, e);
            }
            return;
        }

        let services = self.services.clone();
        let catalog = catalog.clone();
        tokio::spawn(async move {
            sync_and_log(&services, catalog.as_ref(), guild_id, &RefreshTarget::All, force).await;
        });
    }

    /// Start purge recovery, the shortlink server, and the command reference.  Runs on the first
    /// ready of the process only; returns whether this call started them.
    async fn start_background_once(&self) -> bool {
        if self.background_started.swap(true, Ordering::SeqCst) {
            return false;
        }

        match self.services.purge.recover().await {
            Ok(count) => crate::log_internal!("Recovered {} deletion jobs", count),
            Err(e) => crate::log_error!("Deletion job recovery failed: {:#}", e),
        }

        let storage = self.services.storage.clone();
        let addr = self.services.cfg.shortlink_addr.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = shortlink::serve(&addr, storage, shutdown).await {
                crate::log_error!("Shortlink server stopped: {:#}", e);
            }
        });

        let path = self.services.cfg.readme_path.clone();
        match readme::write(&path, &self.services.registry).await {
            Ok(()) => crate::log_internal!("Wrote command reference to {}", path.display()),
            Err(e) => crate::log_error!("Could not write command reference: {:#}", e),
        }

        true
    }

    async fn forward_system_events(
        self: Arc<Self>,
        catalog: Arc<dyn CommandCatalog>,
        session: CancellationToken,
    ) {
        // Only one session runs at a time, so the lock is uncontended.
        let mut bus = self.bus.lock().await;
        loop {
            let event = tokio::select! {
                _ = session.cancelled() => return,
                event = bus.recv() => match event {
                    Some(event) => event,
                    None => return,
                },
            };

            match event {
                SystemEvent::RefreshCommands { guild_id, target } => {
                    sync_and_log(&self.services, catalog.as_ref(), guild_id, &target, false).await;
                }
            }
        }
    }
}

async fn sync_and_log(
    services: &Services,
    catalog: &dyn CommandCatalog,
    guild_id: GuildId,
    target: &RefreshTarget,
    force: bool,
) {
    let result = sync::refresh(
        catalog,
        &services.cfg,
        &services.storage,
        &services.registry,
        guild_id,
        target,
        force,
    )
    .await;

    match result {
        Ok(report) => crate::log_internal!(
            "Synced `{}` in guild {}: {} upserted, {} deleted, {} unchanged",
            target,
            guild_id,
            report.upserted.len(),
            report.deleted.len(),
            report.unchanged
        ),
        Err(e) => crate::log_error!("Command sync `{}` failed in guild {}: {:#}", target, guild_id, e),
    }
}
