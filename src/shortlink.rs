//! Short links and the HTTP server that redirects them

use crate::{
    error::BotError,
    storage::{ShortLink, Storage},
};
use anyhow::{Context as _, Result};
use axum::{
    extract::State,
    http::{StatusCode, Uri},
    response::{IntoResponse, Redirect, Response},
    Router,
};
use rand::{distributions::Alphanumeric, Rng};
use serenity::all::GuildId;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const ID_LEN: usize = 6;
const ID_ATTEMPTS: usize = 10;

/// Store a new short link for `url` under a fresh ID.  A URL the guild already shortened gets
/// its existing link back.
pub async fn create(storage: &Storage, guild_id: GuildId, url: &str) -> Result<ShortLink> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) || url.contains(char::is_whitespace)
    {
        return Err(BotError::InvalidInput("That does not look like a web link.".to_owned()).into());
    }
    if let Some(existing) = storage.links(guild_id).await.into_iter().find(|l| l.url == url) {
        return Ok(existing);
    }

    for _ in 0..ID_ATTEMPTS {
        let id = new_id();
        if storage.find_link(&id).await.is_some() {
            continue;
        }
        let link = ShortLink {
            id,
            url: url.to_owned(),
            created_at: chrono::Utc::now(),
            clicks: 0,
        };
        storage.add_link(guild_id, link.clone()).await?;
        return Ok(link);
    }
    Err(anyhow::anyhow!("Could not find a free short link ID"))
}

fn new_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LEN)
        .map(char::from)
        .collect()
}

pub fn router(storage: Arc<Storage>) -> Router {
    Router::new().fallback(redirect).with_state(storage)
}

/// The first path segment is the short ID; anything after it is ignored.
async fn redirect(State(storage): State<Arc<Storage>>, uri: Uri) -> Response {
    let id = uri.path().trim_start_matches('/').split('/').next().unwrap_or("");
    if id.is_empty() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let Some((guild_id, link)) = storage.find_link(id).await else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let id = id.to_owned();
    tokio::spawn(async move {
        if let Err(e) = storage.increment_clicks(guild_id, &id).await {
            crate::log_warn!("Could not count click on `{}`: {:#}", id, e);
        }
    });
    Redirect::to(&link.url).into_response()
}

/// Serve redirects on `addr` until `shutdown` fires.
pub async fn serve(addr: &str, storage: Arc<Storage>, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Could not bind shortlink server to `{}`", addr))?;
    crate::log_internal!("Shortlink server listening on {}", addr);

    axum::serve(listener, router(storage))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Shortlink server failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use std::time::Duration;
    use tower::ServiceExt;

    const GUILD: GuildId = GuildId::new(5);

    async fn storage(dir: &tempfile::TempDir) -> Arc<Storage> {
        Arc::new(Storage::load(dir.path().join("datastore.json")).await.unwrap())
    }

    async fn get(storage: &Arc<Storage>, path: &str) -> Response {
        router(storage.clone())
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn clicks(storage: &Storage, id: &str) -> u64 {
        storage.find_link(id).await.unwrap().1.clicks
    }

    #[tokio::test]
    async fn known_id_redirects_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir).await;
        let link = create(&storage, GUILD, "https://example.com/page?q=1").await.unwrap();
        assert_eq!(link.id.len(), ID_LEN);

        let response = get(&storage, &format!("/{}/ignored/rest", link.id)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers()["location"],
            "https://example.com/page?q=1"
        );

        // The counter is bumped in the background.
        for _ in 0..100 {
            if clicks(&storage, &link.id).await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(clicks(&storage, &link.id).await, 1);

        let again = get(&storage, &format!("/{}", link.id)).await;
        assert_eq!(again.status(), StatusCode::SEE_OTHER);
    }

    #[tokio::test]
    async fn same_url_reuses_its_link() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir).await;
        let first = create(&storage, GUILD, "https://example.com/a").await.unwrap();
        let again = create(&storage, GUILD, " https://example.com/a ").await.unwrap();
        assert_eq!(first.id, again.id);

        let other = create(&storage, GUILD, "https://example.com/b").await.unwrap();
        assert_ne!(first.id, other.id);
        assert_eq!(storage.links(GUILD).await.len(), 2);

        // Another guild gets its own link.
        let elsewhere = create(&storage, GuildId::new(6), "https://example.com/a").await.unwrap();
        assert_ne!(first.id, elsewhere.id);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir).await;
        assert_eq!(get(&storage, "/nope").await.status(), StatusCode::NOT_FOUND);
        assert_eq!(get(&storage, "/").await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn only_web_links_are_shortened() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir).await;
        for bad in ["ftp://example.com", "example.com", "https://exa mple.com"] {
            let err = create(&storage, GUILD, bad).await.unwrap_err();
            assert!(BotError::user_message(&err).is_some());
        }
        assert!(storage.links(GUILD).await.is_empty());
    }
}
