use std::sync::Arc;
use std::time::Duration;

use feed_rs::parser;
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::db::{Database, DbError, FeedRef};

pub struct Fetcher {
    client: Client,
    db: Arc<Database>,
}

impl Fetcher {
    pub fn new(db: Arc<Database>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Feedkeeper/1.0 (RSS Aggregator)")
            .build()
            .expect("Failed to create HTTP client");

        Self { client, db }
    }

    /// One poll run: every feed in the system, sequentially. A feed that
    /// fails to fetch or parse is logged and skipped without touching its
    /// stored state.
    pub async fn refresh_all_feeds(&self) -> anyhow::Result<()> {
        let feeds = self.db.all_feeds().await?;
        info!("Polling {} feeds", feeds.len());

        for feed in feeds {
            match self.refresh_feed(&feed).await {
                Ok(new_posts) => {
                    info!("Ingested {} new posts from '{}'", new_posts, feed.url);
                }
                Err(e) => {
                    error!("Failed to refresh feed '{}': {:#}", feed.url, e);
                }
            }
        }

        info!("Feed poll complete");
        Ok(())
    }

    async fn refresh_feed(&self, feed: &FeedRef) -> anyhow::Result<usize> {
        info!("Fetching feed: {}", feed.url);

        let response = self
            .client
            .get(&feed.url)
            .send()
            .await?
            .error_for_status()?;
        let bytes = response.bytes().await?;
        let parsed = parser::parse(&bytes[..])?;

        // A successful fetch advances last_fetched even if nothing is new.
        self.db.mark_feed_fetched(feed.id).await?;

        let mut inserted = 0;
        for entry in parsed.entries {
            let title = entry
                .title
                .as_ref()
                .map(|t| t.content.clone())
                .unwrap_or_else(|| "Untitled".to_string());

            let link = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default();

            if link.is_empty() {
                warn!("Skipping entry with no link: {}", title);
                continue;
            }

            let published_at = entry
                .published
                .or(entry.updated)
                .map(|dt| dt.to_rfc3339());

            // Best-effort pre-filter; the UNIQUE constraint on post urls is
            // what actually guarantees exactly-once ingestion.
            let already_ingested = match self.db.post_exists(&link).await {
                Ok(exists) => exists,
                Err(e) => {
                    warn!("Existence check failed for {}: {}", link, e);
                    false
                }
            };
            if already_ingested {
                continue;
            }

            match self
                .db
                .insert_post(feed.id, &title, &link, published_at.as_deref())
                .await
            {
                Ok(()) => inserted += 1,
                Err(DbError::Duplicate) => {
                    debug!("Post {} already ingested", link);
                }
                Err(e) => {
                    error!("Failed to store post {}: {}", link, e);
                }
            }
        }

        Ok(inserted)
    }
}

/// Handle for requesting an out-of-band poll run, e.g. right after a feed
/// is added. The channel is bounded to one pending request so bursts of
/// triggers coalesce into a single extra run.
#[derive(Clone)]
pub struct PollHandle {
    tx: mpsc::Sender<()>,
}

impl PollHandle {
    pub fn channel() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// Queue an immediate poll of all feeds without blocking the caller.
    pub fn request_poll(&self) {
        match self.tx.try_send(()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(())) => debug!("Poll already queued"),
            Err(mpsc::error::TrySendError::Closed(())) => warn!("Poller is not running"),
        }
    }
}

pub async fn start_background_refresh(
    fetcher: Arc<Fetcher>,
    interval_minutes: u64,
    mut poll_requests: mpsc::Receiver<()>,
) {
    let interval = Duration::from_secs(interval_minutes * 60);

    // Do initial fetch
    info!("Starting initial feed poll");
    if let Err(e) = fetcher.refresh_all_feeds().await {
        error!("Initial feed poll failed: {}", e);
    }

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                info!("Starting scheduled feed poll");
            }
            request = poll_requests.recv() => {
                if request.is_none() {
                    // All handles dropped; nothing can request polls anymore.
                    break;
                }
                info!("Starting requested feed poll");
            }
        }

        if let Err(e) = fetcher.refresh_all_feeds().await {
            error!("Feed poll failed: {}", e);
        }
    }
}
