//! Audio alert for inbound events.
//!
//! The chime is fetched lazily on the first trigger and cached for the
//! process lifetime. A failed fetch latches: the alert degrades to a silent
//! no-op instead of retrying on every notification. The mute preference
//! lives in the global (identity-independent) store partition.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, warn};

use pulse_store::IdentityStore;

/// Fire-and-forget alert hook for the dispatcher.
pub trait AlertSink: Send + Sync + 'static {
    /// Signal one audible alert. Never blocks the caller.
    fn trigger(&self);
}

/// Plays a decoded clip. Implementations restart from the beginning when a
/// previous play is still in flight.
pub trait Playback: Send + Sync + 'static {
    /// Play the clip once.
    fn play(&self, clip: &[u8]);
}

/// Playback that only logs. Used by headless runs.
#[derive(Debug, Default)]
pub struct NullPlayback;

impl Playback for NullPlayback {
    fn play(&self, clip: &[u8]) {
        debug!(bytes = clip.len(), "alert chime (no audio device)");
    }
}

struct AlertInner {
    store: Arc<IdentityStore>,
    sound_url: String,
    client: reqwest::Client,
    /// `Some(bytes)` once fetched, `None` once a fetch has failed.
    clip: OnceCell<Option<Vec<u8>>>,
    playback: Arc<dyn Playback>,
}

/// Audio alert emitter backed by a remote clip.
#[derive(Clone)]
pub struct AudioAlert {
    inner: Arc<AlertInner>,
}

impl AudioAlert {
    /// Build an emitter. Nothing is fetched until the first trigger.
    #[must_use]
    pub fn new(store: Arc<IdentityStore>, sound_url: &str, playback: Arc<dyn Playback>) -> Self {
        Self {
            inner: Arc::new(AlertInner {
                store,
                sound_url: sound_url.to_string(),
                client: reqwest::Client::new(),
                clip: OnceCell::new(),
                playback,
            }),
        }
    }

    /// Resolve the clip and play it, honoring the mute preference.
    pub async fn fire(&self) {
        let inner = &self.inner;
        if !inner.store.sound_enabled() {
            debug!("alert muted");
            return;
        }
        let clip = inner
            .clip
            .get_or_init(|| async {
                match fetch_clip(&inner.client, &inner.sound_url).await {
                    Ok(bytes) => {
                        debug!(bytes = bytes.len(), "alert clip cached");
                        Some(bytes)
                    }
                    Err(e) => {
                        // Latched: one failure mutes the alert for good.
                        warn!(error = %e, "alert clip unavailable, going silent");
                        None
                    }
                }
            })
            .await;
        if let Some(bytes) = clip {
            inner.playback.play(bytes);
        }
    }
}

async fn fetch_clip(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, reqwest::Error> {
    let response = client.get(url).send().await?.error_for_status()?;
    Ok(response.bytes().await?.to_vec())
}

impl AlertSink for AudioAlert {
    fn trigger(&self) {
        let alert = self.clone();
        drop(tokio::spawn(async move { alert.fire().await }));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
