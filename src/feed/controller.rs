use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::{load_feed, share_link, FeedCard, FeedQuery};
use crate::backend::Backend;
use crate::config::ClientOptions;
use crate::error::{Error, Result};
use crate::models::{tables, SkillVideo, VideoStatus};
use crate::optimistic;
use crate::social;

/// How long a heart burst stays on screen
pub const HEART_BURST_TTL: Duration = Duration::from_millis(1000);

/// Playback state of one card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState {
    NotVisible,
    VisibleInactive,
    ActivePlaying,
    ActivePaused,
}

impl CardState {
    pub fn is_active(&self) -> bool {
        matches!(self, CardState::ActivePlaying | CardState::ActivePaused)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    Playing,
    /// The platform refused to start playback, typically unmuted autoplay.
    Rejected,
}

/// The media surface the controller drives
pub trait Player {
    fn play(&mut self, index: usize, muted: bool) -> PlayOutcome;

    fn pause(&mut self, index: usize);

    fn rewind(&mut self, index: usize);
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedLoad {
    Loading,
    Ready,
    Empty,
    Failed(String),
}

/// Transient like animation at the tap position
#[derive(Debug, Clone, PartialEq)]
pub struct HeartBurst {
    pub video_id: String,
    pub x: f64,
    pub y: f64,
    pub at: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TapOutcome {
    /// Waiting to see whether a second tap follows
    Pending,
    DoubleTap(HeartBurst),
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modal {
    Comments,
    Reviews,
    Share,
    Viewers,
}

#[derive(Debug, Clone, Copy)]
struct PendingTap {
    index: usize,
    at: Instant,
}

/// Owns the feed cards and keeps at most one of them active
pub struct FeedController {
    backend: Arc<dyn Backend>,
    viewer: Option<String>,
    options: ClientOptions,
    query: FeedQuery,
    load: FeedLoad,
    cards: Vec<FeedCard>,
    active: Option<usize>,
    muted: bool,
    muted_indicator: bool,
    pending_tap: Option<PendingTap>,
    hearts: Vec<HeartBurst>,
    viewed: HashSet<String>,
    last_viewed: Option<String>,
    modal: Option<(Modal, usize)>,
}

impl FeedController {
    pub fn new(backend: Arc<dyn Backend>, viewer: Option<&str>, options: ClientOptions) -> Self {
        Self {
            backend,
            viewer: viewer.map(String::from),
            options,
            query: FeedQuery::default(),
            load: FeedLoad::Loading,
            cards: Vec::new(),
            active: None,
            muted: false,
            muted_indicator: false,
            pending_tap: None,
            hearts: Vec::new(),
            viewed: HashSet::new(),
            last_viewed: None,
            modal: None,
        }
    }

    pub fn cards(&self) -> &[FeedCard] {
        &self.cards
    }

    pub fn load_state(&self) -> &FeedLoad {
        &self.load
    }

    pub fn active(&self) -> Option<usize> {
        self.active
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Set after autoplay had to fall back to muted playback
    pub fn muted_indicator(&self) -> bool {
        self.muted_indicator
    }

    pub fn hearts(&self) -> &[HeartBurst] {
        &self.hearts
    }

    /// Replace the filters and reload
    pub async fn set_query(&mut self, query: FeedQuery) -> &FeedLoad {
        self.query = query;
        self.load().await
    }

    /// Load the cards; failures become [`FeedLoad::Failed`].
    pub async fn load(&mut self) -> &FeedLoad {
        self.load = FeedLoad::Loading;
        self.active = None;
        self.pending_tap = None;
        self.modal = None;
        match load_feed(self.backend.as_ref(), self.viewer.as_deref(), &self.query).await {
            Ok(cards) if cards.is_empty() => {
                self.cards = cards;
                self.load = FeedLoad::Empty;
            }
            Ok(cards) => {
                info!(count = cards.len(), "feed loaded");
                self.cards = cards;
                self.load = FeedLoad::Ready;
            }
            Err(e) => {
                error!(error = %e, "feed load failed");
                self.cards.clear();
                self.load = FeedLoad::Failed(e.to_string());
            }
        }
        &self.load
    }

    pub async fn retry(&mut self) -> &FeedLoad {
        self.load().await
    }

    /// Feed a viewport intersection report for card `index`
    ///
    /// Returns the id of a newly activated video.
    pub fn on_intersection(&mut self, index: usize, ratio: f64, player: &mut dyn Player) -> Option<String> {
        let video_id = self.cards.get(index)?.video.id.clone();

        if ratio >= self.options.visibility_threshold {
            if self.active == Some(index) {
                return None;
            }
            if let Some(previous) = self.active.take() {
                self.deactivate(previous, CardState::VisibleInactive, player);
            }
            self.activate(index, player);
            return Some(video_id);
        }

        if ratio <= 0.0 {
            if self.active == Some(index) {
                self.active = None;
                self.deactivate(index, CardState::NotVisible, player);
            } else {
                self.cards[index].state = CardState::NotVisible;
            }
        } else if self.cards[index].state == CardState::NotVisible {
            self.cards[index].state = CardState::VisibleInactive;
        }
        None
    }

    fn activate(&mut self, index: usize, player: &mut dyn Player) {
        let mut outcome = player.play(index, self.muted);
        if outcome == PlayOutcome::Rejected && !self.muted {
            debug!(index, "autoplay rejected, retrying muted");
            self.muted = true;
            self.muted_indicator = true;
            outcome = player.play(index, true);
        }
        self.cards[index].state = match outcome {
            PlayOutcome::Playing => CardState::ActivePlaying,
            PlayOutcome::Rejected => CardState::ActivePaused,
        };
        self.active = Some(index);
    }

    fn deactivate(&mut self, index: usize, next: CardState, player: &mut dyn Player) {
        player.pause(index);
        player.rewind(index);
        if let Some(card) = self.cards.get_mut(index) {
            card.state = next;
        }
    }

    /// Toggle play and pause on the active card
    pub fn toggle_play(&mut self, index: usize, player: &mut dyn Player) -> Option<CardState> {
        if self.active != Some(index) {
            return None;
        }
        let next = match self.cards[index].state {
            CardState::ActivePlaying => {
                player.pause(index);
                CardState::ActivePaused
            }
            _ => match player.play(index, self.muted) {
                PlayOutcome::Playing => CardState::ActivePlaying,
                PlayOutcome::Rejected => CardState::ActivePaused,
            },
        };
        self.cards[index].state = next;
        Some(next)
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        if !muted {
            self.muted_indicator = false;
        }
    }

    /// Register a tap
    ///
    /// A second tap on the same card inside the debounce window is a double
    /// tap: it likes the video (unless already liked) and emits a heart.
    /// Otherwise the tap stays pending until [`Self::resolve_pending_tap`].
    pub async fn on_tap(
        &mut self,
        index: usize,
        at: Instant,
        x: f64,
        y: f64,
        player: &mut dyn Player,
    ) -> Result<TapOutcome> {
        if index >= self.cards.len() {
            return Ok(TapOutcome::Ignored);
        }

        if let Some(pending) = self.pending_tap {
            let within = at.saturating_duration_since(pending.at) < self.options.tap_debounce;
            if pending.index == index && within {
                self.pending_tap = None;
                let burst = HeartBurst {
                    video_id: self.cards[index].video.id.clone(),
                    x,
                    y,
                    at,
                };
                if !self.cards[index].user_liked {
                    self.toggle_like(index).await?;
                }
                self.hearts.push(burst.clone());
                return Ok(TapOutcome::DoubleTap(burst));
            }
            // The earlier tap was a single tap after all.
            self.pending_tap = None;
            self.toggle_play(pending.index, player);
        }

        self.pending_tap = Some(PendingTap { index, at });
        Ok(TapOutcome::Pending)
    }

    /// Resolve a pending single tap once its window has passed
    pub fn resolve_pending_tap(&mut self, now: Instant, player: &mut dyn Player) -> Option<CardState> {
        let pending = self.pending_tap?;
        if now.saturating_duration_since(pending.at) < self.options.tap_debounce {
            return None;
        }
        self.pending_tap = None;
        self.toggle_play(pending.index, player)
    }

    /// Drop heart bursts whose animation has finished
    pub fn expire_hearts(&mut self, now: Instant) {
        self.hearts
            .retain(|h| now.saturating_duration_since(h.at) < HEART_BURST_TTL);
    }

    /// Count a view of card `index`, at most once per video per session
    ///
    /// Returns whether a view row was written. A duplicate row is benign;
    /// other failures are logged.
    pub async fn record_view(&mut self, index: usize) -> bool {
        let Some(viewer) = self.viewer.clone() else {
            return false;
        };
        let Some(card) = self.cards.get(index) else {
            return false;
        };
        let video_id = card.video.id.clone();
        if self.last_viewed.as_deref() == Some(video_id.as_str()) || !self.viewed.insert(video_id.clone()) {
            return false;
        }
        self.last_viewed = Some(video_id.clone());

        let row = json!({ "video_id": video_id, "user_id": viewer });
        match self.backend.insert(tables::VIDEO_VIEWS, row).await {
            Ok(_) => {
                if let Some(card) = self.cards.get_mut(index) {
                    card.video.views_count += 1;
                }
                true
            }
            Err(e) if e.is_unique_violation() => {
                debug!(video_id = %video_id, "view already recorded");
                false
            }
            Err(e) => {
                warn!(video_id = %video_id, error = %e, "failed to record view");
                false
            }
        }
    }

    /// Like or unlike card `index`; the local flip is reverted on failure.
    pub async fn toggle_like(&mut self, index: usize) -> Result<()> {
        let viewer = self.viewer.clone().ok_or(Error::NotSignedIn)?;
        let card = self
            .cards
            .get_mut(index)
            .ok_or_else(|| Error::not_found(format!("feed card {}", index)))?;
        let video_id = card.video.id.clone();
        let was_liked = card.user_liked;
        let backend = self.backend.clone();

        let remote = async move {
            if was_liked {
                social::unlike(backend.as_ref(), &viewer, &video_id).await
            } else {
                social::like(backend.as_ref(), &viewer, &video_id).await
            }
        };

        let flip = |c: &mut FeedCard| {
            c.likes_delta(if c.user_liked { -1 } else { 1 });
            c.user_liked = !c.user_liked;
        };
        optimistic::run(card, flip, flip, remote).await
    }

    /// Follow or unfollow the provider of card `index`
    ///
    /// Every card from the same provider flips together.
    pub async fn toggle_follow(&mut self, index: usize) -> Result<()> {
        let viewer = self.viewer.clone().ok_or(Error::NotSignedIn)?;
        let card = self
            .cards
            .get(index)
            .ok_or_else(|| Error::not_found(format!("feed card {}", index)))?;
        let provider_id = card.provider.id.clone();
        if provider_id == viewer {
            return Err(Error::validation("You cannot follow yourself"));
        }
        let was_following = card.is_following;
        let backend = self.backend.clone();
        let remote_provider = provider_id.clone();

        let remote = async move {
            if was_following {
                social::unfollow(backend.as_ref(), &viewer, &remote_provider).await
            } else {
                social::follow(backend.as_ref(), &viewer, &remote_provider).await
            }
        };

        let set = |following: bool| {
            let provider_id = provider_id.clone();
            move |cards: &mut Vec<FeedCard>| {
                for card in cards.iter_mut().filter(|c| c.provider.id == provider_id) {
                    if card.is_following != following {
                        card.is_following = following;
                        card.provider.followers_count += if following { 1 } else { -1 };
                    }
                }
            }
        };
        optimistic::run(&mut self.cards, set(!was_following), set(was_following), remote).await
    }

    /// Flag card `index` for moderators
    pub async fn report(&mut self, index: usize, reason: &str) -> Result<()> {
        let viewer = self.viewer.clone().ok_or(Error::NotSignedIn)?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(Error::validation("Please choose a reason"));
        }
        let card = self
            .cards
            .get(index)
            .ok_or_else(|| Error::not_found(format!("feed card {}", index)))?;
        self.backend
            .insert(
                tables::VIDEO_REPORTS,
                json!({ "video_id": card.video.id, "reporter_id": viewer, "reason": reason }),
            )
            .await?;
        info!(video_id = %card.video.id, "video reported");
        Ok(())
    }

    pub fn open_modal(&mut self, modal: Modal, index: usize) -> Option<&FeedCard> {
        let card = self.cards.get(index)?;
        self.modal = Some((modal, index));
        Some(card)
    }

    pub fn modal(&self) -> Option<(Modal, &FeedCard)> {
        let (modal, index) = self.modal?;
        self.cards.get(index).map(|card| (modal, card))
    }

    pub fn close_modal(&mut self) -> Option<Modal> {
        self.modal.take().map(|(modal, _)| modal)
    }

    pub fn share_link(&self, index: usize) -> Option<String> {
        self.cards
            .get(index)
            .map(|card| share_link(&self.options.site_url, &card.video.id))
    }

    /// Merge a pushed video row; cards that stop being approved leave the feed.
    pub fn apply_video_update(&mut self, row: &Value) -> Result<()> {
        let video: SkillVideo = serde_json::from_value(row.clone())?;
        let Some(index) = self.cards.iter().position(|c| c.video.id == video.id) else {
            return Ok(());
        };

        if video.status != VideoStatus::Approved {
            self.remove_card(index);
            return Ok(());
        }
        let card = &mut self.cards[index];
        card.video.likes_count = video.likes_count;
        card.video.views_count = video.views_count;
        card.video.title = video.title;
        card.video.description = video.description;
        Ok(())
    }

    fn remove_card(&mut self, index: usize) {
        self.cards.remove(index);
        self.active = match self.active {
            Some(active) if active == index => None,
            Some(active) if active > index => Some(active - 1),
            other => other,
        };
        self.modal = match self.modal {
            Some((_, i)) if i == index => None,
            Some((m, i)) if i > index => Some((m, i - 1)),
            other => other,
        };
        if self.pending_tap.is_some_and(|p| p.index >= index) {
            self.pending_tap = None;
        }
        if self.cards.is_empty() {
            self.load = FeedLoad::Empty;
        }
    }
}

impl FeedCard {
    fn likes_delta(&mut self, delta: i64) {
        self.video.likes_count = (self.video.likes_count + delta).max(0);
    }
}
