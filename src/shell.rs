//! Top-level view state
//!
//! The shell is a small state machine over [`View`] with a stack of modal
//! overlays on top. It holds no data of its own besides the signed-in
//! profile; dashboards are loaded on demand.

use tracing::debug;

use crate::backend::{Backend, BackendExt, Query};
use crate::error::{Error, Result};
use crate::models::{tables, Booking, BookingStatus, Profile, Rating, Role, SkillVideo};
use crate::reviews::{rating_summary, RatingSummary};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    Landing,
    Feed,
    Dashboard,
    Messages,
    Notifications,
    Admin,
    /// Public page of one provider
    Provider(String),
}

/// Overlays opened above the current view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Overlay {
    Booking { provider_id: String },
    Chat { booking_id: String },
    Reviews { provider_id: String },
    UploadVideo,
    Settings,
}

/// What a back action did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Back {
    Closed(Overlay),
    Returned(View),
    /// Nothing left to go back to
    Stay,
}

pub struct Shell {
    profile: Option<Profile>,
    view: View,
    history: Vec<View>,
    overlays: Vec<Overlay>,
}

impl Shell {
    pub fn new(profile: Option<Profile>) -> Self {
        let view = if profile.is_some() { View::Feed } else { View::Landing };
        Self {
            profile,
            view,
            history: Vec::new(),
            overlays: Vec::new(),
        }
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    /// Topmost overlay, if any
    pub fn overlay(&self) -> Option<&Overlay> {
        self.overlays.last()
    }

    /// Track sign-in and sign-out
    pub fn set_profile(&mut self, profile: Option<Profile>) {
        let signed_in = profile.is_some();
        self.profile = profile;
        if !signed_in {
            self.view = View::Landing;
            self.history.clear();
            self.overlays.clear();
        } else if self.view == View::Landing {
            self.view = View::Feed;
        } else if self.view == View::Admin && !self.is_admin() {
            self.view = View::Feed;
        }
    }

    fn is_admin(&self) -> bool {
        self.profile.as_ref().is_some_and(Profile::is_admin)
    }

    /// Where a request for `target` actually lands
    fn resolve(&self, target: View) -> Result<View> {
        if self.profile.is_none() {
            return Ok(View::Landing);
        }
        match target {
            View::Admin if !self.is_admin() => Err(Error::forbidden("admin access required")),
            View::Landing => Ok(View::Feed),
            other => Ok(other),
        }
    }

    /// Switch views; open overlays are dropped
    pub fn navigate(&mut self, target: View) -> Result<&View> {
        let next = self.resolve(target)?;
        if next != self.view {
            debug!(from = ?self.view, to = ?next, "navigate");
            let previous = std::mem::replace(&mut self.view, next);
            if previous != View::Landing {
                self.history.push(previous);
            }
        }
        self.overlays.clear();
        Ok(&self.view)
    }

    pub fn push_modal(&mut self, overlay: Overlay) -> Result<()> {
        if self.profile.is_none() {
            return Err(Error::NotSignedIn);
        }
        self.overlays.push(overlay);
        Ok(())
    }

    /// Close the top overlay, or return to the previous view
    pub fn back(&mut self) -> Back {
        if let Some(overlay) = self.overlays.pop() {
            return Back::Closed(overlay);
        }
        while let Some(previous) = self.history.pop() {
            // Access may have changed since the view was visited.
            if let Ok(view) = self.resolve(previous) {
                if view != self.view {
                    self.view = view.clone();
                    return Back::Returned(view);
                }
            }
        }
        Back::Stay
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BookingCounts {
    pub pending: usize,
    pub confirmed: usize,
    pub completed: usize,
    pub cancelled: usize,
}

impl BookingCounts {
    pub fn tally<'a>(bookings: impl IntoIterator<Item = &'a Booking>) -> Self {
        let mut counts = Self::default();
        for booking in bookings {
            match booking.status {
                BookingStatus::Pending => counts.pending += 1,
                BookingStatus::Confirmed => counts.confirmed += 1,
                BookingStatus::Completed => counts.completed += 1,
                BookingStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.pending + self.confirmed + self.completed + self.cancelled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClientStats {
    pub total_bookings: usize,
    pub completed_bookings: usize,
    pub pending_bookings: usize,
    pub reviews_given: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProviderStats {
    pub videos: usize,
    pub total_views: i64,
    pub total_likes: i64,
    pub bookings: BookingCounts,
    pub rating: RatingSummary,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Dashboard {
    Client(ClientStats),
    Provider(ProviderStats),
    Admin,
}

impl Dashboard {
    pub async fn load(backend: &dyn Backend, profile: &Profile) -> Result<Self> {
        Ok(match profile.user_type {
            Role::Client => Dashboard::Client(client_stats(backend, &profile.id).await?),
            Role::Provider => Dashboard::Provider(provider_stats(backend, &profile.id).await?),
            Role::Admin => Dashboard::Admin,
        })
    }
}

pub async fn client_stats(backend: &dyn Backend, client_id: &str) -> Result<ClientStats> {
    let bookings: Vec<Booking> = backend
        .select_as(&Query::table(tables::BOOKINGS).eq("client_id", client_id))
        .await?;
    let counts = BookingCounts::tally(&bookings);
    let reviews: Vec<Rating> = backend
        .select_as(&Query::table(tables::RATINGS).eq("client_id", client_id))
        .await?;
    Ok(ClientStats {
        total_bookings: counts.total(),
        completed_bookings: counts.completed,
        pending_bookings: counts.pending,
        reviews_given: reviews.len(),
    })
}

pub async fn provider_stats(backend: &dyn Backend, provider_id: &str) -> Result<ProviderStats> {
    let videos: Vec<SkillVideo> = backend
        .select_as(&Query::table(tables::VIDEOS).eq("provider_id", provider_id))
        .await?;
    let bookings: Vec<Booking> = backend
        .select_as(&Query::table(tables::BOOKINGS).eq("provider_id", provider_id))
        .await?;
    Ok(ProviderStats {
        videos: videos.len(),
        total_views: videos.iter().map(|v| v.views_count).sum(),
        total_likes: videos.iter().map(|v| v.likes_count).sum(),
        bookings: BookingCounts::tally(&bookings),
        rating: rating_summary(backend, provider_id).await?,
    })
}
