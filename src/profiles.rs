//! Provider pages, search and the profile completion meter

use crate::backend::{contains_pattern, Backend, BackendExt, Query};
use crate::error::{Error, Result};
use crate::models::{tables, Profile, ProfileStatus, Rating, Role, SkillVideo, VideoStatus, WorkSample};
use crate::reviews::RatingSummary;

/// Everything the public provider page shows
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPage {
    pub profile: Profile,
    pub videos: Vec<SkillVideo>,
    pub work_samples: Vec<WorkSample>,
    pub ratings: Vec<Rating>,
    pub rating: RatingSummary,
}

/// Load a provider's page as seen by `viewer`
///
/// Other viewers only see approved videos. A private or deactivated profile
/// is only visible to its owner.
pub async fn provider_page(backend: &dyn Backend, provider_id: &str, viewer: Option<&str>) -> Result<ProviderPage> {
    let profile: Profile = backend
        .first_as(&Query::table(tables::PROFILES).eq("id", provider_id))
        .await?
        .ok_or_else(|| Error::not_found(format!("provider {}", provider_id)))?;

    let is_owner = viewer == Some(provider_id);
    if !is_owner && (!profile.is_public || profile.status == ProfileStatus::Deactivated) {
        return Err(Error::not_found(format!("provider {}", provider_id)));
    }

    let mut videos_query = Query::table(tables::VIDEOS)
        .eq("provider_id", provider_id)
        .order("created_at", false);
    if !is_owner {
        videos_query = videos_query.eq("status", VideoStatus::Approved.as_str());
    }
    let videos = backend.select_as(&videos_query).await?;

    let work_samples = backend
        .select_as(
            &Query::table(tables::WORK_SAMPLES)
                .eq("provider_id", provider_id)
                .order("created_at", false),
        )
        .await?;

    let ratings: Vec<Rating> = backend
        .select_as(
            &Query::table(tables::RATINGS)
                .eq("provider_id", provider_id)
                .order("created_at", false),
        )
        .await?;
    let rating = RatingSummary::from_scores(ratings.iter().map(|r| r.rating));

    Ok(ProviderPage {
        profile,
        videos,
        work_samples,
        ratings,
        rating,
    })
}

/// Active public providers whose name, specialty or location contains `term`
pub async fn search_providers(backend: &dyn Backend, term: &str, limit: usize) -> Result<Vec<Profile>> {
    let mut query = Query::table(tables::PROFILES)
        .eq("user_type", Role::Provider.as_str())
        .neq_or_null("is_public", false)
        .neq_or_null("status", "deactivated")
        .order("full_name", true)
        .limit(limit);
    if !term.trim().is_empty() {
        query = query.or_ilike(&["full_name", "specialty", "location"], &contains_pattern(term));
    }
    backend.select_as(&query).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionStep {
    pub key: &'static str,
    pub label: &'static str,
    pub weight: u8,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileCompletion {
    pub steps: Vec<CompletionStep>,
}

impl ProfileCompletion {
    pub fn percent(&self) -> u8 {
        self.steps.iter().filter(|s| s.completed).map(|s| s.weight).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.percent() == 100
    }

    pub fn next_step(&self) -> Option<&CompletionStep> {
        self.steps.iter().find(|s| !s.completed)
    }
}

fn filled(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

pub fn profile_completion(profile: &Profile, videos: usize, work_samples: usize) -> ProfileCompletion {
    let step = |key, label, weight, completed| CompletionStep {
        key,
        label,
        weight,
        completed,
    };
    ProfileCompletion {
        steps: vec![
            step("avatar_url", "Add a professional avatar", 15, filled(&profile.avatar_url)),
            step("bio", "Write a compelling bio", 20, filled(&profile.bio)),
            step("specialty", "Set your primary specialty", 15, filled(&profile.specialty)),
            step("location", "Add your service location", 10, filled(&profile.location)),
            step("experience", "Describe your experience", 10, filled(&profile.experience)),
            step("videos", "Upload your first skill video", 15, videos > 0),
            step("portfolio", "Add at least one portfolio item", 15, work_samples > 0),
        ],
    }
}

/// Count the provider's videos and work samples, then score the profile
pub async fn load_completion(backend: &dyn Backend, profile: &Profile) -> Result<ProfileCompletion> {
    let videos = backend
        .count(&Query::table(tables::VIDEOS).eq("provider_id", profile.id.as_str()))
        .await?;
    let samples = backend
        .count(&Query::table(tables::WORK_SAMPLES).eq("provider_id", profile.id.as_str()))
        .await?;
    Ok(profile_completion(profile, videos, samples))
}
