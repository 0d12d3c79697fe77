//! Session and profile context
//!
//! Single source of truth for the signed-in user and their profile row.
//! Startup is bounded by the session and profile timeouts in
//! [`ClientOptions`]; when either elapses `loading` still ends so a UI never
//! spins forever.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use skillfeed_auth::{
    Auth, AuthChangeEvent, AuthError, AuthStateChange, OAuthProvider, OAuthSignInOptions, Session,
    SignUpOptions, User,
};
use skillfeed_realtime::RealtimeClient;

use crate::backend::{Backend, BackendExt, Query};
use crate::config::ClientOptions;
use crate::error::{Error, Result};
use crate::models::{tables, Profile, ProfileStatus, Role};
use crate::validation;

/// The auth operations the context depends on
#[async_trait]
pub trait SessionSource: Send + Sync {
    async fn current_session(&self) -> Result<Option<Session>>;

    async fn current_user(&self) -> Result<User>;

    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange>;

    /// `None` when the account still has to confirm its email
    async fn sign_up(&self, email: &str, password: &str, options: SignUpOptions) -> Result<Option<Session>>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session>;

    fn oauth_url(&self, provider: OAuthProvider, redirect_to: Option<&str>) -> String;

    async fn sign_out(&self) -> Result<()>;

    async fn reset_password_for_email(&self, email: &str, redirect_to: Option<&str>) -> Result<()>;

    async fn update_password(&self, password: &str) -> Result<()>;
}

#[async_trait]
impl SessionSource for Auth {
    async fn current_session(&self) -> Result<Option<Session>> {
        Ok(self.get_session())
    }

    async fn current_user(&self) -> Result<User> {
        Ok(self.get_user().await?)
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange> {
        self.on_auth_state_change()
    }

    async fn sign_up(&self, email: &str, password: &str, options: SignUpOptions) -> Result<Option<Session>> {
        match Auth::sign_up(self, email, password, options).await {
            Ok(session) => Ok(Some(session)),
            Err(AuthError::ConfirmationRequired) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        Ok(Auth::sign_in_with_password(self, email, password).await?)
    }

    fn oauth_url(&self, provider: OAuthProvider, redirect_to: Option<&str>) -> String {
        self.get_oauth_sign_in_url(
            provider,
            Some(OAuthSignInOptions {
                redirect_to: redirect_to.map(String::from),
                scopes: None,
            }),
        )
    }

    async fn sign_out(&self) -> Result<()> {
        Ok(Auth::sign_out(self).await?)
    }

    async fn reset_password_for_email(&self, email: &str, redirect_to: Option<&str>) -> Result<()> {
        Ok(Auth::reset_password_for_email(self, email, redirect_to).await?)
    }

    async fn update_password(&self, password: &str) -> Result<()> {
        Auth::update_password(self, password).await?;
        Ok(())
    }
}

/// Anything that must act as the signed-in user, such as the realtime socket
#[async_trait]
pub trait TokenSink: Send + Sync {
    /// `None` after sign-out
    async fn set_token(&self, token: Option<String>) -> Result<()>;
}

#[async_trait]
impl TokenSink for RealtimeClient {
    async fn set_token(&self, token: Option<String>) -> Result<()> {
        Ok(self.set_auth(token).await?)
    }
}

/// What the UI renders from
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub user: Option<User>,
    pub profile: Option<Profile>,
    pub loading: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignUpOutcome {
    SignedIn,
    /// The profile is provisioned with the chosen role on first sign-in.
    ConfirmationRequired,
}

/// Partial profile edit; `None` fields are left untouched
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experience: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
}

struct Inner {
    auth: Arc<dyn SessionSource>,
    backend: Arc<dyn Backend>,
    options: ClientOptions,
    state: RwLock<SessionSnapshot>,
    pending_role: Mutex<Option<Role>>,
    last_seen: Mutex<HashMap<String, DateTime<Utc>>>,
    token_sinks: Mutex<Vec<Arc<dyn TokenSink>>>,
}

/// Signed-in user and profile, reloaded on auth transitions
pub struct SessionContext {
    inner: Arc<Inner>,
}

fn display_name(user: &User) -> String {
    if let Some(name) = user.metadata_str("full_name").filter(|n| !n.trim().is_empty()) {
        return name.to_string();
    }
    user.email
        .as_deref()
        .and_then(|email| email.split('@').next())
        .filter(|local| !local.is_empty())
        .unwrap_or("Signed In User")
        .to_string()
}

impl SessionContext {
    pub fn new(auth: Arc<dyn SessionSource>, backend: Arc<dyn Backend>, options: ClientOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                auth,
                backend,
                options,
                state: RwLock::new(SessionSnapshot {
                    loading: true,
                    ..Default::default()
                }),
                pending_role: Mutex::new(None),
                last_seen: Mutex::new(HashMap::new()),
                token_sinks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Keep `sink` on the current user's access token
    pub fn with_token_sink(self, sink: Arc<dyn TokenSink>) -> Self {
        self.inner
            .token_sinks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(sink);
        self
    }

    async fn publish_token(&self, token: Option<String>) {
        let sinks = self
            .inner
            .token_sinks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        for sink in sinks {
            if let Err(e) = sink.set_token(token.clone()).await {
                warn!(error = %e, "passing the access token on failed");
            }
        }
    }

    /// Adopt a fresh session: token first, then the profile
    async fn adopt(&self, session: &Session) {
        self.write().user = Some(session.user.clone());
        self.publish_token(Some(session.access_token.clone())).await;
        self.load_profile(&session.user).await;
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SessionSnapshot> {
        self.inner.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SessionSnapshot> {
        self.inner.state.write().unwrap_or_else(|p| p.into_inner())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.read().clone()
    }

    pub fn user(&self) -> Option<User> {
        self.read().user.clone()
    }

    pub fn profile(&self) -> Option<Profile> {
        self.read().profile.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.read().loading
    }

    /// The signed-in profile, or [`Error::NotSignedIn`]
    pub fn require_profile(&self) -> Result<Profile> {
        self.profile().ok_or(Error::NotSignedIn)
    }

    /// Fetch the session and load its profile
    ///
    /// Never fails: errors and timeouts are logged and leave the context
    /// signed out. `loading` ends after the session timeout at the latest,
    /// even while a slow profile load is still allowed to finish.
    pub async fn bootstrap(&self) -> SessionSnapshot {
        info!("session bootstrap");
        let load = self.load_session();
        tokio::pin!(load);
        tokio::select! {
            _ = &mut load => {}
            _ = sleep(self.inner.options.session_timeout) => {
                warn!("session bootstrap is slow, no longer reporting loading");
                self.write().loading = false;
                load.await;
            }
        }
        self.snapshot()
    }

    async fn load_session(&self) {
        match timeout(self.inner.options.session_timeout, self.inner.auth.current_session()).await {
            Err(_) => {
                warn!("session bootstrap timed out, continuing signed out");
                self.write().loading = false;
            }
            Ok(Err(e)) => {
                error!(error = %e, "session fetch failed");
                self.write().loading = false;
            }
            Ok(Ok(None)) => {
                debug!("no session");
                let mut state = self.write();
                state.user = None;
                state.profile = None;
                state.loading = false;
            }
            Ok(Ok(Some(session))) => self.adopt(&session).await,
        }
    }

    /// Load, or create, the profile; fetch and creation share one deadline.
    async fn load_profile(&self, user: &User) {
        let loaded = timeout(self.inner.options.profile_timeout, self.fetch_or_provision(user)).await;
        let profile = match loaded {
            Err(_) => {
                warn!(user_id = %user.id, "profile load timed out");
                None
            }
            Ok(Err(e)) => {
                error!(user_id = %user.id, error = %e, "profile load failed");
                None
            }
            Ok(Ok(profile)) => profile,
        };

        let mut state = self.write();
        if profile.is_some() {
            state.profile = profile;
        }
        state.loading = false;
    }

    async fn fetch_or_provision(&self, user: &User) -> Result<Option<Profile>> {
        let query = Query::table(tables::PROFILES).eq("id", user.id.as_str());
        match self.inner.backend.first_as::<Profile>(&query).await? {
            Some(profile) => Ok(Some(profile)),
            None => self.provision(user).await,
        }
    }

    async fn provision(&self, user: &User) -> Result<Option<Profile>> {
        let pending = *self.inner.pending_role.lock().unwrap_or_else(|p| p.into_inner());
        let role = pending
            .or_else(|| {
                user.metadata_str("user_type")
                    .and_then(|t| serde_json::from_value::<Role>(json!(t)).ok())
                    .filter(|r| *r != Role::Admin)
            })
            .unwrap_or_default();

        info!(user_id = %user.id, role = role.as_str(), "creating missing profile");
        self.inner
            .backend
            .upsert(
                tables::PROFILES,
                json!({
                    "id": user.id,
                    "email": user.email,
                    "full_name": display_name(user),
                    "user_type": role,
                }),
                "id",
            )
            .await?;
        *self.inner.pending_role.lock().unwrap_or_else(|p| p.into_inner()) = None;

        self.inner
            .backend
            .first_as::<Profile>(&Query::table(tables::PROFILES).eq("id", user.id.as_str()))
            .await
    }

    /// Register, then create the profile with the chosen role
    pub async fn sign_up(&self, email: &str, password: &str, full_name: &str, role: Role) -> Result<SignUpOutcome> {
        validation::validate_sign_up(email, password, full_name)?;
        if role == Role::Admin {
            return Err(Error::validation("Admin accounts cannot be self-registered"));
        }
        *self.inner.pending_role.lock().unwrap_or_else(|p| p.into_inner()) = Some(role);

        let options = SignUpOptions {
            data: Some(json!({ "full_name": full_name.trim(), "user_type": role })),
            redirect_to: Some(self.inner.options.site_url.clone()),
        };
        let Some(session) = self.inner.auth.sign_up(email, password, options).await? else {
            info!(email, "sign-up awaiting email confirmation");
            return Ok(SignUpOutcome::ConfirmationRequired);
        };

        self.inner
            .backend
            .upsert(
                tables::PROFILES,
                json!({
                    "id": session.user.id,
                    "email": email,
                    "full_name": full_name.trim(),
                    "user_type": role,
                }),
                "id",
            )
            .await?;
        *self.inner.pending_role.lock().unwrap_or_else(|p| p.into_inner()) = None;

        self.adopt(&session).await;
        Ok(SignUpOutcome::SignedIn)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Profile> {
        let session = self.inner.auth.sign_in_with_password(email, password).await?;
        self.adopt(&session).await;
        self.require_profile()
    }

    /// Where to send the browser for an OAuth sign-in
    pub fn oauth_sign_in_url(&self, provider: OAuthProvider) -> String {
        self.inner
            .auth
            .oauth_url(provider, Some(&self.inner.options.site_url))
    }

    /// Local state is cleared even when the server call fails.
    pub async fn sign_out(&self) -> Result<()> {
        let result = self.inner.auth.sign_out().await;
        self.clear();
        self.publish_token(None).await;
        result
    }

    pub async fn reset_password(&self, email: &str) -> Result<()> {
        if !validation::is_valid_email(email) {
            return Err(Error::validation("Please enter a valid email address"));
        }
        let redirect = format!("{}/reset-password", self.inner.options.site_url);
        self.inner.auth.reset_password_for_email(email, Some(&redirect)).await
    }

    pub async fn update_password(&self, password: &str) -> Result<()> {
        let check = validation::check_password(password);
        if !check.is_valid() {
            return Err(Error::validation(check.issues.join(", ")));
        }
        self.inner.auth.update_password(password).await
    }

    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<Profile> {
        let user = self.user().ok_or(Error::NotSignedIn)?;
        if let Some(name) = &update.full_name {
            if !validation::is_valid_full_name(name) {
                return Err(Error::validation(
                    "Name must be at least 2 characters and contain only letters",
                ));
            }
        }
        let patch = serde_json::to_value(&update)?;
        let updated: Vec<Profile> = self
            .inner
            .backend
            .update_as(&Query::table(tables::PROFILES).eq("id", user.id.as_str()), patch)
            .await?;
        let profile = updated
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(format!("profile {}", user.id)))?;
        self.write().profile = Some(profile.clone());
        Ok(profile)
    }

    pub async fn refresh_profile(&self) {
        if let Some(user) = self.user() {
            self.load_profile(&user).await;
        }
    }

    /// Record activity, at most once per throttle window per user.
    ///
    /// Returns whether a write was issued.
    pub async fn touch_last_seen(&self, now: DateTime<Utc>) -> Result<bool> {
        let snapshot = self.snapshot();
        let (Some(user), Some(_)) = (snapshot.user, snapshot.profile) else {
            return Ok(false);
        };
        let window = chrono::Duration::from_std(self.inner.options.last_seen_throttle)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        {
            let last_seen = self.inner.last_seen.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(previous) = last_seen.get(&user.id) {
                if now - *previous <= window {
                    return Ok(false);
                }
            }
        }

        self.inner
            .backend
            .update(
                &Query::table(tables::PROFILES).eq("id", user.id.as_str()),
                json!({ "last_seen_at": now }),
            )
            .await?;
        self.inner
            .last_seen
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(user.id, now);
        Ok(true)
    }

    /// Apply one auth transition
    pub async fn handle_auth_event(&self, change: AuthStateChange) {
        debug!(event = ?change.event, "auth state change");
        if change.event == AuthChangeEvent::PasswordRecovery {
            return;
        }
        match change.session {
            Some(session) => self.adopt(&session).await,
            None => {
                self.clear();
                self.publish_token(None).await;
            }
        }
    }

    /// Follow auth transitions in the background
    ///
    /// The task ends once this context is dropped and the next event arrives,
    /// or when the auth client goes away.
    pub fn watch(&self) -> JoinHandle<()> {
        let mut events = self.inner.auth.subscribe();
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(change) => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        SessionContext { inner }.handle_auth_event(change).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "auth events lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("auth watcher stopped");
        })
    }

    /// Soft delete: the row stays with status `deactivated`.
    pub async fn deactivate(&self) -> Result<()> {
        let user = self.user().ok_or(Error::NotSignedIn)?;
        self.inner
            .backend
            .update(
                &Query::table(tables::PROFILES).eq("id", user.id.as_str()),
                json!({ "status": ProfileStatus::Deactivated }),
            )
            .await?;
        info!(user_id = %user.id, "profile deactivated");
        self.sign_out().await
    }

    fn clear(&self) {
        let mut state = self.write();
        state.user = None;
        state.profile = None;
        state.loading = false;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub fn user(id: &str, email: &str, metadata: serde_json::Value) -> User {
        User {
            id: id.to_string(),
            email: Some(email.to_string()),
            phone: None,
            app_metadata: json!({}),
            user_metadata: metadata,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn session(user: User) -> Session {
        Session {
            access_token: format!("token-{}", user.id),
            refresh_token: "refresh".to_string(),
            expires_in: 3600,
            token_type: "bearer".to_string(),
            user,
        }
    }

    /// Scripted auth service
    pub struct FakeAuth {
        pub session: Mutex<Option<Session>>,
        pub hang: bool,
        pub confirm_email: bool,
        pub events: broadcast::Sender<AuthStateChange>,
    }

    impl FakeAuth {
        pub fn new(session: Option<Session>) -> Self {
            Self {
                session: Mutex::new(session),
                hang: false,
                confirm_email: false,
                events: broadcast::channel(8).0,
            }
        }
    }

    #[async_trait]
    impl SessionSource for FakeAuth {
        async fn current_session(&self) -> Result<Option<Session>> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(self.session.lock().unwrap().clone())
        }

        async fn current_user(&self) -> Result<User> {
            self.session
                .lock()
                .unwrap()
                .as_ref()
                .map(|s| s.user.clone())
                .ok_or(Error::NotSignedIn)
        }

        fn subscribe(&self) -> broadcast::Receiver<AuthStateChange> {
            self.events.subscribe()
        }

        async fn sign_up(&self, email: &str, _password: &str, options: SignUpOptions) -> Result<Option<Session>> {
            if self.confirm_email {
                return Ok(None);
            }
            let session = session(user("new-user", email, options.data.unwrap_or_default()));
            *self.session.lock().unwrap() = Some(session.clone());
            Ok(Some(session))
        }

        async fn sign_in_with_password(&self, email: &str, _password: &str) -> Result<Session> {
            let session = session(user("returning", email, json!({})));
            *self.session.lock().unwrap() = Some(session.clone());
            Ok(session)
        }

        fn oauth_url(&self, provider: OAuthProvider, redirect_to: Option<&str>) -> String {
            format!("https://auth.test/authorize?provider={}&redirect_to={}", provider.as_str(), redirect_to.unwrap_or(""))
        }

        async fn sign_out(&self) -> Result<()> {
            *self.session.lock().unwrap() = None;
            Ok(())
        }

        async fn reset_password_for_email(&self, _email: &str, _redirect_to: Option<&str>) -> Result<()> {
            Ok(())
        }

        async fn update_password(&self, _password: &str) -> Result<()> {
            Ok(())
        }
    }
}
