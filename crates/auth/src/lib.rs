//! Authentication client for the skillfeed marketplace backend
//!
//! Provides email/password and OAuth sign-in, session retrieval, password
//! reset and update, and a broadcast of auth state transitions so that
//! session-aware state can reload when a user signs in or out.

use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

/// How long before expiry a session is renewed
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Missing session")]
    MissingSession,

    #[error("Sign-up requires email confirmation")]
    ConfirmationRequired,
}

/// Authenticated user as reported by the auth service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub app_metadata: serde_json::Value,
    #[serde(default)]
    pub user_metadata: serde_json::Value,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl User {
    /// A string field from the metadata captured at sign-up.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.user_metadata.get(key).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub token_type: String,
    pub user: User,
}

#[derive(Debug, Clone)]
pub struct AuthOptions {
    /// Renew a stored session shortly before it expires
    pub auto_refresh_token: bool,
    pub persist_session: bool,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            auto_refresh_token: true,
            persist_session: true,
        }
    }
}

/// Supported OAuth providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
    Apple,
    Facebook,
    Github,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Apple => "apple",
            Self::Facebook => "facebook",
            Self::Github => "github",
        }
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct OAuthSignInOptions {
    pub redirect_to: Option<String>,
    pub scopes: Option<String>,
}

/// Options for `sign_up`
#[derive(Debug, Clone, Serialize, Default)]
pub struct SignUpOptions {
    /// Stored as the user's `user_metadata`
    pub data: Option<serde_json::Value>,
    pub redirect_to: Option<String>,
}

/// Auth state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthChangeEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

/// Broadcast to every `on_auth_state_change` receiver
#[derive(Debug, Clone)]
pub struct AuthStateChange {
    pub event: AuthChangeEvent,
    pub session: Option<Session>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(alias = "error_description", alias = "msg")]
    message: Option<String>,
}

/// Auth service client
#[derive(Clone)]
pub struct Auth {
    url: String,
    key: String,
    http_client: Client,
    options: AuthOptions,
    current_session: Arc<RwLock<Option<Session>>>,
    state_change: broadcast::Sender<AuthStateChange>,
    /// Bumped on every store and sign-out; a timer only fires for its own
    refresh_generation: Arc<AtomicU64>,
}

/// Everything a refresh timer needs without keeping the session alive
struct WeakAuth {
    url: String,
    key: String,
    http_client: Client,
    options: AuthOptions,
    current_session: Weak<RwLock<Option<Session>>>,
    state_change: broadcast::Sender<AuthStateChange>,
    refresh_generation: Arc<AtomicU64>,
}

impl WeakAuth {
    fn upgrade(&self) -> Option<Auth> {
        Some(Auth {
            url: self.url.clone(),
            key: self.key.clone(),
            http_client: self.http_client.clone(),
            options: self.options.clone(),
            current_session: self.current_session.upgrade()?,
            state_change: self.state_change.clone(),
            refresh_generation: self.refresh_generation.clone(),
        })
    }
}

impl Auth {
    pub fn new(url: &str, key: &str, http_client: Client, options: AuthOptions) -> Self {
        let (state_change, _) = broadcast::channel(16);
        Self {
            url: url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            http_client,
            options,
            current_session: Arc::new(RwLock::new(None)),
            state_change,
            refresh_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    fn downgrade(&self) -> WeakAuth {
        WeakAuth {
            url: self.url.clone(),
            key: self.key.clone(),
            http_client: self.http_client.clone(),
            options: self.options.clone(),
            current_session: Arc::downgrade(&self.current_session),
            state_change: self.state_change.clone(),
            refresh_generation: self.refresh_generation.clone(),
        }
    }

    fn read_session(&self) -> RwLockReadGuard<'_, Option<Session>> {
        self.current_session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_session(&self) -> RwLockWriteGuard<'_, Option<Session>> {
        self.current_session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Subscribe to auth state transitions
    pub fn on_auth_state_change(&self) -> broadcast::Receiver<AuthStateChange> {
        self.state_change.subscribe()
    }

    fn emit(&self, event: AuthChangeEvent, session: Option<Session>) {
        // No receivers is fine.
        let _ = self.state_change.send(AuthStateChange { event, session });
    }

    fn store_session(&self, session: &Session) {
        if self.options.persist_session {
            *self.write_session() = Some(session.clone());
            self.schedule_refresh(session);
        }
    }

    /// Arm a timer that renews `session` before it expires
    ///
    /// Storing another session or signing out disarms it. Outside a tokio
    /// runtime nothing is scheduled.
    fn schedule_refresh(&self, session: &Session) {
        let generation = self.refresh_generation.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.options.auto_refresh_token {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::debug!("no runtime, session will not be refreshed automatically");
            return;
        };

        let delay = Duration::from_secs((session.expires_in - REFRESH_MARGIN_SECS).max(1) as u64);
        let weak = self.downgrade();
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if weak.refresh_generation.load(Ordering::SeqCst) != generation {
                return;
            }
            let Some(auth) = weak.upgrade() else {
                return;
            };
            log::debug!("refreshing session");
            if let Err(e) = auth.refresh_session().await {
                log::warn!("automatic session refresh failed: {}", e);
            }
        });
    }

    /// Install a session obtained elsewhere (for example an OAuth redirect)
    pub fn set_session(&self, session: Session) {
        self.store_session(&session);
        self.emit(AuthChangeEvent::SignedIn, Some(session));
    }

    /// Current session, if any
    pub fn get_session(&self) -> Option<Session> {
        self.read_session().clone()
    }

    /// Register a new account
    ///
    /// When the project requires email confirmation the service answers with
    /// a bare user and no session; that case is reported as
    /// [`AuthError::ConfirmationRequired`].
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        options: SignUpOptions,
    ) -> Result<Session, AuthError> {
        let mut url = format!("{}/auth/v1/signup", self.url);
        if let Some(redirect_to) = &options.redirect_to {
            url.push_str(&format!("?redirect_to={}", urlencoding::encode(redirect_to)));
        }

        let payload = serde_json::json!({
            "email": email,
            "password": password,
            "data": options.data.unwrap_or_else(|| serde_json::json!({})),
        });

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        let body: serde_json::Value = check(response).await?.json().await?;
        if body.get("access_token").is_none() {
            return Err(AuthError::ConfirmationRequired);
        }
        let session: Session = serde_json::from_value(body)?;

        self.store_session(&session);
        self.emit(AuthChangeEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    /// Sign in with email and password
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let url = format!("{}/auth/v1/token?grant_type=password", self.url);

        let payload = serde_json::json!({
            "email": email,
            "password": password,
        });

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        let session: Session = check(response).await?.json().await?;

        self.store_session(&session);
        self.emit(AuthChangeEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    /// Fetch the user behind the current session
    pub async fn get_user(&self) -> Result<User, AuthError> {
        let session = self.get_session().ok_or(AuthError::MissingSession)?;

        let url = format!("{}/auth/v1/user", self.url);

        let response = self
            .http_client
            .get(&url)
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    pub async fn refresh_session(&self) -> Result<Session, AuthError> {
        let session = self.get_session().ok_or(AuthError::MissingSession)?;

        let url = format!("{}/auth/v1/token?grant_type=refresh_token", self.url);

        let payload = serde_json::json!({
            "refresh_token": session.refresh_token,
        });

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        let new_session: Session = check(response).await?.json().await?;

        self.store_session(&new_session);
        self.emit(AuthChangeEvent::TokenRefreshed, Some(new_session.clone()));
        Ok(new_session)
    }

    /// Sign out; the local session is cleared even when the server call fails
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let session = self.write_session().take();
        self.refresh_generation.fetch_add(1, Ordering::SeqCst);
        self.emit(AuthChangeEvent::SignedOut, None);

        let Some(session) = session else {
            return Ok(());
        };

        let url = format!("{}/auth/v1/logout", self.url);
        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .send()
            .await?;

        check(response).await?;
        Ok(())
    }

    /// Send a password reset email
    pub async fn reset_password_for_email(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), AuthError> {
        let mut url = format!("{}/auth/v1/recover", self.url);
        if let Some(redirect_to) = redirect_to {
            url.push_str(&format!("?redirect_to={}", urlencoding::encode(redirect_to)));
        }

        let payload = serde_json::json!({
            "email": email,
        });

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        check(response).await?;
        Ok(())
    }

    /// Change the signed-in user's password
    pub async fn update_password(&self, new_password: &str) -> Result<User, AuthError> {
        let session = self.get_session().ok_or(AuthError::MissingSession)?;

        let url = format!("{}/auth/v1/user", self.url);

        let response = self
            .http_client
            .put(&url)
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .json(&serde_json::json!({ "password": new_password }))
            .send()
            .await?;

        let user: User = check(response).await?.json().await?;

        let updated = {
            let mut guard = self.write_session();
            if let Some(current) = guard.as_mut() {
                current.user = user.clone();
            }
            guard.clone()
        };
        self.emit(AuthChangeEvent::UserUpdated, updated);
        Ok(user)
    }

    /// URL the user is sent to for an OAuth sign-in
    pub fn get_oauth_sign_in_url(
        &self,
        provider: OAuthProvider,
        options: Option<OAuthSignInOptions>,
    ) -> String {
        let options = options.unwrap_or_default();

        let mut url = format!("{}/auth/v1/authorize?provider={}", self.url, provider.as_str());

        if let Some(redirect_to) = options.redirect_to {
            url.push_str(&format!("&redirect_to={}", urlencoding::encode(&redirect_to)));
        }

        if let Some(scopes) = options.scopes {
            url.push_str(&format!("&scopes={}", urlencoding::encode(&scopes)));
        }

        url
    }
}

async fn check(response: Response) -> Result<Response, AuthError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let error_text = response.text().await?;
    log::warn!("auth request failed with {}: {}", status, error_text);

    let message = serde_json::from_str::<ErrorBody>(&error_text)
        .ok()
        .and_then(|body| body.message)
        .unwrap_or(error_text);

    if status == reqwest::StatusCode::BAD_REQUEST || status == reqwest::StatusCode::UNAUTHORIZED {
        Err(AuthError::AuthenticationError(message))
    } else {
        Err(AuthError::ApiError(message))
    }
}
