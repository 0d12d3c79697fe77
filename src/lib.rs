//! Skillfeed client library
//!
//! Client-side logic of the skillfeed video service marketplace: session and
//! profile bootstrap, the video feed controller, bookings, chat, reviews,
//! notifications and the admin moderation panel. Persistence, auth, storage,
//! realtime delivery and email are provided by the hosted backend and reached
//! through the `skillfeed-*` crates.

pub mod admin;
pub mod backend;
pub mod bookings;
pub mod chat;
pub mod comments;
pub mod config;
pub mod email;
pub mod error;
pub mod feed;
pub mod logging;
pub mod models;
pub mod notifications;
pub mod optimistic;
pub mod portfolio;
pub mod profiles;
pub mod resync;
pub mod reviews;
pub mod session;
pub mod shell;
pub mod social;
pub mod uploads;
pub mod validation;
pub mod videos;

use reqwest::Client;
use std::sync::Arc;

pub use skillfeed_auth::{Auth, AuthOptions};
pub use skillfeed_functions::FunctionsClient;
pub use skillfeed_postgrest::PostgrestClient;
pub use skillfeed_realtime::RealtimeClient;
pub use skillfeed_storage::StorageClient;

use crate::admin::AdminPanel;
use crate::backend::{Backend, RestBackend};
use crate::bookings::Bookings;
use crate::config::Config;
use crate::email::EmailService;
use crate::error::{Error, Result};
use crate::models::Profile;
use crate::session::SessionContext;
use crate::uploads::Uploader;

/// Entry point wiring every backend surface to one project
pub struct Skillfeed {
    config: Config,
    http_client: Client,
    auth: Auth,
    backend: Arc<RestBackend>,
    realtime: RealtimeClient,
}

impl Skillfeed {
    /// Create a client for the project at `url`
    ///
    /// # Example
    ///
    /// ```
    /// use skillfeed::Skillfeed;
    ///
    /// let client = Skillfeed::new("https://your-project.supabase.co", "your-anon-key").unwrap();
    /// let feed_rows = client.from("skill_videos");
    /// ```
    pub fn new(url: &str, anon_key: &str) -> Result<Self> {
        Self::from_config(Config::new(url, anon_key)?)
    }

    pub fn from_config(config: Config) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.options.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        let base_url = config.base_url();
        let auth = Auth::new(
            &base_url,
            &config.anon_key,
            http_client.clone(),
            AuthOptions {
                auto_refresh_token: true,
                persist_session: config.options.persist_session,
            },
        );
        let backend = Arc::new(
            RestBackend::new(&base_url, &config.anon_key, http_client.clone())
                .with_schema(&config.options.db_schema)
                .with_session(auth.clone()),
        );
        let realtime = RealtimeClient::new(&base_url, &config.anon_key);

        Ok(Self {
            config,
            http_client,
            auth,
            backend,
            realtime,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    /// Row storage shared by every domain service
    pub fn backend(&self) -> Arc<dyn Backend> {
        self.backend.clone()
    }

    /// Raw query builder for one relation, carrying the session token
    pub fn from(&self, table: &str) -> PostgrestClient {
        let client = PostgrestClient::new(
            &self.config.base_url(),
            &self.config.anon_key,
            table,
            self.http_client.clone(),
        );
        match client.clone().with_auth(&self.token()) {
            Ok(authed) => authed,
            Err(_) => client,
        }
    }

    pub fn storage(&self) -> StorageClient {
        StorageClient::new(&self.config.base_url(), &self.config.anon_key, self.http_client.clone())
            .with_auth(&self.token())
    }

    pub fn realtime(&self) -> &RealtimeClient {
        &self.realtime
    }

    pub fn functions(&self) -> FunctionsClient {
        FunctionsClient::new(&self.config.base_url(), &self.config.anon_key, self.http_client.clone())
            .with_auth(&self.token())
    }

    pub fn email(&self) -> EmailService {
        EmailService::new(self.functions())
    }

    /// Media uploads into this project's storage buckets
    pub fn uploader(&self) -> Uploader {
        Uploader::new(Arc::new(self.storage()))
    }

    pub fn bookings(&self) -> Bookings {
        Bookings::new(self.backend())
    }

    /// Moderation panel for an admin profile
    pub fn admin_panel(&self, actor: &Profile) -> Result<AdminPanel> {
        AdminPanel::new(self.backend(), Arc::new(self.email()), actor)
    }

    /// Session and profile context over this client's auth service
    ///
    /// The realtime socket follows the session's access token so that
    /// row-level security applies to pushed rows too.
    pub fn session(&self) -> SessionContext {
        SessionContext::new(Arc::new(self.auth.clone()), self.backend(), self.config.options.clone())
            .with_token_sink(Arc::new(self.realtime.clone()))
    }

    fn token(&self) -> String {
        self.auth
            .get_session()
            .map(|session| session.access_token)
            .unwrap_or_else(|| self.config.anon_key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientOptions;
    use std::time::Duration;

    #[test]
    fn test_client_rejects_bad_config() {
        assert!(Skillfeed::new("not a url", "key").is_err());
        assert!(Skillfeed::new("https://example.supabase.co", "").is_err());
    }

    #[test]
    fn test_client_uses_trimmed_base_url() {
        let config = Config::new("https://example.supabase.co/", "anon")
            .unwrap()
            .with_options(ClientOptions::default().with_request_timeout(Some(Duration::from_secs(3))));
        let client = Skillfeed::from_config(config).unwrap();
        assert_eq!(client.config().base_url(), "https://example.supabase.co");
        assert_eq!(client.from("profiles").table(), "profiles");
        assert_eq!(
            client.storage().from("avatars").get_public_url("u1/a.png"),
            "https://example.supabase.co/storage/v1/object/public/avatars/u1/a.png"
        );
    }

    #[test]
    fn test_session_starts_signed_out() {
        tokio_test::block_on(async {
            let client = Skillfeed::new("https://example.supabase.co", "anon").unwrap();
            let session = client.session();

            let snapshot = session.bootstrap().await;
            assert!(!snapshot.loading);
            assert!(snapshot.user.is_none());
            // Clearing the socket token needs no connection.
            session.sign_out().await.unwrap();
            assert!(client.auth().get_session().is_none());
        });
    }
}
