use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::models::{Library, MediaItem, Page, Session, User};

/// Token header understood by both Jellyfin and Emby.
const TOKEN_HEADER: &str = "X-Emby-Token";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum JellyfinError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid media server configuration: {0}")]
    InvalidConfig(String),
}

/// The session feed the orchestrator polls. Split out as a trait so tests
/// can script session sequences without a server.
#[async_trait]
pub trait SessionSource: Send + Sync {
    /// Sessions currently playing (or pausing) a video item.
    async fn video_sessions(&self) -> Result<Vec<Session>, JellyfinError>;
}

/// HTTP client carrying the token and client-identification headers on
/// every request.
pub struct JellyfinClient {
    http: reqwest::Client,
    base_url: String,
}

impl JellyfinClient {
    /// # Errors
    ///
    /// Fails if the base URL or token cannot form valid headers.
    pub fn new(base_url: &str, token: &str) -> Result<Self, JellyfinError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(JellyfinError::InvalidConfig("empty base url".into()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            TOKEN_HEADER,
            HeaderValue::from_str(token)
                .map_err(|_| JellyfinError::InvalidConfig("token is not header-safe".into()))?,
        );
        let authorization = format!(
            "MediaBrowser Client=\"wled-ambilight\", Device=\"wled-ambilight\", \
             DeviceId=\"wled-ambilight-001\", Version=\"{}\", Token=\"{token}\"",
            env!("CARGO_PKG_VERSION")
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&authorization)
                .map_err(|_| JellyfinError::InvalidConfig("token is not header-safe".into()))?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self { http, base_url })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, JellyfinError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// `GET /Users`.
    pub async fn users(&self) -> Result<Vec<User>, JellyfinError> {
        self.get_json("/Users", &[]).await
    }

    /// The first configured user acts on behalf of the daemon.
    pub async fn acting_user(&self) -> Result<Option<User>, JellyfinError> {
        Ok(self.users().await?.into_iter().next())
    }

    /// `GET /Users/{id}/Views`.
    pub async fn views(&self, user_id: &str) -> Result<Vec<Library>, JellyfinError> {
        let page: Page<Library> = self.get_json(&format!("/Users/{user_id}/Views"), &[]).await?;
        Ok(page.items)
    }

    /// `GET /Users/{id}/Items` — every video item of one library,
    /// recursively, with the fields the catalog needs.
    pub async fn library_items(
        &self,
        user_id: &str,
        library_id: &str,
    ) -> Result<Vec<MediaItem>, JellyfinError> {
        let page: Page<MediaItem> = self
            .get_json(
                &format!("/Users/{user_id}/Items"),
                &[
                    ("ParentId", library_id),
                    ("Recursive", "true"),
                    ("IncludeItemTypes", "Movie,Episode,Video"),
                    ("Fields", "Path,MediaSources,DateCreated"),
                ],
            )
            .await?;
        Ok(page.items)
    }

    /// `GET /Sessions`.
    pub async fn sessions(&self) -> Result<Vec<Session>, JellyfinError> {
        self.get_json("/Sessions", &[]).await
    }
}

#[async_trait]
impl SessionSource for JellyfinClient {
    async fn video_sessions(&self) -> Result<Vec<Session>, JellyfinError> {
        let sessions = self.sessions().await?;
        Ok(sessions.into_iter().filter(Session::is_video).collect())
    }
}
