//! TheTVDB v4 client.
//!
//! Authenticates with `POST /login`, caches the bearer token, and looks up
//! an episode overview plus the first series banner:
//!
//! ```text
//! GET /series/{id}/episodes/default[/{lang}]?season=S&episodeNumber=E
//! GET /series/{id}/artworks?type=1
//! ```
//!
//! A 401 on a lookup drops the cached token so the next attempt logs in
//! again. A 4xx from the login itself means the API key (or PIN) is wrong and
//! is reported as [`ProviderError::Auth`], which is never retried.
//!
//! # Example
//!
//! ```rust,ignore
//! use tvherald::provider::TvdbClient;
//! use std::time::Duration;
//!
//! let tvdb = TvdbClient::new("api-key")
//!     .with_language("eng")
//!     .with_timeout(Duration::from_secs(10));
//! ```

use super::{MetadataProvider, ProviderError};
use crate::event::EpisodeMetadata;
use crate::retry::Transient;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://api4.thetvdb.com/v4";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// TheTVDB artwork type id for series banners
const BANNER_ARTWORK_TYPE: u32 = 1;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

#[derive(Debug, Deserialize)]
struct EpisodesPage {
    #[serde(default)]
    episodes: Vec<EpisodeRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EpisodeRecord {
    season_number: Option<u32>,
    number: Option<u32>,
    overview: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArtworksPage {
    #[serde(default)]
    artworks: Vec<Artwork>,
}

#[derive(Debug, Deserialize)]
struct Artwork {
    image: Option<String>,
}

/// TheTVDB v4 metadata provider.
#[derive(Debug)]
pub struct TvdbClient {
    client: Client,
    base_url: String,
    api_key: String,
    pin: Option<String>,
    language: Option<String>,
    timeout: Duration,
    token: Mutex<Option<String>>,
}

impl TvdbClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            pin: None,
            language: None,
            timeout: DEFAULT_TIMEOUT,
            token: Mutex::new(None),
        }
    }

    /// Point the client at another API root (trailing slash ignored)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Subscriber PIN, required for user-supported API keys
    pub fn with_pin(mut self, pin: impl Into<String>) -> Self {
        self.pin = Some(pin.into());
        self
    }

    /// Fetch overviews translated to this three-letter language code
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ProviderError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                message: body,
            });
        }

        serde_json::from_str(&body).map_err(|e| ProviderError::BadData(e.to_string()))
    }

    /// Return the cached bearer token, logging in first if needed.
    async fn token(&self) -> Result<String, ProviderError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        debug!(base_url = %self.base_url, "Logging in to TheTVDB");

        let mut body = json!({ "apikey": self.api_key });
        if let Some(pin) = &self.pin {
            body["pin"] = json!(pin);
        }

        let response = self
            .client
            .post(self.url("/login"))
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        let login: Envelope<LoginData> = match Self::decode(response).await {
            Ok(login) => login,
            Err(ProviderError::Status { status, message })
                if (400..500).contains(&status) && !matches!(status, 408 | 429) =>
            {
                return Err(ProviderError::Auth(format!("login {}: {}", status, message)));
            }
            Err(e) => return Err(e),
        };
        *cached = Some(login.data.token.clone());
        Ok(login.data.token)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let token = self.token().await?;

        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(token)
            .query(query)
            .timeout(self.timeout)
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("TheTVDB rejected the bearer token, will log in again");
            self.token.lock().await.take();
        }

        Self::decode(response).await
    }

    async fn fetch_overview(
        &self,
        series_id: u64,
        season: u32,
        episode: u32,
    ) -> Result<String, ProviderError> {
        let path = match &self.language {
            Some(lang) => format!("/series/{}/episodes/default/{}", series_id, lang),
            None => format!("/series/{}/episodes/default", series_id),
        };

        let page: Envelope<EpisodesPage> = self
            .get(
                &path,
                &[
                    ("page", "0".to_string()),
                    ("season", season.to_string()),
                    ("episodeNumber", episode.to_string()),
                ],
            )
            .await?;

        page.data
            .episodes
            .into_iter()
            .find(|e| e.season_number == Some(season) && e.number == Some(episode))
            .map(|e| e.overview.unwrap_or_default())
            .ok_or(ProviderError::NotFound {
                series_id,
                season,
                episode,
            })
    }

    async fn fetch_banner(&self, series_id: u64) -> Result<Option<String>, ProviderError> {
        let path = format!("/series/{}/artworks", series_id);
        let page: Envelope<ArtworksPage> = self
            .get(&path, &[("type", BANNER_ARTWORK_TYPE.to_string())])
            .await?;

        // arbitrarily take the first banner
        Ok(page.data.artworks.into_iter().find_map(|a| a.image))
    }
}

#[async_trait]
impl MetadataProvider for TvdbClient {
    fn name(&self) -> &str {
        "tvdb"
    }

    async fn fetch_episode(
        &self,
        series_id: u64,
        season: u32,
        episode: u32,
    ) -> Result<EpisodeMetadata, ProviderError> {
        let overview = self.fetch_overview(series_id, season, episode).await?;

        let banner_url = match self.fetch_banner(series_id).await {
            Ok(banner) => banner,
            Err(e) if e.is_transient() => return Err(e),
            Err(e) => {
                warn!(series_id, error = %e, "No banner available");
                None
            }
        };

        Ok(EpisodeMetadata {
            overview,
            banner_url,
        })
    }
}
