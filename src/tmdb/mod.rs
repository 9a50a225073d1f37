use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::fmt;
use tracing::debug;

use crate::model::{Availability, MediaKind};
use crate::tmdb::model::WatchProvidersResp;

pub mod model;

const TMDB_API_BASE: &str = "https://api.themoviedb.org/";

/// Source of current availability data for a single title.
///
/// The daily run only ever talks to this trait; tests script it with an
/// in-memory double.
#[async_trait]
pub trait AvailabilityProvider: Send + Sync {
    /// Current availability for (media id, kind) in `region`. A 2xx response
    /// that simply lacks the region is the empty snapshot, not an error.
    async fn fetch_availability(
        &self,
        media_id: i64,
        kind: MediaKind,
        region: &str,
    ) -> Result<Availability>;
}

#[derive(Clone)]
pub struct TmdbClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl fmt::Debug for TmdbClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TmdbClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl TmdbClient {
    pub fn new(api_key: String) -> Self {
        let base_url = Url::parse(TMDB_API_BASE).expect("valid default TMDB URL");
        Self::with_base_url(api_key, base_url)
    }

    pub fn with_base_url(api_key: String, base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("watchlist-notifier/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl AvailabilityProvider for TmdbClient {
    async fn fetch_availability(
        &self,
        media_id: i64,
        kind: MediaKind,
        region: &str,
    ) -> Result<Availability> {
        let endpoint = self
            .base_url
            .join(&format!("3/{}/{}/watch/providers", kind.as_str(), media_id))
            .context("invalid TMDB base URL")?;

        let res = self
            .http
            .get(endpoint)
            .query(&[("api_key", self.api_key.as_str())])
            .send()
            .await
            .context("failed to reach TMDB")?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("tmdb error {}: {}", status, body));
        }

        let mut payload: WatchProvidersResp = res
            .json()
            .await
            .context("invalid TMDB watch/providers JSON")?;

        let availability = payload
            .results
            .remove(region)
            .map(|offers| offers.into_availability())
            .unwrap_or_default();
        debug!(
            media_id,
            kind = kind.as_str(),
            region,
            streaming = availability.streaming.len(),
            "fetched availability"
        );
        Ok(availability)
    }
}
