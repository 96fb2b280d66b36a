//! Resolves search text and playlist links to watch-page locators through the YouTube Data API.

use futures::stream::{self, Stream, TryStreamExt};
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::config::CatalogSettings;

/// Pulls a playlist id out of text that is not a parseable link, e.g. a bare `list=PL...`.
static LIST_PARAM_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[?&/])list=([\w\-]+)").unwrap());

/// Errors raised while turning a request into locators.
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("No videos found")]
    NotFound,

    #[error("First search result is not a video")]
    NotAVideo,

    #[error("Invalid playlist URL: {0}")]
    InvalidPlaylist(String),

    #[error("No YouTube API key configured")]
    MissingApiKey,

    #[error("YouTube API request failed: {0}")]
    Api(#[from] reqwest::Error),
}

/// Result type for catalog lookups.
pub type ResolutionResult<T> = Result<T, ResolutionError>;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    kind: String,
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemsResponse {
    #[serde(default)]
    items: Vec<PlaylistItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItem {
    content_details: PlaylistItemDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemDetails {
    video_id: String,
}

/// Where one page of a playlist walk stands.
enum PageCursor {
    First,
    Next(String),
    Done,
}

/// What a play request refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Search(String),
    Playlist(String),
}

impl Request {
    /// Anything carrying a `list=` parameter is treated as a playlist; everything else is searched.
    pub fn classify(input: &str) -> Self {
        let input = input.trim();
        if input.contains("list=") {
            Request::Playlist(input.to_string())
        } else {
            Request::Search(input.to_string())
        }
    }
}

/// Builds the watch-page locator for a video id.
pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

/// Client for the two catalog lookups the bot needs.
#[derive(Clone)]
pub struct YoutubeCatalog {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    page_size: u32,
    search_results: u32,
}

impl YoutubeCatalog {
    pub fn new(settings: &CatalogSettings, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.is_empty()),
            page_size: settings.page_size,
            search_results: settings.search_results,
        }
    }

    fn key(&self) -> ResolutionResult<&str> {
        self.api_key.as_deref().ok_or(ResolutionError::MissingApiKey)
    }

    /// Returns the locator of the first search hit for `query`.
    pub async fn search(&self, query: &str) -> ResolutionResult<String> {
        info!("Searching YouTube for: {}", query);
        let url = format!("{}/youtube/v3/search", self.base_url);
        let max_results = self.search_results.to_string();

        let response: SearchResponse = self
            .client
            .get(&url)
            .query(&[
                ("part", "id,snippet"),
                ("q", query),
                ("maxResults", max_results.as_str()),
                ("key", self.key()?),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let first = response.items.into_iter().next().ok_or(ResolutionError::NotFound)?;
        if first.id.kind != "youtube#video" {
            return Err(ResolutionError::NotAVideo);
        }
        let video_id = first.id.video_id.ok_or(ResolutionError::NotAVideo)?;

        Ok(watch_url(&video_id))
    }

    /// Lazily walks every page of the playlist referenced by `playlist_url`,
    /// yielding locators in order.
    pub fn playlist(
        &self,
        playlist_url: &str,
    ) -> impl Stream<Item = ResolutionResult<String>> + '_ {
        let playlist_id = playlist_id(playlist_url);

        stream::once(async move { playlist_id })
            .map_ok(move |id| self.playlist_pages(id))
            .try_flatten()
    }

    fn playlist_pages(
        &self,
        playlist_id: String,
    ) -> impl Stream<Item = ResolutionResult<String>> + '_ {
        stream::try_unfold(PageCursor::First, move |cursor| {
            let playlist_id = playlist_id.clone();
            async move {
                let page_token = match cursor {
                    PageCursor::Done => return Ok::<_, ResolutionError>(None),
                    PageCursor::First => None,
                    PageCursor::Next(token) => Some(token),
                };

                let page = self.fetch_page(&playlist_id, page_token.as_deref()).await?;
                let next = match page.next_page_token {
                    Some(token) if !token.is_empty() => PageCursor::Next(token),
                    _ => PageCursor::Done,
                };
                let locators: Vec<ResolutionResult<String>> = page
                    .items
                    .into_iter()
                    .map(|item| Ok(watch_url(&item.content_details.video_id)))
                    .collect();

                Ok(Some((stream::iter(locators), next)))
            }
        })
        .try_flatten()
    }

    async fn fetch_page(
        &self,
        playlist_id: &str,
        page_token: Option<&str>,
    ) -> ResolutionResult<PlaylistItemsResponse> {
        debug!("Fetching playlist {} page {:?}", playlist_id, page_token);
        let url = format!("{}/youtube/v3/playlistItems", self.base_url);

        let mut query = vec![
            ("part", "contentDetails".to_string()),
            ("playlistId", playlist_id.to_string()),
            ("maxResults", self.page_size.to_string()),
            ("key", self.key()?.to_string()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let page = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(page)
    }
}

/// Pulls the `list` parameter out of a playlist link.
fn playlist_id(playlist_url: &str) -> ResolutionResult<String> {
    let trimmed = playlist_url.trim();
    let from_query = Url::parse(trimmed).ok().and_then(|parsed| {
        parsed
            .query_pairs()
            .find(|(key, _)| key == "list")
            .map(|(_, value)| value.into_owned())
    });

    from_query
        .or_else(|| {
            LIST_PARAM_REGEX
                .captures(trimmed)
                .map(|caps| caps[1].to_string())
        })
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ResolutionError::InvalidPlaylist(trimmed.to_string()))
}
