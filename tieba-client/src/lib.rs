mod api;

pub use api::{
    ContentFragment, PageData, Post, PostData, PostsResponse, TiebaApiClient, UserData,
    UserInfoResponse,
};

use async_trait::async_trait;
use monitor_core::{floor_link, CoreError, FloorSource, LatestFloor};
use tracing::{debug, warn};

/// Thread-level view over the raw API client. Resolves the newest floor of
/// a thread, author details included.
#[derive(Debug)]
pub struct TiebaClient {
    api: TiebaApiClient,
}

impl TiebaClient {
    pub fn new(bduss: impl Into<String>) -> Result<Self, CoreError> {
        Ok(Self {
            api: TiebaApiClient::new(bduss)?,
        })
    }

    /// Resolve the newest reply in a thread.
    ///
    /// Page 1 is fetched first for the total page count, then the last page
    /// for its final post. A thread with no usable posts yields `Ok(None)`;
    /// transport and API failures propagate as errors.
    pub async fn latest_floor(&self, thread_id: u64) -> Result<Option<LatestFloor>, CoreError> {
        let first = self.api.get_posts(thread_id, 1).await?;
        if first.post_list.is_empty() {
            debug!("Thread {} returned no posts", thread_id);
            return Ok(None);
        }
        let Some(page) = first.page.as_ref() else {
            warn!("Thread {} response carried no page info", thread_id);
            return Ok(None);
        };

        let total_pages = page.total_page()?;
        let last_page = if total_pages <= 1 {
            first
        } else {
            self.api.get_posts(thread_id, total_pages).await?
        };

        let Some(raw) = last_page.post_list.last() else {
            debug!("Thread {} last page was empty", thread_id);
            return Ok(None);
        };
        let post = Post::try_from(raw).map_err(CoreError::TiebaApi)?;

        let author_ip = last_page
            .user(post.author_id)
            .and_then(|u| u.ip_address.clone())
            .unwrap_or_default();
        let author = self.api.get_user_info(post.author_id).await?;

        Ok(Some(LatestFloor {
            pid: post.pid,
            content: post.text,
            author_id: post.author_id,
            author_name: author.display_name(),
            author_ip,
            created_at: post.created_at,
            link: floor_link(thread_id, post.pid),
        }))
    }
}

#[async_trait]
impl FloorSource for TiebaClient {
    async fn latest_floor(&self, thread_id: u64) -> Result<Option<LatestFloor>, CoreError> {
        TiebaClient::latest_floor(self, thread_id).await
    }
}
