use monitor_core::{CoreError, TiebaApiError};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error};

const TIEBA_API_BASE: &str = "http://c.tieba.baidu.com";
const CLIENT_VERSION: &str = "12.35.1.0";
const POSTS_PER_PAGE: u32 = 30;

// Tieba's mobile API serializes every numeric field as a string, so the
// wire models keep strings and the conversion into domain types parses.

#[derive(Debug, Clone, Deserialize)]
pub struct PostsResponse {
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_msg: Option<String>,
    pub page: Option<PageData>,
    #[serde(default)]
    pub post_list: Vec<PostData>,
    #[serde(default)]
    pub user_list: Vec<UserData>,
}

impl PostsResponse {
    /// Look up the embedded user record for an author id, if the page
    /// carried one.
    pub fn user(&self, author_id: u64) -> Option<&UserData> {
        self.user_list
            .iter()
            .find(|u| u.id.parse::<u64>().ok() == Some(author_id))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageData {
    #[serde(default)]
    pub current_page: Option<String>,
    pub total_page: String,
}

impl PageData {
    pub fn total_page(&self) -> Result<u32, TiebaApiError> {
        self.total_page
            .trim()
            .parse()
            .map_err(|_| TiebaApiError::InvalidResponse {
                details: format!("unparseable total_page: {:?}", self.total_page),
            })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostData {
    pub id: String,
    pub author_id: String,
    pub time: String,
    #[serde(default)]
    pub content: Vec<ContentFragment>,
}

/// One piece of a post body. Text fragments carry `text`; emoticons,
/// images and at-mentions come through as other fragment types and are
/// skipped when flattening.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentFragment {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserData {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub name_show: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
}

impl UserData {
    /// Display name shown in notifications: nickname first, then the
    /// account name, then the bare id.
    pub fn display_name(&self) -> String {
        self.name_show
            .clone()
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| self.id.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserInfoResponse {
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_msg: Option<String>,
    pub user: Option<UserData>,
}

/// A single reply with its numeric fields parsed out of the wire model.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub pid: u64,
    pub text: String,
    pub author_id: u64,
    pub created_at: i64,
}

impl TryFrom<&PostData> for Post {
    type Error = TiebaApiError;

    fn try_from(data: &PostData) -> Result<Self, Self::Error> {
        let pid = parse_field("post id", &data.id)?;
        let author_id = parse_field("author_id", &data.author_id)?;
        let created_at = parse_field("time", &data.time)?;
        Ok(Self {
            pid,
            text: flatten_content(&data.content),
            author_id,
            created_at,
        })
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, raw: &str) -> Result<T, TiebaApiError> {
    raw.trim()
        .parse()
        .map_err(|_| TiebaApiError::InvalidResponse {
            details: format!("unparseable {field}: {raw:?}"),
        })
}

fn flatten_content(fragments: &[ContentFragment]) -> String {
    fragments
        .iter()
        .filter_map(|f| f.text.as_deref())
        .collect::<Vec<_>>()
        .join("")
}

fn check_api_error(
    error_code: Option<&str>,
    error_msg: Option<&str>,
) -> Result<(), TiebaApiError> {
    match error_code {
        None | Some("0") | Some("") => Ok(()),
        Some(code) => Err(TiebaApiError::ApiRejected {
            code: code.to_string(),
            message: error_msg.unwrap_or("no message").to_string(),
        }),
    }
}

#[derive(Debug)]
pub struct TiebaApiClient {
    http_client: Client,
    bduss: String,
}

impl TiebaApiClient {
    pub fn new(bduss: impl Into<String>) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .user_agent(format!("tieba-monitor/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http_client,
            bduss: bduss.into(),
        })
    }

    async fn post_form(
        &self,
        endpoint: &str,
        form: &[(&str, String)],
    ) -> Result<reqwest::Response, CoreError> {
        let url = format!("{TIEBA_API_BASE}{endpoint}");
        debug!("Making Tieba API request: POST {}", endpoint);

        let response = self
            .http_client
            .post(&url)
            .form(form)
            .send()
            .await
            .map_err(|e| {
                error!("Network error for POST {}: {}", endpoint, e);
                if e.is_timeout() {
                    CoreError::TiebaApi(TiebaApiError::RequestTimeout)
                } else {
                    CoreError::Network(e)
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            error!("Request failed with status {} for {}", status, endpoint);
            return Err(CoreError::TiebaApi(TiebaApiError::ServerError {
                status_code: status.as_u16(),
            }));
        }
        if !status.is_success() {
            error!("Request failed with status {} for {}", status, endpoint);
            return Err(CoreError::TiebaApi(TiebaApiError::InvalidResponse {
                details: format!("unexpected status {status} for {endpoint}"),
            }));
        }

        Ok(response)
    }

    /// Fetch one page of a thread. Page numbers are 1-based; the response
    /// carries the thread's total page count alongside the posts.
    pub async fn get_posts(&self, thread_id: u64, page: u32) -> Result<PostsResponse, CoreError> {
        let form = [
            ("kz", thread_id.to_string()),
            ("pn", page.to_string()),
            ("rn", POSTS_PER_PAGE.to_string()),
            ("BDUSS", self.bduss.clone()),
            ("_client_type", "2".to_string()),
            ("_client_version", CLIENT_VERSION.to_string()),
            // The mini-app surface accepts unsigned requests.
            ("subapp_type", "mini".to_string()),
        ];

        let response = self.post_form("/c/f/pb/page", &form).await?;
        let posts: PostsResponse = response.json().await.map_err(|e| {
            error!("Failed to parse posts page: {}", e);
            CoreError::TiebaApi(TiebaApiError::InvalidResponse {
                details: format!("failed to parse posts for thread {thread_id}"),
            })
        })?;

        check_api_error(posts.error_code.as_deref(), posts.error_msg.as_deref())?;

        debug!(
            "Retrieved {} posts from thread {} page {}",
            posts.post_list.len(),
            thread_id,
            page
        );
        Ok(posts)
    }

    /// Resolve a user's profile by numeric id.
    pub async fn get_user_info(&self, user_id: u64) -> Result<UserData, CoreError> {
        let form = [
            ("uid", user_id.to_string()),
            ("BDUSS", self.bduss.clone()),
            ("_client_type", "2".to_string()),
            ("_client_version", CLIENT_VERSION.to_string()),
            ("subapp_type", "mini".to_string()),
        ];

        let response = self.post_form("/c/u/user/getUserInfo", &form).await?;
        let info: UserInfoResponse = response.json().await.map_err(|e| {
            error!("Failed to parse user info: {}", e);
            CoreError::TiebaApi(TiebaApiError::InvalidResponse {
                details: format!("failed to parse user info for {user_id}"),
            })
        })?;

        check_api_error(info.error_code.as_deref(), info.error_msg.as_deref())?;

        info.user.ok_or_else(|| {
            CoreError::TiebaApi(TiebaApiError::InvalidResponse {
                details: format!("user info response missing user for {user_id}"),
            })
        })
    }
}
