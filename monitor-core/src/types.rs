/// The newest reply ("floor") of a watched thread, with author details
/// already resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestFloor {
    pub pid: u64,
    pub content: String,
    pub author_id: u64,
    pub author_name: String,
    pub author_ip: String,
    /// Creation time in epoch seconds.
    pub created_at: i64,
    pub link: String,
}

/// Deep link into a thread, anchored at a single post.
pub fn floor_link(thread_id: u64, pid: u64) -> String {
    format!("https://tieba.baidu.com/p/{thread_id}?pid={pid}&cid=0#{pid}")
}

/// Optional substring filter over post content. An empty keyword list
/// accepts everything.
#[derive(Debug, Clone, Default)]
pub struct KeywordFilter {
    keywords: Vec<String>,
}

impl KeywordFilter {
    /// Parse a comma-separated keyword list. Entries are trimmed and empty
    /// entries dropped, so `KEYWORDS=","` behaves like no filter at all.
    pub fn parse(raw: Option<&str>) -> Self {
        let keywords = raw
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_owned)
            .collect();
        Self { keywords }
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Whether the given content should trigger a notification: no
    /// keywords means accept everything, otherwise at least one keyword
    /// must appear in the content.
    pub fn matches(&self, content: &str) -> bool {
        self.keywords.is_empty() || self.keywords.iter().any(|k| content.contains(k.as_str()))
    }
}
