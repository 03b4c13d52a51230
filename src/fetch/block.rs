use std::fmt;

pub const DEFAULT_BLOCK_KEYWORDS: &[&str] = &[
    "captcha",
    "blocked",
    "security check",
    "robot",
    "automated",
    "suspicious activity",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    Status(u16),
    Keyword(String),
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::Status(code) => write!(f, "status {}", code),
            BlockReason::Keyword(word) => write!(f, "body contains '{}'", word),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockVerdict {
    Ok,
    Blocked(BlockReason),
}

/// Recognizes anti-scraping responses: rate limits, denials and CAPTCHA pages
#[derive(Debug, Clone)]
pub struct BlockDetector {
    keywords: Vec<String>,
}

impl Default for BlockDetector {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_KEYWORDS.iter().map(|k| k.to_string()))
    }
}

impl BlockDetector {
    pub fn new(keywords: impl IntoIterator<Item = String>) -> Self {
        let keywords = keywords
            .into_iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    pub fn classify(&self, status: u16, body: &str) -> BlockVerdict {
        if status == 403 || status == 429 {
            return BlockVerdict::Blocked(BlockReason::Status(status));
        }

        let content = body.to_lowercase();
        match self.keywords.iter().find(|k| content.contains(k.as_str())) {
            Some(word) => BlockVerdict::Blocked(BlockReason::Keyword(word.clone())),
            None => BlockVerdict::Ok,
        }
    }
}
