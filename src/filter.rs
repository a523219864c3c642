use crate::error::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Configuration for deciding which response URLs belong to the data feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedFilterConfig {
    /// Regex patterns for URLs to capture (if empty, all URLs are captured unless excluded)
    #[serde(default)]
    pub include_patterns: Vec<String>,

    /// Regex patterns for URLs to ignore (these take precedence over include patterns)
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

impl Default for FeedFilterConfig {
    fn default() -> Self {
        Self {
            include_patterns: vec![r"/api/".to_string()],
            exclude_patterns: vec![
                // Binary image endpoint
                r"/api/images/direct/".to_string(),
            ],
        }
    }
}

/// URL filter that uses regex patterns to recognize feed responses
#[derive(Debug, Clone)]
pub struct FeedFilter {
    include_regexes: Vec<Regex>,
    exclude_regexes: Vec<Regex>,
}

impl Default for FeedFilter {
    fn default() -> Self {
        Self::new(FeedFilterConfig::default()).expect("Default regex patterns should be valid")
    }
}

impl FeedFilter {
    /// Create a new feed filter from configuration
    pub fn new(config: FeedFilterConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            include_regexes: compile_all(&config.include_patterns)?,
            exclude_regexes: compile_all(&config.exclude_patterns)?,
        })
    }

    /// Determine if a response URL belongs to the data feed
    pub fn matches(&self, url: &str) -> bool {
        // Exclusions take precedence
        if self.exclude_regexes.iter().any(|regex| regex.is_match(url)) {
            return false;
        }

        // If include patterns are specified, at least one must match
        self.include_regexes.is_empty() || self.include_regexes.iter().any(|regex| regex.is_match(url))
    }
}

/// Compile a list of regex patterns, naming the offending one on failure
pub fn compile_all(patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| ConfigError::Pattern {
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}
