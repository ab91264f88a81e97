//! Postings configuration and the backend factory

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::structures::{GolombPostingList, PForDeltaPostingList, PostingFormat, PostingsList};

/// Default proximity window size
pub const DEFAULT_WINDOW: u32 = 8;

/// Encoding and matching options, loadable from JSON
///
/// ```json
/// { "format": "pfor_delta", "positional": true, "window": 8 }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PostingsConfig {
    /// Encoding backend for new and persisted lists
    pub format: PostingFormat,
    /// Whether lists carry token positions
    pub positional: bool,
    /// Default proximity window size
    pub window: u32,
}

impl Default for PostingsConfig {
    fn default() -> Self {
        Self {
            format: PostingFormat::Golomb,
            positional: true,
            window: DEFAULT_WINDOW,
        }
    }
}

impl PostingsConfig {
    pub fn new(format: PostingFormat, positional: bool) -> Self {
        Self {
            format,
            positional,
            ..Self::default()
        }
    }

    pub fn with_window(mut self, window: u32) -> Self {
        self.window = window;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            return Err(Error::Config("window must be greater than 0".to_string()));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        log::debug!("loading postings config from {}", path.display());
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// An empty list of the configured backend.
    pub fn new_postings_list(&self) -> Box<dyn PostingsList> {
        match self.format {
            PostingFormat::Golomb => Box::new(GolombPostingList::new(self.positional)),
            PostingFormat::PForDelta => Box::new(PForDeltaPostingList::new(self.positional)),
        }
    }

    /// Rebuild a persisted list of the configured backend.
    ///
    /// The collection size is not persisted; set it on the returned list
    /// before reading a list with more than one posting.
    pub fn create_postings_list(&self, bytes: &[u8]) -> Result<Box<dyn PostingsList>> {
        Ok(match self.format {
            PostingFormat::Golomb => Box::new(GolombPostingList::create(bytes, self.positional)?),
            PostingFormat::PForDelta => {
                Box::new(PForDeltaPostingList::create(bytes, self.positional)?)
            }
        })
    }
}
