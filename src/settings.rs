use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

pub const SETTINGS_FILE: &str = "slack-export.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub export: ExportSettings,
    #[serde(default)]
    pub limits: LimitSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ExportSettings {
    pub output: String,
    pub include_files: bool,
    pub include_threads: bool,
    pub official_compat: bool,
    pub continue_on_channel_error: bool,
    pub download_workers: usize,
    pub download_queue: usize,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            output: "slack_export".to_string(),
            include_files: false,
            include_threads: true,
            official_compat: true,
            continue_on_channel_error: false,
            download_workers: 4,
            download_queue: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LimitSettings {
    pub channels_per_request: u16,
    pub messages_per_request: u16,
    pub replies_per_request: u16,
    pub tier2: TierSettings,
    pub tier3: TierSettings,
    pub tier4: TierSettings,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            channels_per_request: 100,
            messages_per_request: 200,
            replies_per_request: 200,
            tier2: TierSettings {
                boost: 20,
                burst: 1,
                retries: 20,
            },
            tier3: TierSettings {
                boost: 120,
                burst: 1,
                retries: 3,
            },
            tier4: TierSettings {
                boost: 0,
                burst: 4,
                retries: 3,
            },
        }
    }
}

/// Token bucket parameters of one tier. `boost` is added to the tier's base
/// requests-per-minute; `retries` bounds the attempts of a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierSettings {
    pub boost: u32,
    pub burst: u32,
    pub retries: u32,
}

impl Default for TierSettings {
    fn default() -> Self {
        Self {
            boost: 0,
            burst: 1,
            retries: 3,
        }
    }
}

impl Settings {
    /// Loads `path`, or the default settings file when `path` is `None`.
    /// A missing default file yields the defaults; a missing explicit file is
    /// an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p, true),
            None => (Path::new(SETTINGS_FILE), false),
        };
        if !explicit && !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| AppError::ReadFile {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| AppError::TomlParse(e.to_string()))
    }
}
