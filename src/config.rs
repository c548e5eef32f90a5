// ─────────────────────────────────────────────────────────────────────────────
//  openshock-autoflasher :: config
//
//  A run is configured from three layers, highest priority first:
//    1. command-line flags
//    2. an optional TOML file  (--config autoflasher.toml)
//    3. built-in defaults      (constants.rs)
//
//  The merged RunConfig is immutable once the run starts.
// ─────────────────────────────────────────────────────────────────────────────

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::constants::BASE_URL;
use crate::error::{FlashError, Result};

/// Named firmware release track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Stable,
    Beta,
    Develop,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Stable  => "stable",
            Channel::Beta    => "beta",
            Channel::Develop => "develop",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the firmware version comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSource {
    Channel(Channel),
    Explicit(String),
}

impl VersionSource {
    /// An explicit version always wins over the channel.
    pub fn new(channel: Channel, explicit: Option<String>) -> Self {
        match explicit.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty()) {
            Some(v) => VersionSource::Explicit(v),
            None    => VersionSource::Channel(channel),
        }
    }
}

impl fmt::Display for VersionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSource::Channel(c)  => write!(f, "{} channel", c),
            VersionSource::Explicit(v) => write!(f, "version {}", v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub version:             VersionSource,
    pub board:               String,
    pub erase_flash:         bool,
    pub auto_flash:          bool,
    /// Sent in this order after a successful flash.
    pub post_flash_commands: Vec<String>,
    pub base_url:            String,
    /// Where the firmware image is staged for esptool; system temp dir if unset.
    pub temp_dir:            Option<PathBuf>,
}

impl RunConfig {
    pub fn new(board: impl Into<String>) -> Self {
        Self {
            version:             VersionSource::Channel(Channel::Stable),
            board:               board.into(),
            erase_flash:         false,
            auto_flash:          true,
            post_flash_commands: Vec::new(),
            base_url:            BASE_URL.to_owned(),
            temp_dir:            None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Config file
// ─────────────────────────────────────────────────────────────────────────────

/// Contents of the optional TOML config file. Every key is optional.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub channel:          Option<Channel>,
    pub firmware_version: Option<String>,
    pub board:            Option<String>,
    pub erase:            Option<bool>,
    pub auto_flash:       Option<bool>,
    #[serde(default)]
    pub post_flash:       Vec<String>,
    pub base_url:         Option<String>,
    pub temp_dir:         Option<PathBuf>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text).map_err(|reason| FlashError::Config {
            path: path.display().to_string(),
            reason,
        })
    }

    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        toml::from_str(text).map_err(|e| e.message().to_owned())
    }
}

/// Values taken from the command line. `None` / empty means "not given".
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub channel:          Option<Channel>,
    pub firmware_version: Option<String>,
    pub board:            Option<String>,
    pub erase:            bool,
    pub no_auto:          bool,
    pub post_flash:       Vec<String>,
    pub base_url:         Option<String>,
    pub temp_dir:         Option<PathBuf>,
}

/// Merge CLI flags over the config file over defaults.
///
/// Boolean flags can only switch a behaviour on from the CLI (`--erase`,
/// `--no-auto`); the file may set either value. Post-flash commands from the
/// CLI replace the file's list rather than appending to it.
pub fn merge(cli: CliOverrides, file: FileConfig) -> Result<RunConfig> {
    let board = cli.board.or(file.board).ok_or_else(|| {
        FlashError::Configuration("No board given: pass --board or set `board` in the config file".into())
    })?;

    let channel  = cli.channel.or(file.channel).unwrap_or_default();
    let explicit = cli.firmware_version.or(file.firmware_version);

    let post_flash_commands = if cli.post_flash.is_empty() { file.post_flash } else { cli.post_flash };

    Ok(RunConfig {
        version:     VersionSource::new(channel, explicit),
        board,
        erase_flash: cli.erase || file.erase.unwrap_or(false),
        auto_flash:  !cli.no_auto && file.auto_flash.unwrap_or(true),
        post_flash_commands,
        base_url:    cli.base_url.or(file.base_url).unwrap_or_else(|| BASE_URL.to_owned()),
        temp_dir:    cli.temp_dir.or(file.temp_dir),
    })
}
