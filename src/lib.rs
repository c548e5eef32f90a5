// ─────────────────────────────────────────────────────────────────────────────
//  openshock_autoflasher  —  public library API
//
//  Watches for ESP32 boards being plugged in, downloads and verifies the
//  matching OpenShock firmware, flashes it with esptool, and optionally sends
//  configuration commands over serial afterwards.
// ─────────────────────────────────────────────────────────────────────────────

pub mod catalog;
pub mod config;
pub mod constants;
pub mod error;
pub mod esptool;
pub mod flasher;
pub mod poll;
pub mod ports;
pub mod post_flash;
pub mod styles;

pub use catalog::{FirmwareCatalog, HttpClient, UreqClient};
pub use config::{Channel, RunConfig, VersionSource};
pub use constants::Timing;
pub use error::{FlashError, Result};
pub use flasher::{AutoFlasher, Backends, SessionStage};
pub use styles::RunState;
