// ─────────────────────────────────────────────────────────────────────────────
//  openshock-autoflasher :: constants  —  fixed network / flash / timing values
// ─────────────────────────────────────────────────────────────────────────────

use std::time::Duration;

// ── Network ──────────────────────────────────────────────────────────────────

pub const BASE_URL: &str = "https://firmware.openshock.org";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Names under which the manifest may list the firmware image.
pub const FIRMWARE_FILE_NAMES: &[&str] = &["firmware.bin", "./firmware.bin"];

// ── ESP32 flash settings ─────────────────────────────────────────────────────

pub const FLASH_BAUD_RATE: u32 = 460_800;
pub const FLASH_MODE:      &str = "dio";
pub const FLASH_FREQ:      &str = "80m";
pub const FLASH_SIZE:      &str = "detect";
pub const FLASH_ADDRESS:   &str = "0x0000";

// ── Post-flash serial session ────────────────────────────────────────────────

pub const SERIAL_BAUD_RATE: u32 = 115_200;
pub const SERIAL_READ_TIMEOUT: Duration = Duration::from_secs(2);

// ── Status display ───────────────────────────────────────────────────────────

pub const BANNER_WIDTH: usize = 60;
pub const DEFAULT_TERMINAL_WIDTH: usize = 80;

// ── Timing ───────────────────────────────────────────────────────────────────

/// Every blocking wait the flasher performs, grouped so tests can zero them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// First poll interval, and the interval after any detection.
    pub poll_initial:     Duration,
    /// Ceiling for the idle poll interval.
    pub poll_max:         Duration,
    /// Amount the interval grows per idle tick once past the threshold.
    pub poll_step:        Duration,
    /// Idle ticks tolerated before the interval starts growing.
    pub poll_threshold:   u32,
    /// Wait between detecting a port and starting to flash it.
    pub device_init:      Duration,
    /// Wait for the device to reboot before opening the serial session.
    pub reboot_settle:    Duration,
    /// Wait after opening the serial session.
    pub serial_stabilize: Duration,
    /// Wait after each post-flash command before reading its reply.
    pub command_reply:    Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll_initial:     Duration::from_millis(500),
            poll_max:         Duration::from_millis(1000),
            poll_step:        Duration::from_millis(100),
            poll_threshold:   10,
            device_init:      Duration::from_secs(1),
            reboot_settle:    Duration::from_secs(2),
            serial_stabilize: Duration::from_millis(500),
            command_reply:    Duration::from_millis(500),
        }
    }
}

impl Timing {
    /// Same polling shape as the default but no real waiting.
    pub fn instant() -> Self {
        Self {
            poll_initial:     Duration::ZERO,
            poll_max:         Duration::ZERO,
            poll_step:        Duration::ZERO,
            device_init:      Duration::ZERO,
            reboot_settle:    Duration::ZERO,
            serial_stabilize: Duration::ZERO,
            command_reply:    Duration::ZERO,
            ..Self::default()
        }
    }
}
