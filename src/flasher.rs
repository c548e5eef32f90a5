// ─────────────────────────────────────────────────────────────────────────────
//  openshock-autoflasher :: flasher  —  flash orchestrator + run loop
//
//  One session per newly attached port, strictly one at a time:
//
//    Downloading ─► Verifying ─► (Erasing) ─► Writing ─► VerifyingWrite
//                                                 ─► (PostFlash) ─► Succeeded
//
//  Any stage before PostFlash can fail the session.  The image is checked
//  before esptool ever sees it, and the temporary image file is removed on
//  every exit path.  Post-flash command problems are only warnings.
//
//  A failed session never stops the watcher.  It logs, turns red and goes
//  back to waiting for the next board.
// ─────────────────────────────────────────────────────────────────────────────

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::catalog::{FirmwareCatalog, FirmwareImage, HttpClient, UreqClient};
use crate::config::{RunConfig, VersionSource};
use crate::constants::Timing;
use crate::error::{FlashError, Result};
use crate::esptool::{Esptool, FlashStage, FlashTool, ToolOutcome};
use crate::poll::PollBackoff;
use crate::ports::{PortEnumerator, PortWatcher, SystemPorts};
use crate::post_flash::{PostFlashRunner, SerialConnector, SystemSerial};
use crate::styles::{banner, log_line, RunState};

const TEMP_PREFIX: &str = "OpenShock_Firmware_";

/// Where the current (or last) flash session is. After a failure it keeps
/// the stage that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStage {
    #[default]
    Idle,
    Downloading,
    Verifying,
    Erasing,
    Writing,
    VerifyingWrite,
    PostFlash,
    Succeeded,
}

/// The outside world the flasher talks to.
pub struct Backends {
    pub http:   Box<dyn HttpClient>,
    pub ports:  Box<dyn PortEnumerator>,
    pub tool:   Box<dyn FlashTool>,
    pub serial: Box<dyn SerialConnector>,
}

impl Backends {
    /// ureq, serialport and esptool from PATH.
    pub fn system() -> Self {
        Self {
            http:   Box::new(UreqClient::new()),
            ports:  Box::new(SystemPorts),
            tool:   Box::new(Esptool::locate()),
            serial: Box::new(SystemSerial),
        }
    }
}

pub struct AutoFlasher {
    config:  RunConfig,
    catalog: FirmwareCatalog,
    watcher: PortWatcher,
    tool:    Box<dyn FlashTool>,
    serial:  Box<dyn SerialConnector>,
    timing:  Timing,
    state:   RunState,
    stage:   SessionStage,
}

impl AutoFlasher {
    pub fn new(config: RunConfig, backends: Backends, timing: Timing) -> Self {
        Self {
            catalog: FirmwareCatalog::new(&config.base_url, backends.http),
            watcher: PortWatcher::new(backends.ports),
            tool:    backends.tool,
            serial:  backends.serial,
            config,
            timing,
            state:   RunState::Waiting,
            stage:   SessionStage::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn stage(&self) -> SessionStage {
        self.stage
    }

    pub fn set_state(&mut self, state: RunState) {
        self.state = state;
    }

    pub fn log(&self, message: &str) {
        log_line(self.state, message);
    }

    // ─────────────────────────────────────────────────────────────────────────
    //  Startup
    // ─────────────────────────────────────────────────────────────────────────

    /// Resolve the version and check the board exists for it.
    ///
    /// Runs before any port is looked at: a wrong board name should fail
    /// immediately, not after someone plugs a device in.
    pub fn prepare(&mut self) -> Result<String> {
        if let VersionSource::Channel(c) = &self.config.version {
            self.log(&format!("Fetching version from {} channel...", c));
        }
        let version = self.catalog.resolve_version(&self.config.version)?;
        self.log(&format!("Firmware version: {}", version));

        self.log("Fetching available boards...");
        let boards = self.catalog.list_boards(&version)?;
        self.log(&format!("Available boards: {}", boards.join(", ")));

        if !boards.iter().any(|b| *b == self.config.board) {
            return Err(FlashError::Configuration(format!(
                "Board '{}' not found in available boards for version {}\n  Available boards: {}",
                self.config.board,
                version,
                boards.join(", ")
            )));
        }
        Ok(version)
    }

    // ─────────────────────────────────────────────────────────────────────────
    //  Flash session
    // ─────────────────────────────────────────────────────────────────────────

    /// Flash `version` of the configured board onto the device at `port`.
    ///
    /// Leaves the state at `Done` or `Error`.
    pub fn flash_device(&mut self, port: &str, version: &str) -> Result<()> {
        self.set_state(RunState::Flashing);
        self.stage = SessionStage::Idle;
        self.log(&banner());
        self.log(&format!("Starting flash process for {}", self.config.board));
        self.log(&format!("Port: {}", port));
        self.log(&format!("Version: {}", version));
        self.log(&banner());

        match self.run_session(port, version) {
            Ok(()) => {
                self.stage = SessionStage::Succeeded;
                self.set_state(RunState::Done);
                self.log("✓ Flashing complete!");
                self.log(&banner());
                self.log("SUCCESS! Device flashed successfully");
                self.log(&banner());
                Ok(())
            }
            Err(e) => {
                self.set_state(RunState::Error);
                self.log(&format!("✗ Error during flashing: {}", e));
                Err(e)
            }
        }
    }

    fn run_session(&mut self, port: &str, version: &str) -> Result<()> {
        let board = self.config.board.clone();

        self.stage = SessionStage::Downloading;
        self.log(&format!("Downloading firmware for {}...", board));
        let download = self.catalog.fetch_firmware(version, &board)?;

        self.stage = SessionStage::Verifying;
        let image = download.verify()?;
        self.log(&format!("✓ Firmware downloaded and verified ({} bytes)", image.data.len()));

        // Deleted when dropped, whichever way this function returns.
        let firmware = write_temp_image(self.config.temp_dir.as_deref(), &image)?;

        if self.config.erase_flash {
            self.stage = SessionStage::Erasing;
            self.log("Erasing flash...");
            self.run_tool(port, FlashStage::Erase, &firmware)?;
            self.log("✓ Erase complete");
        }

        self.stage = SessionStage::Writing;
        self.log("Flashing firmware...");
        self.run_tool(port, FlashStage::Write, &firmware)?;

        self.stage = SessionStage::VerifyingWrite;
        self.log("Verifying flash...");
        self.run_tool(port, FlashStage::Verify, &firmware)?;
        self.log("✓ Flash verified");

        if !self.config.post_flash_commands.is_empty() {
            self.stage = SessionStage::PostFlash;
            self.execute_post_flash_commands(port);
        }

        Ok(())
    }

    fn run_tool(&self, port: &str, stage: FlashStage, image: &Path) -> Result<()> {
        match self.tool.run(port, stage, image) {
            ToolOutcome::Ok => Ok(()),
            ToolOutcome::Failed { code, output } => Err(FlashError::FlashTool { stage, code, output }),
        }
    }

    /// Never fails the session; problems are logged as warnings.
    fn execute_post_flash_commands(&self, port: &str) {
        let commands = &self.config.post_flash_commands;

        self.log("");
        self.log(&banner());
        self.log(&format!("Executing {} post-flash command(s)...", commands.len()));
        self.log(&banner());

        let runner = PostFlashRunner::new(self.serial.as_ref(), self.timing);
        match runner.run(port, commands, &mut |line| self.log(line)) {
            Ok(_) => {
                self.log("✓ Post-flash commands completed");
                self.log(&banner());
            }
            Err(e) => {
                self.log(&format!("⚠ Warning: {}", e));
                self.log("Continuing anyway...");
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    //  Run loop
    // ─────────────────────────────────────────────────────────────────────────

    /// Watch for devices until `shutdown` is set.
    ///
    /// Returns `Err` only for startup failures; per-device failures turn the
    /// status red and the loop keeps waiting.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        self.set_state(RunState::Waiting);
        self.print_header();

        let version = match self.prepare() {
            Ok(v) => v,
            Err(e) => return Err(self.fatal(e)),
        };

        if let Err(e) = self.watcher.snapshot() {
            return Err(self.fatal(e));
        }

        self.set_state(RunState::Waiting);
        self.log("Waiting for device to be plugged in...");
        self.log("(Press Ctrl+C to exit)");

        let mut backoff = PollBackoff::start(&self.timing);

        while !shutdown.load(Ordering::SeqCst) {
            let new_ports = match self.watcher.poll_new_devices() {
                Ok(p) => p,
                Err(e) => {
                    self.log(&format!("⚠ Warning: {}", e));
                    Vec::new()
                }
            };
            backoff = backoff.step(!new_ports.is_empty(), &self.timing);

            for port in &new_ports {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                self.handle_device(port, &version);
            }

            sleep_unless(backoff.interval, shutdown);
        }

        println!();
        self.log("Exiting...");
        Ok(())
    }

    /// A failed session is reported and left behind; the watcher carries on.
    fn handle_device(&mut self, port: &str, version: &str) {
        self.log(&format!("✓ Device detected on {}", port));

        if !self.config.auto_flash {
            self.log("Auto-flash disabled. Skipping...");
            return;
        }

        thread::sleep(self.timing.device_init);

        if self.flash_device(port, version).is_err() {
            self.log(&format!("Giving up on {}; remove it and plug in the next device", port));
        }

        self.log("");
        self.set_state(RunState::Waiting);
        self.log("Waiting for next device...");
        self.log("(Press Ctrl+C to exit)");
        self.log("");
    }

    fn fatal(&mut self, e: FlashError) -> FlashError {
        self.set_state(RunState::Error);
        self.log(&format!("Fatal error: {}", e));
        e
    }

    fn print_header(&self) {
        self.log("OpenShock Auto-Flasher");
        self.log(&banner());
        match &self.config.version {
            VersionSource::Channel(c)  => self.log(&format!("Channel: {}", c)),
            VersionSource::Explicit(v) => self.log(&format!("Version: {} (explicit)", v)),
        }
        self.log(&format!("Board: {}", self.config.board));
        self.log(&format!("Erase flash: {}", self.config.erase_flash));
        self.log(&format!("Auto-flash: {}", self.config.auto_flash));
        if !self.config.post_flash_commands.is_empty() {
            self.log(&format!("Post-flash commands: {}", self.config.post_flash_commands.len()));
        }
        self.log(&banner());
        self.log("");
    }
}

fn write_temp_image(dir: Option<&Path>, image: &FirmwareImage) -> Result<tempfile::TempPath> {
    let dir = dir.map(Path::to_path_buf).unwrap_or_else(std::env::temp_dir);
    let staged = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(".bin")
        .tempfile_in(&dir)
        .and_then(|mut file| {
            file.write_all(&image.data)?;
            file.flush()?;
            Ok(file.into_temp_path())
        });
    staged.map_err(|source| FlashError::Staging { dir: dir.display().to_string(), source })
}

/// Sleep for `total`, waking early if `flag` gets set.
fn sleep_unless(total: Duration, flag: &AtomicBool) {
    const SLICE: Duration = Duration::from_millis(50);

    let mut left = total;
    while !left.is_zero() && !flag.load(Ordering::SeqCst) {
        let nap = left.min(SLICE);
        thread::sleep(nap);
        left -= nap;
    }
}
