// ─────────────────────────────────────────────────────────────────────────────
//  openshock-autoflasher :: esptool  —  external flashing tool boundary
//
//  esptool is treated as a black box: we build its argument list, run it,
//  and read the exit status.  Exit 0 is success, anything else (including
//  esptool not being installed) is a failure of that stage.
// ─────────────────────────────────────────────────────────────────────────────

use std::fmt;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::constants::{FLASH_ADDRESS, FLASH_BAUD_RATE, FLASH_FREQ, FLASH_MODE, FLASH_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashStage {
    Erase,
    Write,
    Verify,
}

impl fmt::Display for FlashStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlashStage::Erase  => "Erase",
            FlashStage::Write  => "Flash",
            FlashStage::Verify => "Verify",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Ok,
    Failed { code: Option<i32>, output: String },
}

pub trait FlashTool {
    /// Run one stage against `port`. `image` is ignored by `Erase`.
    fn run(&self, port: &str, stage: FlashStage, image: &Path) -> ToolOutcome;
}

/// Full esptool argument list for one stage.
pub fn esptool_args(port: &str, stage: FlashStage, image: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--port".into(), port.into(),
        "--baud".into(), FLASH_BAUD_RATE.to_string(),
        "--chip".into(), "auto".into(),
    ];

    let image = image.display().to_string();
    match stage {
        FlashStage::Erase => args.push("erase-flash".into()),
        FlashStage::Write => args.extend([
            "write-flash".into(),
            "--flash-mode".into(), FLASH_MODE.into(),
            "--flash-freq".into(), FLASH_FREQ.into(),
            "--flash-size".into(), FLASH_SIZE.into(),
            FLASH_ADDRESS.into(),
            image,
        ]),
        // Same header flags as the write, so the patched image header compares equal.
        FlashStage::Verify => args.extend([
            "verify-flash".into(),
            "--flash-mode".into(), FLASH_MODE.into(),
            "--flash-freq".into(), FLASH_FREQ.into(),
            "--flash-size".into(), FLASH_SIZE.into(),
            FLASH_ADDRESS.into(),
            image,
        ]),
    }
    args
}

/// esptool found on PATH.
pub struct Esptool {
    program: Option<String>,
}

impl Esptool {
    pub fn locate() -> Self {
        Self { program: find_esptool() }
    }
}

impl FlashTool for Esptool {
    fn run(&self, port: &str, stage: FlashStage, image: &Path) -> ToolOutcome {
        let Some(program) = &self.program else {
            return ToolOutcome::Failed {
                code:   None,
                output: "esptool not found — install with: pip install esptool".into(),
            };
        };

        // stdout is inherited so esptool's own progress stays visible.
        let out = Command::new(program)
            .args(esptool_args(port, stage, image))
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .output();

        match out {
            Ok(o) if o.status.success() => ToolOutcome::Ok,
            Ok(o) => ToolOutcome::Failed {
                code:   o.status.code(),
                output: String::from_utf8_lossy(&o.stderr).trim().to_string(),
            },
            Err(e) => ToolOutcome::Failed { code: None, output: format!("failed to start {}: {}", program, e) },
        }
    }
}

/// First of the esptool entry points that answers `version` cleanly.
fn find_esptool() -> Option<String> {
    const ENTRY_POINTS: [&str; 2] = ["esptool", "esptool.py"];

    ENTRY_POINTS
        .into_iter()
        .find(|program| {
            Command::new(program)
                .arg("version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .is_ok_and(|status| status.success())
        })
        .map(str::to_owned)
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Call {
        pub port:          String,
        pub stage:         FlashStage,
        pub image:         PathBuf,
        /// Image contents at the time of the call, if the file existed.
        pub image_content: Option<Vec<u8>>,
    }

    /// Records every invocation; fails the stages listed in `fail`.
    #[derive(Clone, Default)]
    pub struct RecordingTool {
        pub calls: Arc<Mutex<Vec<Call>>>,
        pub fail:  Vec<FlashStage>,
    }

    impl RecordingTool {
        pub fn failing(stage: FlashStage) -> Self {
            Self { fail: vec![stage], ..Default::default() }
        }

        pub fn stages(&self) -> Vec<FlashStage> {
            self.calls.lock().unwrap().iter().map(|c| c.stage).collect()
        }
    }

    impl FlashTool for RecordingTool {
        fn run(&self, port: &str, stage: FlashStage, image: &Path) -> ToolOutcome {
            self.calls.lock().unwrap().push(Call {
                port:          port.to_owned(),
                stage,
                image:         image.to_path_buf(),
                image_content: std::fs::read(image).ok(),
            });
            if self.fail.contains(&stage) {
                ToolOutcome::Failed { code: Some(2), output: format!("A fatal error occurred during {}", stage) }
            } else {
                ToolOutcome::Ok
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn strs(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn erase_arguments() {
        assert_eq!(
            esptool_args("/dev/ttyUSB0", FlashStage::Erase, Path::new("/tmp/fw.bin")),
            strs(&["--port", "/dev/ttyUSB0", "--baud", "460800", "--chip", "auto", "erase-flash"])
        );
    }

    #[test]
    fn write_arguments() {
        assert_eq!(
            esptool_args("COM3", FlashStage::Write, Path::new("/tmp/fw.bin")),
            strs(&[
                "--port", "COM3", "--baud", "460800", "--chip", "auto",
                "write-flash",
                "--flash-mode", "dio",
                "--flash-freq", "80m",
                "--flash-size", "detect",
                "0x0000", "/tmp/fw.bin",
            ])
        );
    }

    #[test]
    fn verify_arguments() {
        assert_eq!(
            esptool_args("COM3", FlashStage::Verify, Path::new("/tmp/fw.bin")),
            strs(&[
                "--port", "COM3", "--baud", "460800", "--chip", "auto",
                "verify-flash",
                "--flash-mode", "dio",
                "--flash-freq", "80m",
                "--flash-size", "detect",
                "0x0000", "/tmp/fw.bin",
            ])
        );
    }

    #[test]
    fn missing_esptool_fails_the_stage() {
        let tool = Esptool { program: None };
        match tool.run("/dev/ttyUSB0", FlashStage::Erase, Path::new("unused")) {
            ToolOutcome::Failed { code, output } => {
                assert_eq!(code, None);
                assert!(output.contains("esptool not found"));
            }
            ToolOutcome::Ok => panic!("expected failure"),
        }
    }
}
