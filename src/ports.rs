// ─────────────────────────────────────────────────────────────────────────────
//  openshock-autoflasher :: ports  —  serial port watcher
//
//  Each poll takes a fresh snapshot of the attached serial devices and diffs
//  it against the previous one.  The known set is always replaced by the new
//  snapshot, so a port that vanishes and comes back is reported again while a
//  port that stays attached is reported only once.
// ─────────────────────────────────────────────────────────────────────────────

use std::collections::BTreeSet;

use crate::error::{FlashError, Result};

pub trait PortEnumerator {
    fn list(&self) -> Result<Vec<String>>;
}

/// System serial ports via the `serialport` crate.
pub struct SystemPorts;

impl PortEnumerator for SystemPorts {
    fn list(&self) -> Result<Vec<String>> {
        let ports = serialport::available_ports().map_err(|e| FlashError::Enumeration(e.to_string()))?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }
}

pub struct PortWatcher {
    enumerator: Box<dyn PortEnumerator>,
    known:      BTreeSet<String>,
}

impl PortWatcher {
    pub fn new(enumerator: Box<dyn PortEnumerator>) -> Self {
        Self { enumerator, known: BTreeSet::new() }
    }

    /// Record what is attached right now without reporting any of it.
    pub fn snapshot(&mut self) -> Result<()> {
        self.known = self.enumerator.list()?.into_iter().collect();
        Ok(())
    }

    /// Ports attached since the previous poll, in sorted order.
    ///
    /// On an enumeration error the known set is left alone and the error is
    /// returned; callers treat it as "nothing new this tick".
    pub fn poll_new_devices(&mut self) -> Result<Vec<String>> {
        let current: BTreeSet<String> = self.enumerator.list()?.into_iter().collect();
        let new_ports = current.difference(&self.known).cloned().collect();
        self.known = current;
        Ok(new_ports)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replays scripted snapshots; repeats the last one when the script runs out.
    /// `None` entries simulate an enumeration failure.
    #[derive(Clone, Default)]
    pub struct ScriptedPorts {
        script: Arc<Mutex<VecDeque<Option<Vec<String>>>>>,
        last:   Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedPorts {
        pub fn then(self, ports: &[&str]) -> Self {
            self.script.lock().unwrap().push_back(Some(ports.iter().map(|p| p.to_string()).collect()));
            self
        }

        pub fn then_fail(self) -> Self {
            self.script.lock().unwrap().push_back(None);
            self
        }
    }

    impl PortEnumerator for ScriptedPorts {
        fn list(&self) -> Result<Vec<String>> {
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Some(ports)) => {
                    *self.last.lock().unwrap() = ports.clone();
                    Ok(ports)
                }
                Some(None) => Err(FlashError::Enumeration("device list unavailable".into())),
                None => Ok(self.last.lock().unwrap().clone()),
            }
        }
    }
}
