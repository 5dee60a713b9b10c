// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `pw-loopback` processes bridging one node into another, one per column.

use super::connections::COLUMNS;
use super::topology::{poll_blocking, DumpFilter, Topology};
use parking_lot::Mutex;
use std::process::{Child, Command, Stdio};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Time a loopback gets to exit after SIGINT before it is killed.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum LoopbackError {
    #[error("Failed to spawn pw-loopback: {0}")]
    SpawnFailed(#[from] std::io::Error),
    #[error("Loopback column {0} out of range")]
    InvalidColumn(usize),
    #[error("Loopback worker error: {0}")]
    Worker(String),
}

/// A running loopback.
#[derive(Debug)]
pub struct Loopback {
    child: Child,
    pub name: String,
    pub source_serial: u64,
    pub dest_serial: u64,
    /// PipeWire client created by the process, once discovered.
    pub client_id: Option<u32>,
}

impl Loopback {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Interrupt the process, reap it, and kill it if it lingers.
    fn close(mut self) {
        let pid = self.pid();
        info!(
            "Closing loopback '{}' (pid {}, {} -> {}, client {:?})",
            self.name, pid, self.source_serial, self.dest_serial, self.client_id
        );

        match Command::new("kill")
            .args(["-INT", &pid.to_string()])
            .output()
        {
            Ok(output) if output.status.success() => {}
            Ok(output) => {
                debug!(
                    "kill -INT {} failed: {}",
                    pid,
                    String::from_utf8_lossy(&output.stderr)
                );
            }
            Err(e) => debug!("Failed to run kill: {}", e),
        }

        let deadline = Instant::now() + CLOSE_GRACE;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    trace!("Loopback {} exited with {}", pid, status);
                    return;
                }
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(20));
                }
                _ => break,
            }
        }

        warn!("Loopback {} ignored SIGINT, killing", pid);
        if let Err(e) = self.child.kill() {
            debug!("Process kill returned error (may be already dead): {}", e);
        }
        let _ = self.child.wait();
    }
}

/// Arguments for a stereo loopback from `source_serial` into `dest_serial`.
pub fn loopback_args(name: &str, source_serial: u64, dest_serial: u64) -> Vec<String> {
    vec![
        "-n".to_string(),
        name.to_string(),
        "-m".to_string(),
        "[ FL FR ]".to_string(),
        "--capture-props".to_string(),
        format!("target.object={}", source_serial),
        "--playback-props".to_string(),
        format!("target.object={}", dest_serial),
    ]
}

/// Node name used for the loopback on `column` of `instrument`.
pub fn loopback_name(instrument: &str, column: usize) -> String {
    let safe: String = instrument
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    format!("pushpin-loopback.{}.{}", safe, column)
}

/// One loopback slot per routing column.
#[derive(Debug)]
pub struct LoopbackSlots {
    slots: [Option<Loopback>; COLUMNS],
}

/// Loopback slots shared between the app loop and blocking workers.
pub type SharedLoopbacks = Arc<Mutex<LoopbackSlots>>;

impl Default for LoopbackSlots {
    fn default() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }
}

impl LoopbackSlots {
    pub fn shared() -> SharedLoopbacks {
        Arc::new(Mutex::new(Self::default()))
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Replace the occupant of `column` with a new loopback.
    ///
    /// Returns the pid of the spawned process.
    pub fn open(
        &mut self,
        column: usize,
        name: &str,
        source_serial: u64,
        dest_serial: u64,
    ) -> Result<u32, LoopbackError> {
        let slot = self
            .slots
            .get_mut(column)
            .ok_or(LoopbackError::InvalidColumn(column))?;
        if let Some(existing) = slot.take() {
            existing.close();
        }

        let args = loopback_args(name, source_serial, dest_serial);
        info!(
            "Opening loopback '{}' on column {}: {} -> {}",
            name, column, source_serial, dest_serial
        );
        debug!("pw-loopback {}", args.join(" "));

        let child = Command::new("pw-loopback")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        let pid = child.id();
        debug!("pw-loopback spawned with PID: {}", pid);

        *slot = Some(Loopback {
            child,
            name: name.to_string(),
            source_serial,
            dest_serial,
            client_id: None,
        });
        Ok(pid)
    }

    /// Close the loopback on `column`, if any. Returns whether one was open.
    pub fn close(&mut self, column: usize) -> bool {
        match self.slots.get_mut(column).and_then(Option::take) {
            Some(loopback) => {
                loopback.close();
                true
            }
            None => false,
        }
    }

    pub fn close_all(&mut self) {
        let open = self.open_count();
        if open > 0 {
            info!("Closing {} loopback(s)", open);
        }
        for column in 0..COLUMNS {
            self.close(column);
        }
    }

    /// Attach the discovered client id to the loopback started as `pid`.
    pub fn record_client(&mut self, pid: u32, client_id: u32) -> bool {
        for loopback in self.slots.iter_mut().flatten() {
            if loopback.pid() == pid {
                loopback.client_id = Some(client_id);
                return true;
            }
        }
        false
    }
}

impl Drop for LoopbackSlots {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Wait for the PipeWire client of a freshly spawned process.
pub fn discover_client(pid: u32, attempts: u32, interval: Duration) -> Option<u32> {
    let found = poll_blocking(attempts, interval, || {
        Topology::capture(DumpFilter::Client)
            .ok()?
            .client_for_process(pid)
    });
    match found {
        Ok(client_id) => {
            debug!("Loopback pid {} registered client {}", pid, client_id);
            Some(client_id)
        }
        Err(e) => {
            warn!("No PipeWire client for loopback pid {}: {}", pid, e);
            None
        }
    }
}

/// Commands sent from the app to a loopback worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopbackCommand {
    /// Replace the loopback on `column` and wait for its PipeWire client.
    Open {
        column: usize,
        name: String,
        source_serial: u64,
        dest_serial: u64,
    },
    /// Close the loopback on `column`.
    Close { column: usize },
    /// Stop the worker thread.
    Shutdown,
}

/// Events sent from a loopback worker back to the app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopbackEvent {
    Opened {
        column: usize,
        pid: u32,
        client_id: Option<u32>,
    },
    Closed { column: usize },
    Failed { column: usize, message: String },
}

/// Handle to the thread that opens and closes one instrument's loopbacks.
///
/// Spawning `pw-loopback` and waiting for its client can take seconds, so
/// it happens here rather than on the event loop.
pub struct LoopbackWorker {
    cmd_tx: mpsc::Sender<LoopbackCommand>,
    handle: Option<JoinHandle<()>>,
}

impl LoopbackWorker {
    /// Spawn the worker. `on_event` runs on the worker thread.
    pub fn spawn<F>(
        label: &str,
        slots: SharedLoopbacks,
        attempts: u32,
        interval: Duration,
        on_event: F,
    ) -> Result<Self, LoopbackError>
    where
        F: Fn(LoopbackEvent) + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel::<LoopbackCommand>();

        let handle = thread::Builder::new()
            .name(format!("loopback-{}", label))
            .spawn(move || {
                for command in cmd_rx {
                    if command == LoopbackCommand::Shutdown {
                        break;
                    }
                    if let Some(event) = run_command(&slots, command, attempts, interval) {
                        on_event(event);
                    }
                }
                debug!("Loopback worker stopped");
            })
            .map_err(|e| LoopbackError::Worker(e.to_string()))?;

        Ok(Self {
            cmd_tx,
            handle: Some(handle),
        })
    }

    /// Queue a command. Commands run in order.
    pub fn send(&self, cmd: LoopbackCommand) -> Result<(), LoopbackError> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| LoopbackError::Worker("Channel closed".to_string()))
    }
}

impl Drop for LoopbackWorker {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(LoopbackCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_command(
    slots: &SharedLoopbacks,
    command: LoopbackCommand,
    attempts: u32,
    interval: Duration,
) -> Option<LoopbackEvent> {
    match command {
        LoopbackCommand::Open {
            column,
            name,
            source_serial,
            dest_serial,
        } => {
            // The lock is released while waiting for the client.
            let opened = slots.lock().open(column, &name, source_serial, dest_serial);
            let pid = match opened {
                Ok(pid) => pid,
                Err(e) => {
                    return Some(LoopbackEvent::Failed {
                        column,
                        message: e.to_string(),
                    })
                }
            };
            let client_id = discover_client(pid, attempts, interval);
            if let Some(client_id) = client_id {
                slots.lock().record_client(pid, client_id);
            }
            Some(LoopbackEvent::Opened {
                column,
                pid,
                client_id,
            })
        }
        LoopbackCommand::Close { column } => slots
            .lock()
            .close(column)
            .then_some(LoopbackEvent::Closed { column }),
        LoopbackCommand::Shutdown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_args() {
        assert_eq!(
            loopback_args("pushpin-loopback.surge1.0", 500, 812),
            vec![
                "-n",
                "pushpin-loopback.surge1.0",
                "-m",
                "[ FL FR ]",
                "--capture-props",
                "target.object=500",
                "--playback-props",
                "target.object=812",
            ]
        );
    }

    #[test]
    fn test_loopback_name_is_sanitized() {
        assert_eq!(loopback_name("Surge XT 1", 3), "pushpin-loopback.SurgeXT1.3");
    }

    #[test]
    fn test_empty_slots() {
        let mut slots = LoopbackSlots::default();
        assert_eq!(slots.open_count(), 0);
        assert!(!slots.close(0));
        assert!(!slots.close(42));
        assert!(!slots.record_client(1, 2));
        assert!(matches!(
            slots.open(COLUMNS, "x", 1, 2),
            Err(LoopbackError::InvalidColumn(_))
        ));
    }

    #[test]
    fn test_worker_reports_bad_column_and_ignores_idle_close() {
        let (tx, rx) = mpsc::channel();
        let worker = LoopbackWorker::spawn(
            "test",
            LoopbackSlots::shared(),
            1,
            Duration::from_millis(1),
            move |event| {
                let _ = tx.send(event);
            },
        )
        .unwrap();
        worker.send(LoopbackCommand::Close { column: 0 }).unwrap();
        worker
            .send(LoopbackCommand::Open {
                column: COLUMNS,
                name: "pushpin-test".into(),
                source_serial: 1,
                dest_serial: 2,
            })
            .unwrap();

        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(event, LoopbackEvent::Failed { column, .. } if column == COLUMNS));
        drop(worker);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    #[ignore = "requires pw-loopback and a running PipeWire"]
    fn test_open_replaces_occupant() {
        let mut slots = LoopbackSlots::default();
        let first = slots.open(0, "pushpin-test", 1, 2).unwrap();
        let second = slots.open(0, "pushpin-test", 1, 2).unwrap();
        assert_ne!(first, second);
        assert_eq!(slots.open_count(), 1);
        assert!(slots.close(0));
        assert_eq!(slots.open_count(), 0);
    }
}
