//! Serial session with the CUL transceiver.
//!
//! The transceiver speaks newline-terminated ASCII: `"V"` answers with a
//! version banner, `"X"` with the remaining airtime budget, `"Z…"` lines
//! carry received MAX! frames. One worker thread owns the port; the rest
//! of the process talks to it through the line channels of [`CulLink`].
//!
//! The radio enforces the regulatory 1 % duty cycle. We mirror its
//! remaining budget locally, refuse to transmit below the expected cost
//! of the staged line, and re-query with `"X"` whenever the cached value
//! is stale. Every own transmission (`"Zs…"`) invalidates the cache, as
//! the exact airtime spent is only known to the radio.

use crate::constants::{
    BUDGET_COST_PER_CHAR_MS, DEFAULT_BAUD_RATE, DEFAULT_DEVICE_PATH, PAIR_BUDGET_MS,
    PROBE_REPLY_WAIT, QUEUE_POLL_TIMEOUT, TRANSPORT_POLL_PERIOD, VERSION_PROBE_ATTEMPTS,
};
use crate::error::MoritzError;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serialport::SerialPort;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct CulConfig {
    pub device_path: String,
    pub baud_rate: u32,
}

impl Default for CulConfig {
    fn default() -> Self {
        CulConfig {
            device_path: DEFAULT_DEVICE_PATH.to_owned(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

/// Channel ends and shared budget connecting a consumer to the
/// transport worker.
#[derive(Clone)]
pub struct CulLink {
    /// Complete wire lines to transmit, budget permitting.
    pub send_tx: Sender<String>,
    /// Received `"Z…"` lines, RSSI tail still attached.
    pub frame_rx: Receiver<String>,
    /// Cached remaining airtime in milliseconds, owned by the worker.
    pub budget_ms: Arc<AtomicU32>,
}

impl CulLink {
    /// Whether enough airtime is left to answer a pair request in time.
    pub fn has_send_budget(&self) -> bool {
        self.budget_ms.load(Ordering::Relaxed) >= PAIR_BUDGET_MS
    }
}

/// Running transport worker. Dropping the handle requests a stop; call
/// [`shutdown`](CulHandle::shutdown) to also join the thread.
pub struct CulHandle {
    link: CulLink,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CulHandle {
    pub fn link(&self) -> CulLink {
        self.link.clone()
    }

    pub fn has_send_budget(&self) -> bool {
        self.link.has_send_budget()
    }

    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for CulHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// The transport worker itself. Owns the serial port exclusively.
pub struct CulTransceiver {
    port: Box<dyn SerialPort>,
    config: CulConfig,
    send_rx: Receiver<String>,
    frame_tx: Sender<String>,
    budget_ms: Arc<AtomicU32>,
    stop: Arc<AtomicBool>,
    lines: LineAssembler,
    responses: VecDeque<String>,
    staged: Option<String>,
}

impl CulTransceiver {
    /// Opens the port and starts the worker thread. The radio handshake
    /// runs on the worker; a failed handshake stops the worker and is
    /// reported through the log.
    pub fn spawn(config: CulConfig) -> Result<CulHandle, MoritzError> {
        let port = open_port(&config.device_path, config.baud_rate)?;
        let (send_tx, send_rx) = unbounded();
        let (frame_tx, frame_rx) = unbounded();
        let budget_ms = Arc::new(AtomicU32::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let transceiver = CulTransceiver {
            port,
            config,
            send_rx,
            frame_tx,
            budget_ms: budget_ms.clone(),
            stop: stop.clone(),
            lines: LineAssembler::default(),
            responses: VecDeque::new(),
            staged: None,
        };
        let worker = thread::Builder::new()
            .name("cul-transceiver".into())
            .spawn(move || transceiver.run())?;

        Ok(CulHandle {
            link: CulLink {
                send_tx,
                frame_rx,
                budget_ms,
            },
            stop,
            worker: Some(worker),
        })
    }

    fn run(mut self) {
        if let Err(err) = self.init() {
            error!(%err, "transceiver handshake failed, transport shutting down");
            self.stop.store(true, Ordering::Relaxed);
            return;
        }

        while !self.stop.load(Ordering::Relaxed) {
            if self.budget() == 0 {
                if let Err(err) = self.refresh_budget() {
                    warn!(%err, "budget refresh failed");
                }
            }

            if let Err(err) = self.drain_inbound() {
                warn!(%err, "serial read failed");
            }

            self.pump_outbound();

            thread::sleep(TRANSPORT_POLL_PERIOD);
        }
        info!("transport worker stopped");
    }

    /// Radio handshake: version probe, RSSI reporting on, MAX! frame
    /// reception on, legacy FHT mode off.
    fn init(&mut self) -> Result<(), MoritzError> {
        self.drain_inbound()?;

        let version = self.probe_version()?;
        info!(%version, "CUL reported version");

        self.send_command("X21")?;
        thread::sleep(PROBE_REPLY_WAIT);
        self.send_command("Zr")?;
        thread::sleep(PROBE_REPLY_WAIT);
        self.send_command("T01")?;
        thread::sleep(PROBE_REPLY_WAIT);
        self.drain_inbound()?;
        Ok(())
    }

    fn probe_version(&mut self) -> Result<String, MoritzError> {
        if let Some(version) = self.try_probe_version()? {
            return Ok(version);
        }
        info!("no version from CUL reported, closing and re-opening port");
        self.port = open_port(&self.config.device_path, self.config.baud_rate)?;
        if let Some(version) = self.try_probe_version()? {
            return Ok(version);
        }
        Err(MoritzError::TransceiverInit(
            "no version reply from CUL".into(),
        ))
    }

    fn try_probe_version(&mut self) -> Result<Option<String>, MoritzError> {
        for _ in 0..VERSION_PROBE_ATTEMPTS {
            self.send_command("V")?;
            thread::sleep(PROBE_REPLY_WAIT);
            if let Some(line) = self.read_response()? {
                return Ok(Some(line));
            }
            debug!("no version from CUL yet");
        }
        Ok(None)
    }

    /// Logs and discards every pending non-frame, non-budget line.
    fn drain_inbound(&mut self) -> Result<(), MoritzError> {
        while let Some(line) = self.read_response()? {
            info!(%line, "unhandled response from CUL");
        }
        Ok(())
    }

    /// Reads whatever the port has buffered. Frame lines go to the
    /// receive channel and budget reports update the cache; the first
    /// remaining line, if any, is handed to the caller.
    fn read_response(&mut self) -> Result<Option<String>, MoritzError> {
        let mut buf = [0u8; 256];
        while self.port.bytes_to_read()? > 0 {
            let read = match self.port.read(&mut buf) {
                Ok(0) => break,
                Ok(read) => read,
                Err(ref err) if err.kind() == io::ErrorKind::TimedOut => break,
                Err(err) => return Err(err.into()),
            };
            for &byte in &buf[..read] {
                if let Some(line) = self.lines.push(byte) {
                    debug!(%line, "received");
                    if line.starts_with('Z') {
                        let _ = self.frame_tx.send(line);
                    } else if let Some(budget) = parse_budget_line(&line) {
                        self.set_budget(budget);
                        info!(budget_ms = budget, "airtime budget reported");
                    } else {
                        self.responses.push_back(line);
                    }
                }
            }
        }
        Ok(self.responses.pop_front())
    }

    /// Asks the radio for the remaining budget and polls briefly for the
    /// answer. Gives up after ten polls; the next loop cycle retries.
    fn refresh_budget(&mut self) -> Result<(), MoritzError> {
        self.send_command("X")?;
        for _ in 0..10 {
            self.drain_inbound()?;
            if self.budget() > 0 {
                debug!(budget_ms = self.budget(), "finished fetching budget");
                return Ok(());
            }
            thread::sleep(QUEUE_POLL_TIMEOUT);
        }
        Ok(())
    }

    /// Stages at most one outgoing line and transmits it once the budget
    /// covers its cost. Insufficient budget zeroes the cache so the next
    /// cycle re-queries instead of trusting a stale value.
    fn pump_outbound(&mut self) {
        if self.staged.is_none() {
            if let Ok(line) = self.send_rx.try_recv() {
                debug!(%line, "fetched message from queue");
                self.staged = Some(line);
            }
        }
        let Some(line) = self.staged.take() else {
            return;
        };
        if let Err(err) = self.ensure_budget(&line) {
            debug!(%err, "deferring transmission");
            self.set_budget(0);
            self.staged = Some(line);
            return;
        }
        if let Err(err) = self.send_command(&line) {
            warn!(%err, "serial write failed");
            self.staged = Some(line);
        }
    }

    fn ensure_budget(&self, line: &str) -> Result<(), MoritzError> {
        let needed = BUDGET_COST_PER_CHAR_MS * line.len() as u32;
        let available = self.budget();
        if available < needed {
            return Err(MoritzError::BudgetExhausted { needed, available });
        }
        Ok(())
    }

    /// Writes one command line. A frame transmission invalidates the
    /// budget cache, as the radio's remaining budget just dropped by an
    /// amount only it knows.
    fn send_command(&mut self, command: &str) -> Result<(), MoritzError> {
        if command.starts_with("Zs") {
            self.set_budget(0);
        }
        self.port.write_all(command.as_bytes())?;
        self.port.write_all(b"\r\n")?;
        self.port.flush()?;
        debug!(%command, "sent");
        Ok(())
    }

    fn budget(&self) -> u32 {
        self.budget_ms.load(Ordering::Relaxed)
    }

    fn set_budget(&self, budget_ms: u32) {
        self.budget_ms.store(budget_ms, Ordering::Relaxed);
    }
}

fn open_port(path: &str, baud_rate: u32) -> Result<Box<dyn SerialPort>, MoritzError> {
    let port = serialport::new(path, baud_rate)
        .timeout(Duration::from_millis(50))
        .open()?;
    Ok(port)
}

/// Accumulates serial bytes into `"\r\n"`-terminated lines.
#[derive(Debug, Default)]
struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    fn push(&mut self, byte: u8) -> Option<String> {
        if byte != b'\n' {
            self.pending.push(byte);
            return None;
        }
        if self.pending.last() == Some(&b'\r') {
            self.pending.pop();
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(line)
    }
}

/// Parses a `"21  <n>"` budget report into milliseconds. The radio
/// counts in 10 ms ticks; a reported zero still leaves 1 ms so that an
/// answered query is distinguishable from an unanswered one.
fn parse_budget_line(line: &str) -> Option<u32> {
    let ticks: u32 = line.strip_prefix("21  ")?.trim().parse().ok()?;
    Some((ticks * 10).max(1))
}
