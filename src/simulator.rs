//! Simulated power supply speaking the line protocol over TCP
//!
//! Stands in for the real instrument in tests and in the `psu-sim` binary.
//! Four channels hold a voltage/current setpoint and an output state;
//! measurements report the setpoints and their product while the output is
//! on, and all zero while it is off.
//!
//! One client is served at a time. Later clients are accepted but wait
//! until the current one disconnects.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::device::CHANNEL_COUNT;

/// Measurement latency of the instrument being imitated
pub const DEFAULT_REPLY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct SimChannel {
    voltage: f64,
    current: f64,
    active: bool,
}

impl SimChannel {
    fn measure(&self) -> (f64, f64, f64) {
        if self.active {
            (self.voltage, self.current, self.voltage * self.current)
        } else {
            (0.0, 0.0, 0.0)
        }
    }
}

struct SimulatorInner {
    channels: Mutex<[SimChannel; CHANNEL_COUNT as usize]>,
    received: Mutex<Vec<String>>,
    faulty: Mutex<HashSet<u8>>,
    kick_tx: watch::Sender<u64>,
    closed: AtomicBool,
}

/// Shared simulator state; clones refer to the same device
#[derive(Clone)]
pub struct Simulator {
    inner: Arc<SimulatorInner>,
    reply_delay: Duration,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    pub fn new() -> Self {
        let (kick_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(SimulatorInner {
                channels: Mutex::new([SimChannel::default(); CHANNEL_COUNT as usize]),
                received: Mutex::new(Vec::new()),
                faulty: Mutex::new(HashSet::new()),
                kick_tx,
                closed: AtomicBool::new(false),
            }),
            reply_delay: DEFAULT_REPLY_DELAY,
        }
    }

    /// Delay applied before answering a measurement
    pub fn with_reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = delay;
        self
    }

    /// Every command line received so far, in arrival order
    pub fn received(&self) -> Vec<String> {
        self.inner.received.lock().clone()
    }

    pub fn clear_received(&self) {
        self.inner.received.lock().clear();
    }

    /// Make measurements of `channel` answer `ERR`
    pub fn set_fault(&self, channel: u8, faulty: bool) {
        let mut set = self.inner.faulty.lock();
        if faulty {
            set.insert(channel);
        } else {
            set.remove(&channel);
        }
    }

    /// Close the connection of whichever client is being served
    pub fn drop_clients(&self) {
        self.inner.kick_tx.send_modify(|generation| *generation += 1);
    }

    /// Apply one command line; returns the reply line, if any
    pub fn process(&self, cmd: &str) -> Option<String> {
        match self.apply(cmd) {
            Ok(reply) => reply,
            Err(reason) => {
                debug!("Rejected {:?}: {}", cmd, reason);
                Some("ERR".to_string())
            }
        }
    }

    fn apply(&self, cmd: &str) -> Result<Option<String>, String> {
        for n in 1..=CHANNEL_COUNT {
            let idx = usize::from(n - 1);

            if cmd.starts_with(&format!(":MEASure{}:ALL", n)) {
                if self.inner.faulty.lock().contains(&n) {
                    return Err(format!("channel {} fault injected", n));
                }
                let (v, c, p) = self.inner.channels.lock()[idx].measure();
                return Ok(Some(format!("{:.6}, {:.6}, {:.6}", v, c, p)));
            }
            if cmd.starts_with(&format!(":SOURce{}:CURRent", n)) {
                self.inner.channels.lock()[idx].current = numeric_argument(cmd)?;
                return Ok(None);
            }
            if cmd.starts_with(&format!(":SOURce{}:VOLTage", n)) {
                self.inner.channels.lock()[idx].voltage = numeric_argument(cmd)?;
                return Ok(None);
            }
            if cmd.starts_with(&format!(":OUTPut{}:STATe", n)) {
                match argument(cmd)? {
                    "ON" | "1" => self.inner.channels.lock()[idx].active = true,
                    "OFF" | "0" => self.inner.channels.lock()[idx].active = false,
                    other => debug!("Ignoring output state {:?}", other),
                }
                return Ok(None);
            }
        }
        Ok(Some("unknown cmd".to_string()))
    }

    /// Bind a listener and serve in the background
    pub async fn bind(self, addr: impl ToSocketAddrs) -> io::Result<SimulatorHandle> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Simulated device listening on {}", local_addr);

        let task = tokio::spawn(self.clone().serve(listener));
        Ok(SimulatorHandle {
            simulator: self,
            local_addr,
            task,
        })
    }

    /// Accept clients until the task is dropped
    pub async fn serve(self, listener: TcpListener) {
        let turn = Arc::new(tokio::sync::Mutex::new(()));
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let simulator = self.clone();
                    let turn = Arc::clone(&turn);
                    tokio::spawn(async move {
                        let _turn = turn.lock().await;
                        simulator.handle_client(stream, peer).await;
                    });
                }
                Err(e) => {
                    warn!("Simulator accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn handle_client(&self, stream: TcpStream, peer: SocketAddr) {
        if self.inner.closed.load(Ordering::SeqCst) {
            return;
        }
        debug!("Connected to {}", peer);

        let mut kicked = self.inner.kick_tx.subscribe();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        loop {
            let line = tokio::select! {
                _ = kicked.changed() => {
                    debug!("Dropping client {}", peer);
                    break;
                }
                line = lines.next_line() => line,
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    debug!("Client {} read failed: {}", peer, e);
                    break;
                }
            };

            let cmd = line.trim();
            if cmd.is_empty() {
                continue;
            }
            debug!("Received a cmd: {}", cmd);
            self.inner.received.lock().push(cmd.to_string());

            if cmd.starts_with(":MEASure") && !self.reply_delay.is_zero() {
                tokio::time::sleep(self.reply_delay).await;
            }
            if let Some(reply) = self.process(cmd) {
                let frame = format!("{}\n", reply);
                if write_half.write_all(frame.as_bytes()).await.is_err() {
                    break;
                }
            }
        }
        debug!("The client {} closed the connection", peer);
    }
}

fn argument(cmd: &str) -> Result<&str, String> {
    cmd.split(' ')
        .nth(1)
        .map(str::trim)
        .ok_or_else(|| "missing argument".to_string())
}

fn numeric_argument(cmd: &str) -> Result<f64, String> {
    let arg = argument(cmd)?;
    arg.parse()
        .map_err(|_| format!("not a number: {:?}", arg))
}

/// A running simulator; stops serving when dropped
pub struct SimulatorHandle {
    simulator: Simulator,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl SimulatorHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn simulator(&self) -> &Simulator {
        &self.simulator
    }

    /// Stop accepting and drop the connected client
    pub fn shutdown(&self) {
        self.simulator.inner.closed.store(true, Ordering::SeqCst);
        self.task.abort();
        self.simulator.drop_clients();
    }
}

impl Drop for SimulatorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
