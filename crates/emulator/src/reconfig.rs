//! Runtime reconfiguration
//!
//! A [`ReconfigWorker`] polls a [`ReconfigSource`] with a bounded wait and
//! applies each message to the shared impairment state while transport is
//! running. Two sources ship with the crate: an in-process queue and a UDP
//! socket carrying bincode-encoded messages.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use chanemu_core::ReconfigMessage;

use crate::impairment::SharedImpairments;
use crate::EmulatorError;

const MAX_DATAGRAM: usize = 1024;

/// Where configuration messages come from.
#[async_trait]
pub trait ReconfigSource: Send {
    /// Waits at most `timeout` for the next message.
    async fn poll(&mut self, timeout: Duration) -> Option<ReconfigMessage>;

    /// Releases the source. Called once by the worker when it exits.
    async fn close(&mut self) {}
}

/// Producer half of an in-process reconfiguration queue.
#[derive(Clone)]
pub struct ReconfigSender {
    tx: mpsc::Sender<ReconfigMessage>,
}

impl ReconfigSender {
    pub async fn send(&self, msg: ReconfigMessage) -> Result<(), EmulatorError> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| EmulatorError::Worker("reconfiguration queue is closed".to_string()))
    }

    pub fn try_send(&self, msg: ReconfigMessage) -> Result<(), EmulatorError> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                EmulatorError::Worker("reconfiguration queue is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                EmulatorError::Worker("reconfiguration queue is closed".to_string())
            }
        })
    }
}

pub struct QueueSource {
    rx: mpsc::Receiver<ReconfigMessage>,
}

/// Bounded in-process queue feeding a [`QueueSource`].
pub fn reconfig_queue(depth: usize) -> (ReconfigSender, QueueSource) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    (ReconfigSender { tx }, QueueSource { rx })
}

#[async_trait]
impl ReconfigSource for QueueSource {
    async fn poll(&mut self, timeout: Duration) -> Option<ReconfigMessage> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(msg)) => Some(msg),
            Ok(None) => {
                // every sender is gone; keep the worker's poll cadence
                tokio::time::sleep(timeout).await;
                None
            }
            Err(_) => None,
        }
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}

/// Receives one bincode-encoded [`ReconfigMessage`] per datagram.
pub struct UdpSource {
    local_name: String,
    peer_name: String,
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl UdpSource {
    pub async fn open<A: ToSocketAddrs>(local_name: &str, local_addr: A, peer_name: &str) -> io::Result<Self> {
        let socket = UdpSocket::bind(local_addr).await?;
        info!(
            "{} listening for configuration from {} on {}",
            local_name,
            peer_name,
            socket.local_addr()?
        );
        Ok(Self {
            local_name: local_name.to_string(),
            peer_name: peer_name.to_string(),
            socket,
            buf: vec![0u8; MAX_DATAGRAM],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl ReconfigSource for UdpSource {
    async fn poll(&mut self, timeout: Duration) -> Option<ReconfigMessage> {
        let (n, from) = match tokio::time::timeout(timeout, self.socket.recv_from(&mut self.buf)).await {
            Ok(Ok(received)) => received,
            Ok(Err(e)) => {
                warn!("{} failed to receive from {}: {}", self.local_name, self.peer_name, e);
                return None;
            }
            Err(_) => return None,
        };
        match ReconfigMessage::from_bytes(&self.buf[..n]) {
            Ok(msg) => Some(msg),
            Err(e) => {
                warn!("{} dropped undecodable {} byte datagram from {}: {}", self.local_name, n, from, e);
                None
            }
        }
    }

    async fn close(&mut self) {
        debug!("{} closing configuration socket", self.local_name);
    }
}

/// Applies one message. `last_snr` is the SNR this worker applied last, so
/// repeating an unchanged SNR does not touch the shared state.
pub async fn apply_message(state: &SharedImpairments, msg: &ReconfigMessage, last_snr: &mut Option<f32>) {
    let mut state = state.lock().await;

    if msg.enable_simple_awgn {
        state.set_simple_awgn(true);
        if *last_snr != Some(msg.snr_db) {
            state.set_snr(msg.snr_db);
            *last_snr = Some(msg.snr_db);
            info!("Simple AWGN enabled with SNR {:.2} dB", msg.snr_db);
        }
    }

    if msg.enable_impairment_chain {
        state.set_impairment_chain(true);
        info!("Impairment chain enabled");
    }

    if let Some(carrier_offset_hz) = msg.carrier_offset_hz {
        if state.settings().carrier_offset_hz != carrier_offset_hz {
            state.set_carrier_offset(carrier_offset_hz);
            info!("Carrier offset set to {} Hz", carrier_offset_hz);
        }
    }
}

/// Background task applying configuration messages to the shared state.
pub struct ReconfigWorker {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ReconfigWorker {
    /// Spawns the worker. Must be called from within a tokio runtime.
    pub fn start(mut source: Box<dyn ReconfigSource>, state: SharedImpairments, poll_timeout: Duration) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();

        let handle = tokio::spawn(async move {
            info!("Reconfiguration worker started");
            let mut last_snr = None;
            let mut applied = 0u64;
            while running_clone.load(Ordering::Acquire) {
                let Some(msg) = source.poll(poll_timeout).await else {
                    continue;
                };
                if !running_clone.load(Ordering::Acquire) {
                    debug!("Dropping configuration received during shutdown: {:?}", msg);
                    break;
                }
                apply_message(&state, &msg, &mut last_snr).await;
                applied += 1;
            }
            source.close().await;
            info!("Reconfiguration worker stopped after {} messages", applied);
        });

        Self {
            running,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Clears the running flag and waits for the task to exit, which takes
    /// at most one poll interval.
    pub async fn stop(mut self) -> Result<(), EmulatorError> {
        self.running.store(false, Ordering::Release);
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        handle.await.map_err(|e| {
            error!("Reconfiguration worker failed to join: {}", e);
            EmulatorError::Worker(e.to_string())
        })
    }
}

impl Drop for ReconfigWorker {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}
