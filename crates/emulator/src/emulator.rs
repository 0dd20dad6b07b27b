//! The channel emulator
//!
//! [`ChannelEmulator`] owns one channel per radio link, the shared
//! impairment state and the reconfiguration worker. All operations take
//! `&self`, so one emulator can be shared between a transmitting task and a
//! receiving task. The read and write sides of a channel are locked
//! separately and never wait on each other.

use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{watch, Mutex};

use chanemu_core::{symbol_size, Burst, ChannelId, Sample};

use crate::applicator::{Applicator, AppliedSnr};
use crate::chain::{BasebandChain, CarrierOffsetCorrector, ImpairmentChain, PhaseRotator};
use crate::framing::{ReceiveState, SampleFramer};
use crate::impairment::{ImpairmentSettings, ImpairmentState, SharedImpairments};
use crate::psd::{estimate_psd, write_psd_script};
use crate::reconfig::{reconfig_queue, ReconfigSender, ReconfigSource, ReconfigWorker};
use crate::stream::{ChannelStream, ChannelWriter};
use crate::{EmulatorConfig, EmulatorError};

/// Implementations the emulator delegates to.
pub struct Collaborators {
    pub chain: Box<dyn ImpairmentChain>,
    pub corrector: Box<dyn CarrierOffsetCorrector>,
    /// `None` runs the worker on an in-process queue, reachable through
    /// [`ChannelEmulator::reconfig_sender`].
    pub reconfig: Option<Box<dyn ReconfigSource>>,
}

impl Collaborators {
    pub fn new(chain: Box<dyn ImpairmentChain>, corrector: Box<dyn CarrierOffsetCorrector>) -> Self {
        Self {
            chain,
            corrector,
            reconfig: None,
        }
    }

    /// Default chain and corrector, with the chain's noise drawn from `seed`.
    pub fn seeded(seed: Option<u64>) -> Self {
        Self::new(Box::new(BasebandChain::new(seed)), Box::new(PhaseRotator::new(0)))
    }

    pub fn with_reconfig(mut self, source: Box<dyn ReconfigSource>) -> Self {
        self.reconfig = Some(source);
        self
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::seeded(None)
    }
}

struct RxSide {
    state: ReceiveState,
    rng: StdRng,
}

struct TxSide {
    writer: ChannelWriter,
    rng: StdRng,
    applied: Option<AppliedSnr>,
}

struct Channel {
    rx: Mutex<RxSide>,
    tx: Mutex<TxSide>,
}

pub struct ChannelEmulator {
    config: EmulatorConfig,
    channels: Vec<Channel>,
    framer: SampleFramer,
    applicator: Applicator,
    impairments: SharedImpairments,
    worker: Mutex<Option<ReconfigWorker>>,
    reconfig_sender: Option<ReconfigSender>,
    closing: watch::Sender<bool>,
}

impl ChannelEmulator {
    /// Creates and opens the named pipe of every channel and starts the
    /// reconfiguration worker. Must be called from within a tokio runtime.
    pub fn initialize(config: EmulatorConfig, collaborators: Collaborators) -> Result<Self, EmulatorError> {
        let fft_size = symbol_size(config.nof_prb).ok_or(EmulatorError::UnsupportedBandwidth(config.nof_prb))?;

        let mut streams = Vec::with_capacity(config.nof_channels);
        for id in 0..config.nof_channels {
            let stream = ChannelStream::open(&config.pipe_base, id, config.pipe_size()).map_err(|e| {
                error!("Failed to initialize channel {}: {}", id, e);
                e
            })?;
            streams.push(stream);
        }

        Ok(Self::assemble(config, fft_size, streams, collaborators))
    }

    /// Builds an emulator over already opened streams, one per channel in
    /// index order. `config.nof_channels` is taken from `streams`.
    pub fn with_streams(
        mut config: EmulatorConfig,
        streams: Vec<ChannelStream>,
        collaborators: Collaborators,
    ) -> Result<Self, EmulatorError> {
        let fft_size = symbol_size(config.nof_prb).ok_or(EmulatorError::UnsupportedBandwidth(config.nof_prb))?;
        config.nof_channels = streams.len();
        Ok(Self::assemble(config, fft_size, streams, collaborators))
    }

    fn assemble(
        config: EmulatorConfig,
        fft_size: usize,
        streams: Vec<ChannelStream>,
        collaborators: Collaborators,
    ) -> Self {
        let Collaborators {
            chain,
            corrector,
            reconfig,
        } = collaborators;
        let impairments = ImpairmentState::new(chain, corrector, fft_size, config.subframe_length).into_shared();

        let channels = streams
            .into_iter()
            .enumerate()
            .map(|(id, stream)| {
                let (reader, writer) = stream.into_parts();
                Channel {
                    rx: Mutex::new(RxSide {
                        state: ReceiveState::new(reader),
                        rng: channel_rng(config.seed, 2 * id as u64),
                    }),
                    tx: Mutex::new(TxSide {
                        writer,
                        rng: channel_rng(config.seed, 2 * id as u64 + 1),
                        applied: None,
                    }),
                }
            })
            .collect::<Vec<_>>();

        let (source, reconfig_sender) = match reconfig {
            Some(source) => (source, None),
            None => {
                let (sender, source) = reconfig_queue(config.reconfig_queue_depth);
                (Box::new(source) as Box<dyn ReconfigSource>, Some(sender))
            }
        };
        let worker = ReconfigWorker::start(source, impairments.clone(), config.reconfig_poll);

        info!(
            "Channel emulator up with {} channels, subframe length {}, FFT size {}",
            channels.len(),
            config.subframe_length,
            fft_size
        );

        Self {
            framer: SampleFramer::new(config.padding.clone()),
            applicator: Applicator::new(impairments.clone()),
            config,
            channels,
            impairments,
            worker: Mutex::new(Some(worker)),
            reconfig_sender,
            closing: watch::Sender::new(false),
        }
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    pub fn nof_channels(&self) -> usize {
        self.channels.len()
    }

    /// Producer for the built-in reconfiguration queue. `None` when the
    /// emulator was given its own [`ReconfigSource`].
    pub fn reconfig_sender(&self) -> Option<ReconfigSender> {
        self.reconfig_sender.clone()
    }

    fn channel(&self, channel_id: ChannelId) -> Result<&Channel, EmulatorError> {
        self.channels
            .get(channel_id)
            .ok_or(EmulatorError::UnknownChannel(channel_id))
    }

    /// Transmits a burst on `channel_id`.
    ///
    /// On start of burst in simple AWGN mode the burst's power sets the
    /// noise variance (once per SNR). Returns the samples written, padding
    /// included. A send blocked on a full pipe when [`shutdown`] starts
    /// fails with [`EmulatorError::ChannelClosed`].
    ///
    /// [`shutdown`]: ChannelEmulator::shutdown
    pub async fn send(&self, channel_id: ChannelId, burst: Burst<'_>) -> Result<usize, EmulatorError> {
        let channel = self.channel(channel_id)?;
        let mut closing = self.closing.subscribe();
        let mut tx = channel.tx.lock().await;
        if !tx.writer.is_open() || *closing.borrow() {
            return Err(EmulatorError::ChannelClosed(channel_id));
        }
        let TxSide { writer, rng, applied } = &mut *tx;

        if burst.start_of_burst {
            self.applicator.on_burst_start(channel_id, applied, burst.samples).await;
        }

        let subframe_length = self.impairments.lock().await.settings().subframe_length;
        let sent = tokio::select! {
            sent = self.framer.send_burst(writer, &burst, subframe_length, rng) => sent,
            _ = closing.wait_for(|closing| *closing) => {
                debug!("Send on channel {} interrupted by shutdown", channel_id);
                return Err(EmulatorError::ChannelClosed(channel_id));
            }
        };
        sent.map_err(|source| {
            error!("Error writing to channel {}: {}", channel_id, source);
            EmulatorError::Io {
                channel: channel_id,
                source,
            }
        })
    }

    /// Fills `buf` from `channel_id` and applies the active impairments to
    /// the samples obtained.
    ///
    /// Returns fewer than `buf.len()` samples only if the peer closed. If
    /// the future is dropped part way, the next call with the same buffer
    /// resumes the receive. A receive still waiting when [`shutdown`]
    /// starts fails with [`EmulatorError::ChannelClosed`].
    ///
    /// [`shutdown`]: ChannelEmulator::shutdown
    pub async fn recv(&self, channel_id: ChannelId, buf: &mut [Sample]) -> Result<usize, EmulatorError> {
        let channel = self.channel(channel_id)?;
        let mut closing = self.closing.subscribe();
        let mut rx = channel.rx.lock().await;
        if !rx.state.reader_mut().is_open() || *closing.borrow() {
            return Err(EmulatorError::ChannelClosed(channel_id));
        }

        let received = tokio::select! {
            received = rx.state.recv_samples(buf) => received,
            _ = closing.wait_for(|closing| *closing) => {
                debug!("Receive on channel {} interrupted by shutdown", channel_id);
                return Err(EmulatorError::ChannelClosed(channel_id));
            }
        };
        let n = received.map_err(|source| {
            error!("Error reading from channel {}: {}", channel_id, source);
            EmulatorError::Io {
                channel: channel_id,
                source,
            }
        })?;

        if n > 0 {
            let RxSide { rng, .. } = &mut *rx;
            self.applicator.apply(channel_id, &mut buf[..n], rng).await;
        }
        Ok(n)
    }

    /// Discards a partially collected receive. Returns the samples dropped.
    pub async fn abandon_receive(&self, channel_id: ChannelId) -> Result<usize, EmulatorError> {
        let channel = self.channel(channel_id)?;
        let dropped = channel.rx.lock().await.state.abandon();
        if dropped > 0 {
            warn!("Channel {} abandoned a receive with {} samples pending", channel_id, dropped);
        }
        Ok(dropped)
    }

    pub async fn set_simple_awgn(&self, enable: bool) {
        self.impairments.lock().await.set_simple_awgn(enable);
    }

    pub async fn set_impairment_chain(&self, enable: bool) {
        self.impairments.lock().await.set_impairment_chain(enable);
    }

    pub async fn set_snr(&self, snr_db: f32) {
        self.impairments.lock().await.set_snr(snr_db);
    }

    pub async fn set_noise_variance(&self, noise_variance: f32) {
        self.impairments.lock().await.set_noise_variance(noise_variance);
    }

    pub async fn set_carrier_offset(&self, carrier_offset_hz: f32) {
        self.impairments.lock().await.set_carrier_offset(carrier_offset_hz);
    }

    /// Runs `f` against the impairment chain under the state lock, for
    /// adding noise, multipath and the like.
    pub async fn configure_chain<F>(&self, f: F)
    where
        F: FnOnce(&mut dyn ImpairmentChain),
    {
        let mut state = self.impairments.lock().await;
        f(state.chain_mut());
    }

    pub async fn describe_chain(&self) -> String {
        self.impairments.lock().await.chain().describe()
    }

    pub async fn settings(&self) -> ImpairmentSettings {
        self.impairments.lock().await.settings()
    }

    /// Sets the subframe length to one millisecond of samples at
    /// `sample_rate_hz`.
    pub async fn set_subframe_length(&self, sample_rate_hz: f64) -> Result<usize, EmulatorError> {
        if !sample_rate_hz.is_finite() || sample_rate_hz <= 0.0 {
            return Err(EmulatorError::InvalidSampleRate(sample_rate_hz));
        }
        let subframe_length = (sample_rate_hz * 0.001) as usize;
        if subframe_length == 0 {
            return Err(EmulatorError::InvalidSampleRate(sample_rate_hz));
        }
        self.impairments.lock().await.set_subframe_length(subframe_length);
        Ok(subframe_length)
    }

    /// Estimates the PSD of `samples` and writes it as a plot script to the
    /// configured path.
    pub fn export_psd(&self, samples: &[Sample], nfft: usize) -> Result<Vec<f32>, EmulatorError> {
        let psd = estimate_psd(samples, nfft);
        let path = &self.config.psd_script_path;
        write_psd_script(path, nfft, &psd).map_err(|source| {
            error!("Error writing PSD script {}: {}", path.display(), source);
            EmulatorError::PsdExport {
                path: path.clone(),
                source,
            }
        })?;
        Ok(psd)
    }

    /// Stops the reconfiguration worker, then closes every channel.
    ///
    /// Pending sends and receives are released with
    /// [`EmulatorError::ChannelClosed`].
    /// All channels are closed even if some fail; the first failure is
    /// returned. Calling it again is a no-op.
    pub async fn shutdown(&self) -> Result<(), EmulatorError> {
        let mut first_error = None;
        self.closing.send_replace(true);

        if let Some(worker) = self.worker.lock().await.take() {
            if let Err(e) = worker.stop().await {
                first_error = Some(e);
            }
        }

        // tx is released before rx is taken; a parked receive holds rx
        for (id, channel) in self.channels.iter().enumerate() {
            let write_result = {
                let mut tx = channel.tx.lock().await;
                if tx.writer.is_open() {
                    debug!("Closing channel {} for writing", id);
                }
                tx.writer.close().await
            };
            if let Err(source) = write_result {
                error!("Error closing writing pipe for channel {}: {}", id, source);
                first_error.get_or_insert(EmulatorError::Io { channel: id, source });
            }

            let mut rx = channel.rx.lock().await;
            if rx.state.reader_mut().close() {
                debug!("Closed channel {} for reading", id);
            }
        }

        info!("Channel emulator shut down");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn channel_rng(seed: Option<u64>, stream: u64) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(stream)),
        None => StdRng::from_os_rng(),
    }
}
