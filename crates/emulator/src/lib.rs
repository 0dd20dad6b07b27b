//! named-pipe radio channel emulator

use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use chanemu_core::ChannelId;

pub mod applicator;
pub mod chain;
pub mod emulator;
pub mod framing;
pub mod impairment;
pub mod psd;
pub mod reconfig;
pub mod stream;

#[cfg(test)]
mod testing;

pub use applicator::{Applicator, AppliedSnr, NoiseDerivation};
pub use chain::{BasebandChain, CarrierOffsetCorrector, ImpairmentChain, PhaseRotator};
pub use emulator::{ChannelEmulator, Collaborators};
pub use framing::SampleFramer;
pub use impairment::{ImpairmentSettings, ImpairmentState, SharedImpairments};
pub use psd::{estimate_psd, write_psd_script};
pub use reconfig::{reconfig_queue, QueueSource, ReconfigSender, ReconfigSource, ReconfigWorker, UdpSource};
pub use stream::{ChannelReader, ChannelStream, ChannelWriter};

pub use chanemu_core::{Burst, ChannelMode, ReconfigMessage, Sample};

#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("failed to create named pipe {path}: {source}")]
    PipeCreate {
        path: PathBuf,
        source: nix::Error,
    },

    #[error("failed to open {direction} pipe for channel {channel}: {source}")]
    PipeOpen {
        channel: ChannelId,
        direction: &'static str,
        source: std::io::Error,
    },

    #[error("failed to resize pipe for channel {channel}: {source}")]
    PipeResize {
        channel: ChannelId,
        source: nix::Error,
    },

    #[error("I/O failure on channel {channel}: {source}")]
    Io {
        channel: ChannelId,
        source: std::io::Error,
    },

    #[error("channel {0} does not exist")]
    UnknownChannel(ChannelId),

    #[error("channel {0} is closed")]
    ChannelClosed(ChannelId),

    #[error("configuration worker failed: {0}")]
    Worker(String),

    #[error("invalid sample rate {0} Hz")]
    InvalidSampleRate(f64),

    #[error("unsupported bandwidth of {0} PRB")]
    UnsupportedBandwidth(u32),

    #[error("failed to write PSD script {path}: {source}")]
    PsdExport {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Runtime switches for the zero padding written around a burst.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaddingConfig {
    /// Random run of zeros before a start-of-burst payload.
    pub random_prefix: bool,
    /// Sleep in proportion to the prefix length before writing it.
    pub prefix_delay: bool,
    /// Random run of zeros after every payload.
    pub random_suffix: bool,
    /// Round each payload up to a whole number of subframes.
    pub align_to_subframe: bool,
    /// Upper bound of the prefix draw, in subframes.
    pub max_prefix_subframes: u32,
    /// Multiplier applied to the prefix's airtime (1 ms per subframe).
    pub prefix_delay_scale: u32,
}

impl Default for PaddingConfig {
    fn default() -> Self {
        Self {
            random_prefix: false,
            prefix_delay: false,
            random_suffix: false,
            align_to_subframe: false,
            max_prefix_subframes: 5,
            prefix_delay_scale: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmulatorConfig {
    pub nof_channels: usize,
    /// Named pipes are created as `{pipe_base}_{channel_id}`.
    pub pipe_base: PathBuf,
    pub subframe_length: usize,
    pub nof_prb: u32,
    pub padding: PaddingConfig,
    pub reconfig_poll: Duration,
    pub reconfig_queue_depth: usize,
    /// Seed for padding draws and noise. `None` = entropy.
    pub seed: Option<u64>,
    pub psd_script_path: PathBuf,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            nof_channels: 2,
            pipe_base: PathBuf::from("/tmp/chanemu_np_ch"),
            subframe_length: 5760,
            nof_prb: 25,
            padding: PaddingConfig::default(),
            reconfig_poll: Duration::from_millis(500),
            reconfig_queue_depth: 64,
            seed: None,
            psd_script_path: PathBuf::from("chanemu_psd.m"),
        }
    }
}

impl EmulatorConfig {
    /// Pipe buffer size requested for each channel, one subframe of samples.
    pub fn pipe_size(&self) -> usize {
        self.subframe_length * chanemu_core::SAMPLE_BYTES
    }
}
