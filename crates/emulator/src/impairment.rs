//! Shared impairment configuration
//!
//! One [`ImpairmentState`] exists per emulator. It is read by the transport
//! path and written by the reconfiguration worker concurrently, so it lives
//! behind a single mutex; callers that only need the parameters take an
//! [`ImpairmentSettings`] snapshot, which is never a mix of old and new
//! values.

use std::sync::Arc;
use log::{debug, info};
use tokio::sync::Mutex;

use chanemu_core::ChannelMode;

use crate::chain::{CarrierOffsetCorrector, ImpairmentChain};

pub type SharedImpairments = Arc<Mutex<ImpairmentState>>;

pub const DEFAULT_SNR_DB: f32 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpairmentSettings {
    pub mode: ChannelMode,
    pub snr_db: f32,
    pub noise_variance: f32,
    pub carrier_offset_hz: f32,
    /// Bumped on every transition into simple AWGN mode.
    pub awgn_epoch: u64,
    pub fft_size: usize,
    pub subframe_length: usize,
}

pub struct ImpairmentState {
    settings: ImpairmentSettings,
    chain: Box<dyn ImpairmentChain>,
    corrector: Box<dyn CarrierOffsetCorrector>,
}

impl ImpairmentState {
    pub fn new(
        chain: Box<dyn ImpairmentChain>,
        mut corrector: Box<dyn CarrierOffsetCorrector>,
        fft_size: usize,
        subframe_length: usize,
    ) -> Self {
        corrector.set_fft_size(fft_size);
        Self {
            settings: ImpairmentSettings {
                mode: ChannelMode::None,
                snr_db: DEFAULT_SNR_DB,
                noise_variance: 0.0,
                carrier_offset_hz: 0.0,
                awgn_epoch: 0,
                fft_size,
                subframe_length,
            },
            chain,
            corrector,
        }
    }

    pub fn into_shared(self) -> SharedImpairments {
        Arc::new(Mutex::new(self))
    }

    pub fn settings(&self) -> ImpairmentSettings {
        self.settings
    }

    pub fn mode(&self) -> ChannelMode {
        self.settings.mode
    }

    fn set_mode(&mut self, mode: ChannelMode) {
        if mode == self.settings.mode {
            return;
        }
        if mode == ChannelMode::SimpleAwgn {
            self.settings.awgn_epoch += 1;
        }
        debug!("Impairment mode {:?} -> {:?}", self.settings.mode, mode);
        self.settings.mode = mode;
    }

    /// Enabling simple AWGN disables the impairment chain. Disabling it
    /// only has an effect while it is the active mode.
    pub fn set_simple_awgn(&mut self, enable: bool) {
        if enable {
            self.set_mode(ChannelMode::SimpleAwgn);
        } else if self.settings.mode == ChannelMode::SimpleAwgn {
            self.set_mode(ChannelMode::None);
        }
    }

    /// Enabling the impairment chain disables simple AWGN. Disabling it
    /// only has an effect while it is the active mode.
    pub fn set_impairment_chain(&mut self, enable: bool) {
        if enable {
            self.set_mode(ChannelMode::ImpairmentChain);
        } else if self.settings.mode == ChannelMode::ImpairmentChain {
            self.set_mode(ChannelMode::None);
        }
    }

    pub fn set_snr(&mut self, snr_db: f32) {
        self.settings.snr_db = snr_db;
    }

    pub fn set_noise_variance(&mut self, noise_variance: f32) {
        self.settings.noise_variance = noise_variance;
    }

    pub fn set_carrier_offset(&mut self, carrier_offset_hz: f32) {
        self.settings.carrier_offset_hz = carrier_offset_hz;
    }

    pub fn set_fft_size(&mut self, fft_size: usize) {
        self.settings.fft_size = fft_size;
        self.corrector.set_fft_size(fft_size);
    }

    pub fn set_subframe_length(&mut self, subframe_length: usize) {
        info!("Subframe length set to {} samples", subframe_length);
        self.settings.subframe_length = subframe_length;
    }

    pub fn chain_mut(&mut self) -> &mut dyn ImpairmentChain {
        self.chain.as_mut()
    }

    pub fn chain(&self) -> &dyn ImpairmentChain {
        self.chain.as_ref()
    }

    pub fn corrector_mut(&mut self) -> &mut dyn CarrierOffsetCorrector {
        self.corrector.as_mut()
    }
}
