//! Impairment application on received samples

use std::f32::consts::SQRT_2;
use log::{debug, info};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use chanemu_core::{avg_power, db_to_linear, linear_to_db, ChannelId, ChannelMode, Sample};

use crate::impairment::SharedImpairments;

/// SNR a channel last derived its noise variance for. The epoch ties the
/// value to one activation of simple AWGN mode, so re-entering the mode
/// forces a fresh derivation even at an unchanged SNR.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AppliedSnr {
    pub snr_db: f32,
    pub awgn_epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseDerivation {
    pub signal_power_db: f32,
    pub noise_power_db: f32,
    pub noise_variance: f32,
}

/// Noise variance that puts `samples` at `snr_db`. `None` for a silent or
/// empty buffer, whose power has no meaningful dB value.
pub fn derive_noise(samples: &[Sample], snr_db: f32) -> Option<NoiseDerivation> {
    let power = avg_power(samples);
    if power.is_nan() || power <= 0.0 {
        return None;
    }
    let signal_power_db = linear_to_db(power);
    let noise_power_db = signal_power_db - snr_db;
    Some(NoiseDerivation {
        signal_power_db,
        noise_power_db,
        noise_variance: db_to_linear(noise_power_db),
    })
}

/// Adds circular complex Gaussian noise of total power `amplitude^2`.
pub fn add_awgn<R: Rng>(buf: &mut [Sample], amplitude: f32, rng: &mut R) {
    if amplitude.is_nan() || amplitude <= 0.0 {
        return;
    }
    let scale = amplitude / SQRT_2;
    for sample in buf.iter_mut() {
        let re: f32 = StandardNormal.sample(rng);
        let im: f32 = StandardNormal.sample(rng);
        *sample += Sample::new(re, im) * scale;
    }
}

pub struct Applicator {
    state: SharedImpairments,
}

impl Applicator {
    pub fn new(state: SharedImpairments) -> Self {
        Self { state }
    }

    /// Derives the simple-AWGN noise variance from a burst's power.
    ///
    /// Only runs in simple AWGN mode and only when the channel's cached
    /// SNR differs from the current one.
    pub async fn on_burst_start(
        &self,
        channel_id: ChannelId,
        cache: &mut Option<AppliedSnr>,
        samples: &[Sample],
    ) -> Option<NoiseDerivation> {
        let mut state = self.state.lock().await;
        let settings = state.settings();
        if settings.mode != ChannelMode::SimpleAwgn {
            return None;
        }
        let current = AppliedSnr {
            snr_db: settings.snr_db,
            awgn_epoch: settings.awgn_epoch,
        };
        if *cache == Some(current) {
            return None;
        }

        let Some(derivation) = derive_noise(samples, settings.snr_db) else {
            debug!("Channel {} burst start carries no power, noise variance unchanged", channel_id);
            return None;
        };
        state.set_noise_variance(derivation.noise_variance);
        *cache = Some(current);

        info!(
            "Channel {} - SNR: {:.2} dB - Signal power: {:.2} dBW - Noise power: {:.2} dBW - Noise variance: {:.2e}",
            channel_id,
            settings.snr_db,
            derivation.signal_power_db,
            derivation.noise_power_db,
            derivation.noise_variance
        );
        Some(derivation)
    }

    /// Applies the active impairment to a received buffer in place, then
    /// the carrier-offset correction if one is configured.
    pub async fn apply<R: Rng>(&self, channel_id: ChannelId, buf: &mut [Sample], rng: &mut R) {
        if buf.is_empty() {
            return;
        }
        let mut state = self.state.lock().await;
        let settings = state.settings();

        match settings.mode {
            ChannelMode::SimpleAwgn => add_awgn(buf, settings.noise_variance.sqrt(), rng),
            ChannelMode::ImpairmentChain => state.chain_mut().execute(buf),
            ChannelMode::None => {}
        }

        if settings.carrier_offset_hz > 0.0 && settings.fft_size > 0 {
            let normalized = settings.carrier_offset_hz / settings.fft_size as f32;
            state.corrector_mut().correct(buf, normalized);
            debug!(
                "Channel {} applied carrier offset of {} Hz ({} normalized)",
                channel_id, settings.carrier_offset_hz, normalized
            );
        }
    }
}
