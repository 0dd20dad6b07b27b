//! Impairment collaborators
//!
//! The emulator only decides *when* impairments run; the channel effects
//! themselves live behind [`ImpairmentChain`] and [`CarrierOffsetCorrector`].
//! [`BasebandChain`] and [`PhaseRotator`] are the implementations used by
//! default.

use std::collections::VecDeque;
use std::f32::consts::{PI, SQRT_2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};

use chanemu_core::Sample;

/// Composite channel model applied in place to received buffers.
pub trait ImpairmentChain: Send {
    /// Additive noise at `noise_floor_db`, with the signal scaled so that it
    /// sits `snr_db` above the floor.
    fn add_noise(&mut self, noise_floor_db: f32, snr_db: f32);

    /// Carrier offset of `dphi` radians per sample, starting at phase `phi`.
    fn add_carrier_offset(&mut self, dphi: f32, phi: f32);

    fn add_multipath(&mut self, taps: &[Sample]);

    /// Log-normal shadowing with deviation `sigma_db` and normalized
    /// Doppler `fd`.
    fn add_shadowing(&mut self, sigma_db: f32, fd: f32);

    fn execute(&mut self, buf: &mut [Sample]);

    fn describe(&self) -> String;
}

/// Stateful carrier-offset correction.
pub trait CarrierOffsetCorrector: Send {
    fn set_fft_size(&mut self, fft_size: usize);

    /// Rotates `buf` by `-normalized_freq` cycles per sample.
    fn correct(&mut self, buf: &mut [Sample], normalized_freq: f32);
}

struct NoiseStage {
    std_dev: f32,
}

struct CarrierStage {
    dphi: f32,
    phi: f32,
}

struct MultipathStage {
    taps: Vec<Sample>,
    history: VecDeque<Sample>,
}

struct ShadowingStage {
    sigma_db: f32,
    pole: f32,
    state: f32,
}

pub struct BasebandChain {
    gain: f32,
    noise: Option<NoiseStage>,
    carrier: Option<CarrierStage>,
    multipath: Option<MultipathStage>,
    shadowing: Option<ShadowingStage>,
    rng: StdRng,
}

impl BasebandChain {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            gain: 1.0,
            noise: None,
            carrier: None,
            multipath: None,
            shadowing: None,
            rng,
        }
    }

    fn gaussian(&mut self) -> f32 {
        StandardNormal.sample(&mut self.rng)
    }
}

impl Default for BasebandChain {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ImpairmentChain for BasebandChain {
    fn add_noise(&mut self, noise_floor_db: f32, snr_db: f32) {
        self.noise = Some(NoiseStage {
            std_dev: 10f32.powf(noise_floor_db / 20.0),
        });
        self.gain = 10f32.powf((noise_floor_db + snr_db) / 20.0);
    }

    fn add_carrier_offset(&mut self, dphi: f32, phi: f32) {
        self.carrier = Some(CarrierStage { dphi, phi });
    }

    fn add_multipath(&mut self, taps: &[Sample]) {
        if taps.is_empty() {
            self.multipath = None;
            return;
        }
        self.multipath = Some(MultipathStage {
            taps: taps.to_vec(),
            history: VecDeque::from(vec![Sample::default(); taps.len()]),
        });
    }

    fn add_shadowing(&mut self, sigma_db: f32, fd: f32) {
        self.shadowing = Some(ShadowingStage {
            sigma_db,
            pole: (1.0 - fd).clamp(0.0, 1.0),
            state: 0.0,
        });
    }

    fn execute(&mut self, buf: &mut [Sample]) {
        for sample in buf.iter_mut() {
            let mut y = *sample * self.gain;

            if let Some(carrier) = self.carrier.as_mut() {
                y *= Sample::from_polar(1.0, carrier.phi);
                carrier.phi = wrap_phase(carrier.phi + carrier.dphi);
            }

            if let Some(multipath) = self.multipath.as_mut() {
                multipath.history.pop_back();
                multipath.history.push_front(y);
                y = multipath
                    .taps
                    .iter()
                    .zip(multipath.history.iter())
                    .map(|(h, x)| h * x)
                    .sum();
            }

            if self.shadowing.is_some() {
                let n = self.gaussian();
                if let Some(shadowing) = self.shadowing.as_mut() {
                    let a = shadowing.pole;
                    shadowing.state = a * shadowing.state + (1.0 - a * a).sqrt() * n;
                    y *= 10f32.powf(shadowing.sigma_db * shadowing.state / 20.0);
                }
            }

            if let Some(std_dev) = self.noise.as_ref().map(|n| n.std_dev) {
                let re = self.gaussian();
                let im = self.gaussian();
                y += Sample::new(re, im) * (std_dev / SQRT_2);
            }

            *sample = y;
        }
    }

    fn describe(&self) -> String {
        let mut stages = vec![format!("gain {:.3}", self.gain)];
        if let Some(noise) = &self.noise {
            stages.push(format!("awgn std {:.3e}", noise.std_dev));
        }
        if let Some(carrier) = &self.carrier {
            stages.push(format!("carrier offset dphi {:.4} phi {:.4}", carrier.dphi, carrier.phi));
        }
        if let Some(multipath) = &self.multipath {
            stages.push(format!("multipath {} taps", multipath.taps.len()));
        }
        if let Some(shadowing) = &self.shadowing {
            stages.push(format!("shadowing sigma {:.2} dB pole {:.4}", shadowing.sigma_db, shadowing.pole));
        }
        format!("channel: {}", stages.join(", "))
    }
}

fn wrap_phase(phi: f32) -> f32 {
    let mut phi = phi;
    while phi >= PI {
        phi -= 2.0 * PI;
    }
    while phi < -PI {
        phi += 2.0 * PI;
    }
    phi
}

/// Carrier-offset correction keeping its phase across calls, so
/// consecutive buffers see one continuous rotation.
pub struct PhaseRotator {
    fft_size: usize,
    phase: f32,
}

impl PhaseRotator {
    pub fn new(fft_size: usize) -> Self {
        Self { fft_size, phase: 0.0 }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }
}

impl CarrierOffsetCorrector for PhaseRotator {
    fn set_fft_size(&mut self, fft_size: usize) {
        if fft_size != self.fft_size {
            self.fft_size = fft_size;
            self.phase = 0.0;
        }
    }

    fn correct(&mut self, buf: &mut [Sample], normalized_freq: f32) {
        let step = -2.0 * PI * normalized_freq;
        for sample in buf.iter_mut() {
            *sample *= Sample::from_polar(1.0, self.phase);
            self.phase = wrap_phase(self.phase + step);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chanemu_core::avg_power;

    fn close(a: Sample, b: Sample) -> bool {
        (a - b).norm() < 1e-4
    }

    #[test]
    fn test_empty_chain_is_identity() {
        let mut chain = BasebandChain::new(Some(1));
        let mut buf = vec![Sample::new(0.5, -0.25); 16];
        chain.execute(&mut buf);
        assert!(buf.iter().all(|s| close(*s, Sample::new(0.5, -0.25))));
    }

    #[test]
    fn test_noise_floor_and_gain() {
        let mut chain = BasebandChain::new(Some(2));
        chain.add_noise(-10.0, 10.0);

        let mut silence = vec![Sample::default(); 20_000];
        chain.execute(&mut silence);
        let noise_power = avg_power(&silence);
        assert!((noise_power - 0.1).abs() < 0.01, "noise power {}", noise_power);
    }

    #[test]
    fn test_carrier_offset_rotates() {
        let mut chain = BasebandChain::new(Some(3));
        chain.add_carrier_offset(PI / 2.0, 0.0);
        let mut buf = vec![Sample::new(1.0, 0.0); 4];
        chain.execute(&mut buf);
        assert!(close(buf[0], Sample::new(1.0, 0.0)));
        assert!(close(buf[1], Sample::new(0.0, 1.0)));
        assert!(close(buf[2], Sample::new(-1.0, 0.0)));
        assert!(close(buf[3], Sample::new(0.0, -1.0)));
    }

    #[test]
    fn test_multipath_impulse_response() {
        let mut chain = BasebandChain::new(Some(4));
        let taps = [Sample::new(1.0, 0.0), Sample::new(0.0, 0.5)];
        chain.add_multipath(&taps);
        let mut buf = vec![Sample::default(); 4];
        buf[0] = Sample::new(1.0, 0.0);
        chain.execute(&mut buf);
        assert!(close(buf[0], taps[0]));
        assert!(close(buf[1], taps[1]));
        assert!(close(buf[2], Sample::default()));
        assert!(chain.describe().contains("multipath 2 taps"));
    }

    #[test]
    fn test_zero_sigma_shadowing_keeps_level() {
        let mut chain = BasebandChain::new(Some(5));
        chain.add_shadowing(0.0, 0.1);
        let mut buf = vec![Sample::new(1.0, 1.0); 32];
        chain.execute(&mut buf);
        assert!(buf.iter().all(|s| close(*s, Sample::new(1.0, 1.0))));
    }

    #[test]
    fn test_phase_rotator_is_continuous_across_calls() {
        let mut rotator = PhaseRotator::new(384);
        let mut first = vec![Sample::new(1.0, 0.0); 2];
        let mut second = vec![Sample::new(1.0, 0.0); 2];
        rotator.correct(&mut first, 0.25);
        rotator.correct(&mut second, 0.25);
        assert!(close(first[0], Sample::new(1.0, 0.0)));
        assert!(close(first[1], Sample::new(0.0, -1.0)));
        assert!(close(second[0], Sample::new(-1.0, 0.0)));
        assert!(close(second[1], Sample::new(0.0, 1.0)));
    }

    #[test]
    fn test_phase_rotator_resets_on_new_fft_size() {
        let mut rotator = PhaseRotator::new(384);
        let mut buf = vec![Sample::new(1.0, 0.0); 3];
        rotator.correct(&mut buf, 0.1);
        rotator.set_fft_size(768);
        assert_eq!(rotator.fft_size(), 768);
        let mut buf = vec![Sample::new(1.0, 0.0); 1];
        rotator.correct(&mut buf, 0.1);
        assert!(close(buf[0], Sample::new(1.0, 0.0)));
    }
}
