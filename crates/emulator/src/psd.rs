//! Power spectral density diagnostics

use std::f32::consts::PI;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use log::info;
use rustfft::{Fft, FftPlanner};

use chanemu_core::{linear_to_db, Sample};

const PSD_FLOOR: f32 = 1e-20;

/// Averaged periodogram of `samples` over Hann-windowed `nfft` segments.
///
/// Bins are fft-shifted so index 0 is `-Fs/2`, and scaled so white noise
/// of power `p` reads `10 log10(p)` dB in every bin. A trailing partial
/// segment is zero padded.
pub fn estimate_psd(samples: &[Sample], nfft: usize) -> Vec<f32> {
    if nfft == 0 {
        return Vec::new();
    }

    let window: Vec<f32> = (0..nfft)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / nfft as f32).cos())
        .collect();
    let window_power: f32 = window.iter().map(|w| w * w).sum::<f32>().max(PSD_FLOOR);

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(nfft);

    let mut accum = vec![0f32; nfft];
    let mut segments = 0usize;
    let mut scratch = vec![Sample::default(); nfft];
    for chunk in samples.chunks(nfft) {
        scratch.fill(Sample::default());
        for ((out, x), w) in scratch.iter_mut().zip(chunk).zip(&window) {
            *out = *x * *w;
        }
        fft.process(&mut scratch);
        for (acc, bin) in accum.iter_mut().zip(&scratch) {
            *acc += bin.norm_sqr();
        }
        segments += 1;
    }

    let scale = 1.0 / (window_power * segments.max(1) as f32);
    let mut psd: Vec<f32> = accum
        .into_iter()
        .map(|p| linear_to_db((p * scale).max(PSD_FLOOR)))
        .collect();
    psd.rotate_left(nfft / 2);
    psd
}

/// Writes an Octave/MATLAB script that plots `psd`.
pub fn write_psd_script(path: &Path, nfft: usize, psd: &[f32]) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);

    writeln!(out, "nfft = {};", nfft)?;
    writeln!(out, "f=[0:(nfft-1)]/nfft - 0.5;")?;
    writeln!(out, "psd = zeros(1,nfft);")?;
    for (i, p) in psd.iter().enumerate() {
        writeln!(out, "psd({:3}) = {:12.8};", i + 1, p)?;
    }
    writeln!(out, "figure;")?;
    writeln!(out, "  plot(f, psd, 'LineWidth',1.5,'Color',[0 0.5 0.2]);")?;
    writeln!(out, "  grid on;")?;
    writeln!(out, "  pmin = 10*floor(0.1*min(psd - 5));")?;
    writeln!(out, "  pmax = 10*ceil (0.1*max(psd + 5));")?;
    writeln!(out, "  axis([-0.5 0.5 pmin pmax]);")?;
    writeln!(out, "  xlabel('Normalized Frequency [f/F_s]');")?;
    writeln!(out, "  ylabel('Power Spectral Density [dB]');")?;
    out.flush()?;

    info!("PSD script with {} bins written to {}", psd.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applicator::add_awgn;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_tone_peaks_at_its_bin() {
        let nfft = 64;
        let freq = 0.25;
        let tone: Vec<Sample> = (0..nfft * 8)
            .map(|n| Sample::from_polar(1.0, 2.0 * PI * freq * n as f32))
            .collect();
        let psd = estimate_psd(&tone, nfft);
        assert_eq!(psd.len(), nfft);

        let peak = psd
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, nfft / 2 + nfft / 4);
    }

    #[test]
    fn test_white_noise_level() {
        let mut rng = StdRng::seed_from_u64(31);
        let mut noise = vec![Sample::default(); 128 * 200];
        add_awgn(&mut noise, 0.1f32.sqrt(), &mut rng);

        let psd = estimate_psd(&noise, 128);
        let mean_db = psd.iter().sum::<f32>() / psd.len() as f32;
        // log-averaging biases low by a fraction of a dB
        assert!((mean_db + 10.0).abs() < 1.5, "mean level {} dB", mean_db);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(estimate_psd(&[Sample::new(1.0, 0.0)], 0).is_empty());
        let psd = estimate_psd(&[], 8);
        assert_eq!(psd.len(), 8);
        assert!(psd.iter().all(|p| *p < -190.0));
    }

    #[test]
    fn test_script_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("psd.m");
        write_psd_script(&path, 4, &[-1.0, -2.5, 3.0, 0.125]).unwrap();

        let script = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = script.lines().collect();
        assert_eq!(lines[0], "nfft = 4;");
        assert_eq!(lines[1], "f=[0:(nfft-1)]/nfft - 0.5;");
        assert_eq!(lines[2], "psd = zeros(1,nfft);");
        assert_eq!(lines[3], "psd(  1) =  -1.00000000;");
        assert_eq!(lines[6], "psd(  4) =   0.12500000;");
        assert!(script.contains("ylabel('Power Spectral Density [dB]');"));
    }
}
