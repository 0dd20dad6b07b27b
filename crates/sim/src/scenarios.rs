//! Loopback scenarios exercising the channel emulator over named pipes

use std::f32::consts::FRAC_1_SQRT_2;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{bail, Context, Result};
use chanemu::{
    Burst, ChannelEmulator, ChannelMode, Collaborators, EmulatorConfig, ReconfigMessage, Sample,
};
use chanemu_core::{avg_power, linear_to_db};
use indicatif::ProgressBar;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Receive gap after which a drain assumes the sender is done.
const DRAIN_IDLE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct LoopbackReport {
    pub bursts: usize,
    pub samples_sent: usize,
    pub samples_received: usize,
    pub mismatches: usize,
}

#[derive(Debug, Clone)]
pub struct AwgnPoint {
    pub target_snr_db: f32,
    pub noise_variance: f32,
    pub measured_snr_db: f32,
}

#[derive(Debug, Clone)]
pub struct PaddingReport {
    pub payload: usize,
    pub written: usize,
    pub received: usize,
}

/// Unit-power QPSK symbols.
pub fn qpsk_burst<R: Rng>(rng: &mut R, len: usize) -> Vec<Sample> {
    (0..len)
        .map(|_| {
            let re = if rng.random_bool(0.5) { FRAC_1_SQRT_2 } else { -FRAC_1_SQRT_2 };
            let im = if rng.random_bool(0.5) { FRAC_1_SQRT_2 } else { -FRAC_1_SQRT_2 };
            Sample::new(re, im)
        })
        .collect()
}

fn start(config: EmulatorConfig) -> Result<Arc<ChannelEmulator>> {
    let seed = config.seed;
    let emu = ChannelEmulator::initialize(config, Collaborators::seeded(seed))
        .context("failed to bring up the channel emulator")?;
    Ok(Arc::new(emu))
}

/// Sends `burst` from a separate task and receives exactly `expected`
/// samples. Bursts larger than the pipe buffer need both sides running.
async fn transfer(
    emu: &Arc<ChannelEmulator>,
    channel: usize,
    burst: Vec<Sample>,
    expected: usize,
) -> Result<(usize, Vec<Sample>)> {
    let sender = {
        let emu = emu.clone();
        tokio::spawn(async move { emu.send(channel, Burst::whole(&burst)).await })
    };

    let mut buf = vec![Sample::default(); expected];
    let received = emu.recv(channel, &mut buf).await?;
    buf.truncate(received);
    let written = sender.await.context("sender task panicked")??;
    Ok((written, buf))
}

/// Receives whatever arrives on `channel` until it stays quiet for
/// [`DRAIN_IDLE`], collecting the tail of a partial receive as well.
async fn drain(emu: &ChannelEmulator, channel: usize, chunk: usize) -> Result<usize> {
    let mut total = 0;
    let mut buf = vec![Sample::default(); chunk];
    loop {
        match tokio::time::timeout(DRAIN_IDLE, emu.recv(channel, &mut buf)).await {
            Ok(Ok(n)) => total += n,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                let tail = emu.abandon_receive(channel).await?;
                debug!("Drain on channel {} ended with {} pending samples", channel, tail);
                return Ok(total + tail);
            }
        }
    }
}

fn measured_snr(sent: &[Sample], received: &[Sample]) -> f32 {
    let noise: Vec<Sample> = received.iter().zip(sent).map(|(r, s)| r - s).collect();
    linear_to_db(avg_power(sent) / avg_power(&noise))
}

/// Bursts on every channel with no impairment; each must arrive intact.
pub async fn clean_loopback(
    config: EmulatorConfig,
    nof_bursts: usize,
    burst_len: usize,
    progress: &ProgressBar,
) -> Result<LoopbackReport> {
    let mut rng = StdRng::seed_from_u64(config.seed.unwrap_or(0));
    let nof_channels = config.nof_channels;
    let emu = start(config)?;

    let mut report = LoopbackReport {
        bursts: 0,
        samples_sent: 0,
        samples_received: 0,
        mismatches: 0,
    };
    for i in 0..nof_bursts {
        let channel = i % nof_channels.max(1);
        let burst = qpsk_burst(&mut rng, burst_len);
        let (written, received) = transfer(&emu, channel, burst.clone(), burst_len).await?;
        report.bursts += 1;
        report.samples_sent += written;
        report.samples_received += received.len();
        report.mismatches += received.iter().zip(&burst).filter(|(r, s)| r != s).count();
        progress.inc(1);
    }

    emu.shutdown().await?;
    Ok(report)
}

/// One burst per SNR in simple AWGN mode, measuring the SNR on receive.
pub async fn awgn_sweep(
    config: EmulatorConfig,
    snrs_db: &[f32],
    burst_len: usize,
    progress: &ProgressBar,
) -> Result<Vec<AwgnPoint>> {
    let mut rng = StdRng::seed_from_u64(config.seed.unwrap_or(0));
    let emu = start(config)?;
    emu.set_simple_awgn(true).await;

    let mut points = Vec::with_capacity(snrs_db.len());
    for &snr_db in snrs_db {
        emu.set_snr(snr_db).await;
        let burst = qpsk_burst(&mut rng, burst_len);
        let (_, received) = transfer(&emu, 0, burst.clone(), burst_len).await?;
        points.push(AwgnPoint {
            target_snr_db: snr_db,
            noise_variance: emu.settings().await.noise_variance,
            measured_snr_db: measured_snr(&burst, &received),
        });
        progress.inc(1);
    }

    emu.shutdown().await?;
    Ok(points)
}

/// Bursts of the given lengths through a padding configuration, comparing
/// what the sender reports with what the receiver drains.
pub async fn padding_accounting(
    config: EmulatorConfig,
    payload_lengths: &[usize],
    progress: &ProgressBar,
) -> Result<Vec<PaddingReport>> {
    let chunk = config.subframe_length;
    let emu = start(config)?;

    let mut reports = Vec::with_capacity(payload_lengths.len());
    for &payload in payload_lengths {
        let sender = {
            let emu = emu.clone();
            let burst = vec![Sample::new(FRAC_1_SQRT_2, FRAC_1_SQRT_2); payload];
            tokio::spawn(async move { emu.send(0, Burst::whole(&burst)).await })
        };
        let received = drain(&emu, 0, chunk).await?;
        let written = sender.await.context("sender task panicked")??;
        reports.push(PaddingReport {
            payload,
            written,
            received,
        });
        progress.inc(1);
    }

    emu.shutdown().await?;
    Ok(reports)
}

/// Drives the SNR through the emulator's reconfiguration queue while bursts
/// are flowing, as a remote controller would.
pub async fn live_reconfiguration(
    config: EmulatorConfig,
    snrs_db: &[f32],
    burst_len: usize,
    progress: &ProgressBar,
) -> Result<Vec<AwgnPoint>> {
    let mut rng = StdRng::seed_from_u64(config.seed.unwrap_or(0));
    let settle = config.reconfig_poll * 20;
    let emu = start(config)?;
    let Some(controller) = emu.reconfig_sender() else {
        bail!("emulator has no reconfiguration queue");
    };

    let mut points = Vec::with_capacity(snrs_db.len());
    for &snr_db in snrs_db {
        controller.send(ReconfigMessage::simple_awgn(snr_db)).await?;

        let deadline = tokio::time::Instant::now() + settle;
        loop {
            let settings = emu.settings().await;
            if settings.mode == ChannelMode::SimpleAwgn && settings.snr_db == snr_db {
                break;
            }
            if tokio::time::Instant::now() > deadline {
                bail!("SNR {} dB was not applied within {:?}", snr_db, settle);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let burst = qpsk_burst(&mut rng, burst_len);
        let (_, received) = transfer(&emu, 0, burst.clone(), burst_len).await?;
        points.push(AwgnPoint {
            target_snr_db: snr_db,
            noise_variance: emu.settings().await.noise_variance,
            measured_snr_db: measured_snr(&burst, &received),
        });
        progress.inc(1);
    }

    emu.shutdown().await?;
    Ok(points)
}
