//! Test doubles shared by the unit tests

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

use chanemu_core::{ChannelId, Sample, SAMPLE_BYTES};

use crate::chain::{CarrierOffsetCorrector, ImpairmentChain};
use crate::stream::ChannelStream;

/// Write endpoint that records everything it accepts. It can be limited to
/// short writes, and can fail once a byte budget is used up.
#[derive(Clone, Default)]
pub(crate) struct RecordingSink {
    data: Arc<Mutex<Vec<u8>>>,
    max_chunk: Option<usize>,
    fail_after: Option<usize>,
}

impl RecordingSink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = Some(max_chunk);
        self
    }

    pub(crate) fn fail_after(mut self, nof_bytes: usize) -> Self {
        self.fail_after = Some(nof_bytes);
        self
    }

    pub(crate) fn bytes(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }

    pub(crate) fn samples(&self) -> usize {
        self.data.lock().unwrap().len() / SAMPLE_BYTES
    }

    pub(crate) fn written_samples(&self) -> Vec<Sample> {
        self.bytes()
            .chunks_exact(SAMPLE_BYTES)
            .map(bytemuck::pod_read_unaligned::<Sample>)
            .collect()
    }
}

impl AsyncWrite for RecordingSink {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let mut data = self.data.lock().unwrap();
        let mut n = buf.len();
        if let Some(limit) = self.fail_after {
            if data.len() >= limit {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink budget used up")));
            }
            n = n.min(limit - data.len());
        }
        if let Some(max_chunk) = self.max_chunk {
            n = n.min(max_chunk);
        }
        data.extend_from_slice(&buf[..n]);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// In-memory channel whose reader sees what its writer writes.
pub(crate) fn loopback_stream(id: ChannelId, capacity: usize) -> ChannelStream {
    let (near, far) = tokio::io::duplex(capacity);
    let (_, near_writer) = tokio::io::split(near);
    let (far_reader, _) = tokio::io::split(far);
    ChannelStream::from_parts(id, Box::new(far_reader), Box::new(near_writer))
}

/// Impairment chain that records which operations were invoked.
#[derive(Clone, Default)]
pub(crate) struct RecordingChain {
    pub(crate) calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingChain {
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ImpairmentChain for RecordingChain {
    fn add_noise(&mut self, noise_floor_db: f32, snr_db: f32) {
        self.record(format!("noise {} {}", noise_floor_db, snr_db));
    }

    fn add_carrier_offset(&mut self, dphi: f32, phi: f32) {
        self.record(format!("carrier {} {}", dphi, phi));
    }

    fn add_multipath(&mut self, taps: &[Sample]) {
        self.record(format!("multipath {}", taps.len()));
    }

    fn add_shadowing(&mut self, sigma_db: f32, fd: f32) {
        self.record(format!("shadowing {} {}", sigma_db, fd));
    }

    fn execute(&mut self, buf: &mut [Sample]) {
        self.record(format!("execute {}", buf.len()));
    }

    fn describe(&self) -> String {
        "recording chain".to_string()
    }
}

/// Carrier-offset corrector that records the frequencies it was asked for.
#[derive(Clone, Default)]
pub(crate) struct RecordingCorrector {
    pub(crate) freqs: Arc<Mutex<Vec<f32>>>,
    pub(crate) fft_size: Arc<Mutex<usize>>,
}

impl RecordingCorrector {
    pub(crate) fn freqs(&self) -> Vec<f32> {
        self.freqs.lock().unwrap().clone()
    }
}

impl CarrierOffsetCorrector for RecordingCorrector {
    fn set_fft_size(&mut self, fft_size: usize) {
        *self.fft_size.lock().unwrap() = fft_size;
    }

    fn correct(&mut self, _buf: &mut [Sample], normalized_freq: f32) {
        self.freqs.lock().unwrap().push(normalized_freq);
    }
}
