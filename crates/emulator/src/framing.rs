//! Sample framing over channel byte streams
//!
//! Receives accumulate partial reads into the caller's buffer until the
//! requested sample count is reached or the peer closes. Sends write the
//! whole payload and optionally surround it with zero padding.

use std::io;
use std::time::Duration;
use log::{debug, trace, warn};
use rand::Rng;

use chanemu_core::{Burst, Sample, SAMPLE_BYTES};

use crate::stream::{ChannelReader, ChannelWriter};
use crate::PaddingConfig;

const ZERO_BLOCK_SAMPLES: usize = 1024;
static ZERO_BLOCK: [u8; ZERO_BLOCK_SAMPLES * SAMPLE_BYTES] = [0u8; ZERO_BLOCK_SAMPLES * SAMPLE_BYTES];

/// Read half of a channel together with its partial-receive accumulator.
pub struct ReceiveState {
    reader: ChannelReader,
    pending_bytes: usize,
}

impl ReceiveState {
    pub fn new(reader: ChannelReader) -> Self {
        Self {
            reader,
            pending_bytes: 0,
        }
    }

    /// Whole samples already collected for the receive in progress.
    pub fn pending_samples(&self) -> usize {
        self.pending_bytes / SAMPLE_BYTES
    }

    /// Drops a partially collected receive, returning how many whole
    /// samples were discarded.
    pub fn abandon(&mut self) -> usize {
        let dropped = self.pending_samples();
        self.pending_bytes = 0;
        dropped
    }

    pub fn reader_mut(&mut self) -> &mut ChannelReader {
        &mut self.reader
    }

    /// Fills `buf` from the channel.
    ///
    /// Returns `buf.len()` once complete, or fewer samples if the peer
    /// closed first. On a read error the accumulator is kept so a later
    /// call with the same buffer resumes where this one stopped.
    pub async fn recv_samples(&mut self, buf: &mut [Sample]) -> io::Result<usize> {
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(buf);
        let wanted = bytes.len();
        if self.pending_bytes > wanted {
            warn!(
                "Discarding {} pending bytes larger than the {} byte request",
                self.pending_bytes, wanted
            );
            self.pending_bytes = 0;
        }

        while self.pending_bytes < wanted {
            let n = self.reader.read(&mut bytes[self.pending_bytes..]).await?;
            if n == 0 {
                debug!("Peer closed with {} of {} bytes received", self.pending_bytes, wanted);
                break;
            }
            self.pending_bytes += n;
        }

        let received = self.pending_bytes / SAMPLE_BYTES;
        self.pending_bytes = 0;
        Ok(received)
    }
}

/// Writes bursts onto a channel, applying the configured padding.
#[derive(Debug, Clone)]
pub struct SampleFramer {
    padding: PaddingConfig,
}

impl SampleFramer {
    pub fn new(padding: PaddingConfig) -> Self {
        Self { padding }
    }

    pub fn padding(&self) -> &PaddingConfig {
        &self.padding
    }

    /// Sends one burst and returns the number of samples written, padding
    /// included.
    ///
    /// Errors writing the prefix or the payload abort the send. Errors in
    /// the trailing padding are logged and only cut the padding short.
    pub async fn send_burst<R: Rng>(
        &self,
        writer: &mut ChannelWriter,
        burst: &Burst<'_>,
        subframe_length: usize,
        rng: &mut R,
    ) -> io::Result<usize> {
        let mut written = 0;

        if burst.start_of_burst && self.padding.random_prefix && subframe_length > 0 {
            let bound = self.padding.max_prefix_subframes as usize * subframe_length;
            let nof_zeros = if bound > 0 { rng.random_range(0..bound) } else { 0 };
            if self.padding.prefix_delay {
                let delay_us = nof_zeros as u64 * 1000 / subframe_length as u64
                    * self.padding.prefix_delay_scale as u64;
                tokio::time::sleep(Duration::from_micros(delay_us)).await;
            }
            if nof_zeros > 0 {
                debug!("Writing {} zero samples before burst", nof_zeros);
                written += write_zeros(writer, nof_zeros).await.map_err(|(_, e)| e)?;
            }
        }

        let payload: &[u8] = bytemuck::cast_slice(burst.samples);
        writer.write_fully(payload).await.map_err(|failure| failure.source)?;
        written += burst.len();

        if !burst.is_empty() && self.padding.random_suffix && subframe_length > 0 {
            let nof_zeros = rng.random_range(0..subframe_length);
            match write_zeros(writer, nof_zeros).await {
                Ok(n) => written += n,
                Err((n, e)) => {
                    warn!("Trailing padding cut short after {} samples: {}", n, e);
                    written += n;
                }
            }
        }

        if !burst.is_empty() && self.padding.align_to_subframe && subframe_length > 0 {
            let remainder = burst.len() % subframe_length;
            if remainder != 0 {
                let additional = subframe_length - remainder;
                trace!("Aligning burst of {} samples with {} zeros", burst.len(), additional);
                for _ in 0..additional {
                    if let Err(failure) = writer.write_fully(&ZERO_BLOCK[..SAMPLE_BYTES]).await {
                        warn!("Alignment padding aborted: {}", failure.source);
                        break;
                    }
                    written += 1;
                }
            }
        }

        if burst.end_of_burst {
            if let Err(e) = writer.flush().await {
                warn!("Flush at end of burst failed: {}", e);
            }
        }

        Ok(written)
    }
}

/// Writes `nof_samples` zero samples; on failure reports the whole samples
/// written before the error.
async fn write_zeros(writer: &mut ChannelWriter, nof_samples: usize) -> Result<usize, (usize, io::Error)> {
    let mut remaining = nof_samples;
    let mut written = 0;
    while remaining > 0 {
        let chunk = remaining.min(ZERO_BLOCK_SAMPLES);
        if let Err(failure) = writer.write_fully(&ZERO_BLOCK[..chunk * SAMPLE_BYTES]).await {
            return Err((written + failure.written / SAMPLE_BYTES, failure.source));
        }
        written += chunk;
        remaining -= chunk;
    }
    Ok(written)
}
