use serde::{Deserialize, Serialize};

/// Complex baseband sample as carried on the wire (two little-endian `f32`).
pub type Sample = num_complex::Complex32;

/// Index of a logical radio link, in `[0, nof_channels)`.
pub type ChannelId = usize;

pub const SAMPLE_BYTES: usize = std::mem::size_of::<Sample>();

/// Which impairment path the receive side applies.
///
/// Simple AWGN and the full impairment chain are mutually exclusive, so
/// the active path is a single value rather than a pair of flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelMode {
    #[default]
    None,
    SimpleAwgn,
    ImpairmentChain,
}

impl ChannelMode {
    pub fn is_simple_awgn(self) -> bool {
        self == ChannelMode::SimpleAwgn
    }

    pub fn is_impairment_chain(self) -> bool {
        self == ChannelMode::ImpairmentChain
    }
}

/// One transmission unit handed to the emulator.
#[derive(Clone, Copy, Debug)]
pub struct Burst<'a> {
    pub samples: &'a [Sample],
    pub start_of_burst: bool,
    pub end_of_burst: bool,
}

impl<'a> Burst<'a> {
    pub fn new(samples: &'a [Sample]) -> Self {
        Self {
            samples,
            start_of_burst: false,
            end_of_burst: false,
        }
    }

    /// A burst that both starts and ends with this call.
    pub fn whole(samples: &'a [Sample]) -> Self {
        Self {
            samples,
            start_of_burst: true,
            end_of_burst: true,
        }
    }

    pub fn starting(mut self, start: bool) -> Self {
        self.start_of_burst = start;
        self
    }

    pub fn ending(mut self, end: bool) -> Self {
        self.end_of_burst = end;
        self
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
