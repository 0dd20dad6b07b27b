use serde::{Deserialize, Serialize};

/// Runtime reconfiguration request consumed by the emulator's worker.
///
/// `enable_simple_awgn` and `snr_db` are the core request; the remaining
/// fields are extensions where `false` / `None` mean "no change".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReconfigMessage {
    pub enable_simple_awgn: bool,
    pub snr_db: f32,
    #[serde(default)]
    pub enable_impairment_chain: bool,
    #[serde(default)]
    pub carrier_offset_hz: Option<f32>,
}

impl ReconfigMessage {
    pub fn simple_awgn(snr_db: f32) -> Self {
        Self {
            enable_simple_awgn: true,
            snr_db,
            enable_impairment_chain: false,
            carrier_offset_hz: None,
        }
    }

    pub fn impairment_chain() -> Self {
        Self {
            enable_simple_awgn: false,
            snr_db: 0.0,
            enable_impairment_chain: true,
            carrier_offset_hz: None,
        }
    }

    pub fn with_carrier_offset(mut self, carrier_offset_hz: f32) -> Self {
        self.carrier_offset_hz = Some(carrier_offset_hz);
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::error::EncodeError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::error::DecodeError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        Ok(msg)
    }
}
