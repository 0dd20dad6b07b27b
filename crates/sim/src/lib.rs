//! simulation tools for chanemu

pub mod scenarios;

use std::path::Path;
use std::time::Duration;
use chanemu::{EmulatorConfig, PaddingConfig};

pub struct EmulatorPresets;

impl EmulatorPresets {
    /// Two channels, no padding, 5 MHz LTE numerology.
    pub fn clean(pipe_base: &Path) -> EmulatorConfig {
        EmulatorConfig {
            nof_channels: 2,
            pipe_base: pipe_base.to_path_buf(),
            subframe_length: 5760,
            nof_prb: 25,
            padding: PaddingConfig::default(),
            reconfig_poll: Duration::from_millis(50),
            seed: Some(0x5eed),
            ..Default::default()
        }
    }

    /// 1.4 MHz LTE: 6 PRB, 1.92 Msps.
    pub fn narrowband(pipe_base: &Path) -> EmulatorConfig {
        EmulatorConfig {
            subframe_length: 1920,
            nof_prb: 6,
            ..Self::clean(pipe_base)
        }
    }

    /// Every burst rounded up to whole subframes.
    pub fn aligned(pipe_base: &Path) -> EmulatorConfig {
        EmulatorConfig {
            padding: PaddingConfig {
                align_to_subframe: true,
                ..Default::default()
            },
            ..Self::narrowband(pipe_base)
        }
    }

    /// Random leading and trailing silence with the prefix's airtime slept
    /// out, the way an idle radio looks to the receiver.
    pub fn bursty(pipe_base: &Path) -> EmulatorConfig {
        EmulatorConfig {
            padding: PaddingConfig {
                random_prefix: true,
                prefix_delay: true,
                random_suffix: true,
                align_to_subframe: true,
                ..Default::default()
            },
            ..Self::narrowband(pipe_base)
        }
    }
}
