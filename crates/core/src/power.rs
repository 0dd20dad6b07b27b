use crate::types::Sample;

/// Mean of `|x|^2` over the buffer, 0 for an empty buffer.
pub fn avg_power(samples: &[Sample]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|s| s.norm_sqr() as f64).sum();
    (sum / samples.len() as f64) as f32
}

pub fn linear_to_db(value: f32) -> f32 {
    10.0 * value.log10()
}

pub fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 10.0)
}

/// FFT size used for a given LTE bandwidth in PRBs (non-standard, 1.92 MHz
/// multiples of 128 points). Returns `None` for unsupported PRB counts.
pub fn symbol_size(nof_prb: u32) -> Option<usize> {
    match nof_prb {
        0 => None,
        1..=6 => Some(128),
        7..=15 => Some(256),
        16..=25 => Some(384),
        26..=50 => Some(768),
        51..=75 => Some(1024),
        76..=100 => Some(1536),
        _ => None,
    }
}
