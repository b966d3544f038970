// src/perception/zones.rs
//
// Partition tracked point motion into left/center/right thirds plus the
// upper-center probe band used by the flat-wall fallback.

/// Probe band measurement: mean magnitude and how many tracked points fell
/// inside the band. The count gates the flat-wall heuristic.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProbeReading {
    pub magnitude: f64,
    pub feature_count: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ZoneFlow {
    pub left: f64,
    pub center: f64,
    pub right: f64,
    pub probe: ProbeReading,
    pub flow_std: f64,
    pub feature_count: usize,
}

/// Mean per-zone flow magnitudes for one frame. Magnitudes are rate-normalized
/// (pixels/second) so decision thresholds stay frame-rate-invariant. Empty
/// zones report 0.
pub fn extract_zones(
    points: &[(f32, f32)],
    vectors: &[(f32, f32)],
    dt: f64,
    width: f32,
    height: f32,
    probe_fraction: f64,
) -> ZoneFlow {
    let dt = dt.max(1e-6);
    let left_edge = width / 3.0;
    let right_edge = 2.0 * width / 3.0;
    let probe_edge = height * probe_fraction as f32;

    let mut sums = [0.0f64; 3];
    let mut counts = [0usize; 3];
    let mut probe_sum = 0.0;
    let mut probe_count = 0usize;
    let mut magnitudes = Vec::with_capacity(points.len());

    for (&(x, y), &(dx, dy)) in points.iter().zip(vectors) {
        let magnitude = ((dx as f64).powi(2) + (dy as f64).powi(2)).sqrt() / dt;
        magnitudes.push(magnitude);

        let zone = if x < left_edge {
            0
        } else if x < right_edge {
            1
        } else {
            2
        };
        sums[zone] += magnitude;
        counts[zone] += 1;

        if zone == 1 && y < probe_edge {
            probe_sum += magnitude;
            probe_count += 1;
        }
    }

    let mean = |sum: f64, count: usize| if count == 0 { 0.0 } else { sum / count as f64 };

    ZoneFlow {
        left: mean(sums[0], counts[0]),
        center: mean(sums[1], counts[1]),
        right: mean(sums[2], counts[2]),
        probe: ProbeReading {
            magnitude: mean(probe_sum, probe_count),
            feature_count: probe_count,
        },
        flow_std: magnitude_std(&magnitudes),
        feature_count: points.len(),
    }
}

/// Population standard deviation, the flow-reliability signal.
pub fn magnitude_std(magnitudes: &[f64]) -> f64 {
    if magnitudes.is_empty() {
        return 0.0;
    }
    let n = magnitudes.len() as f64;
    let mean = magnitudes.iter().sum::<f64>() / n;
    let variance = magnitudes.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}
