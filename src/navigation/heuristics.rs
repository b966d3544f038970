// src/navigation/heuristics.rs

/// Flat-wall fallback trigger: a wide flat obstacle produces weak parallax in
/// the narrow probe band while center flow stays strong. Requires a reliable
/// probe reading (enough features, bounded flow variance) so it cannot fire on
/// sparse or noisy data.
pub fn should_flat_wall_dodge(
    center_magnitude: f64,
    probe_magnitude: f64,
    probe_count: usize,
    min_probe_features: usize,
    flow_std: f64,
    flow_std_max: f64,
) -> bool {
    center_magnitude > 0.7
        && probe_magnitude < 0.5
        && probe_count >= min_probe_features
        && flow_std <= flow_std_max
}
