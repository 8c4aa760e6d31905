//! The single rounding rule used by every score in the crate.
//!
//! Halves always round away from zero (2.5 -> 3, -2.5 -> -3). Products are
//! first snapped to nine decimal places so that values such as `0.15 * 20`
//! (which is `2.9999999999999996` in binary) round the way they read.

const SNAP: f64 = 1e9;

pub fn round_half_up(value: f64) -> i64 {
    let snapped = (value * SNAP).round() / SNAP;
    let magnitude = (snapped.abs() + 0.5).floor();
    if snapped < 0.0 {
        -(magnitude as i64)
    } else {
        magnitude as i64
    }
}

/// round_half_up(clamp(subscore, 0, 1) * weight)，不會超過權重
pub fn bucket_score(subscore: f64, weight: u32) -> u32 {
    let clamped = if subscore.is_nan() {
        0.0
    } else {
        subscore.clamp(0.0, 1.0)
    };
    let score = round_half_up(clamped * weight as f64).max(0) as u32;
    score.min(weight)
}

/// 問卷維度：round_half_up(sum / (max_per_answer * n) * weight)
pub fn dimension_score(answers: &[u8], weight: u32, max_per_answer: u8) -> u32 {
    if answers.is_empty() || max_per_answer == 0 {
        return 0;
    }
    let sum: u32 = answers.iter().map(|a| *a as u32).sum();
    let max_possible = max_per_answer as u32 * answers.len() as u32;
    let raw_percent = sum as f64 / max_possible as f64;
    let score = round_half_up(raw_percent * weight as f64).max(0) as u32;
    score.min(weight)
}
