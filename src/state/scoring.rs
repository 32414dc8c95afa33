//! Pure scoring math: speed-ranked points per correct answer and the
//! question-progression multiplier.
//!
//! Everything here is deterministic given its inputs; the room state owns the
//! ledger these numbers are derived from.

/// Maximum base score, awarded to the fastest correct responder.
const MAX_BASE_SCORE: f64 = 100.0;
/// Base-score decay per rank (rank 2 gets 90, rank 3 gets 80, ...).
const RANK_DECAY: f64 = 0.10;
/// Maximum latency penalty across the full answer window.
const TIME_PENALTY: f64 = 0.12;
/// Answer window the latency penalty is normalized against, in seconds.
const TIME_WINDOW_SECS: f64 = 15.0;
/// Floor for the latency coefficient, however late the answer lands.
const TIME_FLOOR: f64 = 0.85;

/// Multiplier applied on top of speed points as a game progresses.
///
/// The first half of the questions play at 1x, the next 30% at 2x, and the
/// final 20% at 4x. `question_number` is 1-indexed; questions sitting exactly
/// on a threshold belong to the lower band.
pub fn progression_multiplier(total_questions: usize, question_number: usize) -> i64 {
    let threshold_2x = (total_questions as f64 * 0.5).floor() as usize;
    let threshold_4x = (total_questions as f64 * 0.8).floor() as usize;

    if question_number <= threshold_2x {
        1
    } else if question_number <= threshold_4x {
        2
    } else {
        4
    }
}

/// Points for one correct responder, before the progression multiplier.
///
/// `rank` is the responder's 1-indexed position among all correct responders
/// ordered by answer time; `delta_seconds` is the gap to the fastest correct
/// responder. The base score decays 10% per rank and is clamped at zero so a
/// correct answer never costs points. The latency coefficient loses up to 12%
/// across the answer window but never drops below 0.85.
pub fn speed_points(rank: usize, delta_seconds: f64) -> i64 {
    let base = (MAX_BASE_SCORE * (1.0 - RANK_DECAY * (rank as f64 - 1.0))).max(0.0);
    let time_factor = (1.0 - TIME_PENALTY * (delta_seconds / TIME_WINDOW_SECS)).max(TIME_FLOOR);

    (base * time_factor).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplier_bands_for_ten_questions() {
        let bands: Vec<i64> = (1..=10)
            .map(|n| progression_multiplier(10, n))
            .collect();
        assert_eq!(bands, vec![1, 1, 1, 1, 1, 2, 2, 2, 4, 4]);
    }

    #[test]
    fn multiplier_is_monotone_and_bounded() {
        for total in 1..=30 {
            let mut previous = 0;
            for n in 1..=total {
                let m = progression_multiplier(total, n);
                assert!(matches!(m, 1 | 2 | 4), "unexpected multiplier {m}");
                assert!(m >= previous, "multiplier decreased at question {n}/{total}");
                previous = m;
            }
        }
    }

    #[test]
    fn threshold_questions_stay_in_lower_band() {
        // 10 questions: thresholds land exactly on 5 and 8.
        assert_eq!(progression_multiplier(10, 5), 1);
        assert_eq!(progression_multiplier(10, 6), 2);
        assert_eq!(progression_multiplier(10, 8), 2);
        assert_eq!(progression_multiplier(10, 9), 4);
    }

    #[test]
    fn fastest_responder_gets_full_score() {
        assert_eq!(speed_points(1, 0.0), 100);
    }

    #[test]
    fn base_score_strictly_decreases_with_rank() {
        let mut previous = i64::MAX;
        for rank in 1..=10 {
            let points = speed_points(rank, 0.0);
            assert!(points < previous, "rank {rank} did not decrease");
            previous = points;
        }
    }

    #[test]
    fn base_score_clamps_at_zero_for_deep_ranks() {
        assert_eq!(speed_points(11, 0.0), 0);
        assert_eq!(speed_points(25, 0.0), 0);
    }

    #[test]
    fn five_second_gap_at_rank_two_scores_86() {
        // coefficient = max(1 - 0.12 * (5/15), 0.85) = 0.96, base = 90.
        assert_eq!(speed_points(2, 5.0), 86);
    }

    #[test]
    fn latency_coefficient_is_floored() {
        // Way past the window the coefficient stays at 0.85.
        assert_eq!(speed_points(1, 120.0), 85);
    }
}
