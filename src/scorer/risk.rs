use crate::config::{risk_thresholds, score_weights};
use crate::types::{RiskLevel, RiskRecord, WalletMetrics};

/// Score a wallet's rolling metrics. Pure and deterministic — no clock, no
/// I/O; `evaluated_at_ns` is supplied by the caller.
pub fn evaluate(metrics: &WalletMetrics, evaluated_at_ns: i64) -> RiskRecord {
    let risk_score = compute_score(metrics);
    let risk_level = classify(risk_score);
    let message = risk_message(risk_score, metrics);

    RiskRecord {
        wallet: metrics.wallet.clone(),
        risk_score,
        risk_level,
        message,
        metrics: metrics.clone(),
        evaluated_at_ns,
    }
}

/// Weighted blend of frequency, average stake, and loss streak,
/// clamped to [0, 100].
pub fn compute_score(metrics: &WalletMetrics) -> f64 {
    let raw = (f64::from(metrics.bet_frequency) * score_weights::FREQUENCY
        + metrics.avg_bet_size * score_weights::AVG_SIZE
        + f64::from(metrics.loss_streak) * score_weights::LOSS_STREAK)
        / score_weights::DIVISOR;
    raw.clamp(0.0, 100.0)
}

/// Only the MEDIUM and HIGH boundaries gate the three levels.
pub fn classify(score: f64) -> RiskLevel {
    if score >= risk_thresholds::HIGH {
        RiskLevel::High
    } else if score >= risk_thresholds::MEDIUM {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Threshold-driven operator message. High enumerates every metric and asks
/// the bettor to slow down; medium omits the loss streak and softens the
/// recommendation; low is a static reassurance.
fn risk_message(score: f64, metrics: &WalletMetrics) -> String {
    if score >= risk_thresholds::HIGH {
        format!(
            "High Risk Alert:\n\
             • You've placed {} bets in the last 24 hours\n\
             • Your average bet size is {:.2}\n\
             • Total volume wagered: {:.2}\n\
             • Current loss streak: {}\n\
             Consider taking a break or setting lower betting limits.",
            metrics.bet_frequency,
            metrics.avg_bet_size,
            metrics.total_volume_24h,
            metrics.loss_streak,
        )
    } else if score >= risk_thresholds::MEDIUM {
        format!(
            "Risk Warning:\n\
             • Betting frequency has increased\n\
             • Average bet size: {:.2}\n\
             • Total volume wagered: {:.2}\n\
             Consider your betting patterns and stay within comfortable limits.",
            metrics.avg_bet_size, metrics.total_volume_24h,
        )
    } else {
        "Low risk level. Enjoy responsible betting!".to_string()
    }
}

/// Combined per-bet score. The participant term alone is halved when a
/// participant is present; the creator score always passes through at full
/// weight. This mirrors the upstream system's arithmetic exactly — see
/// DESIGN.md for the recorded decision.
pub fn combined_score(creator_score: f64, participant_score: Option<f64>) -> f64 {
    match participant_score {
        Some(p) => creator_score + p / 2.0,
        None => creator_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(frequency: u32, avg: f64, streak: u32) -> WalletMetrics {
        WalletMetrics {
            wallet: "0xa".to_string(),
            bet_frequency: frequency,
            total_volume_24h: avg * f64::from(frequency),
            avg_bet_size: avg,
            loss_streak: streak,
            last_updated_ns: 0,
        }
    }

    #[test]
    fn five_small_bets_score_low() {
        // freq=5, avg=3, streak=0 → (50 + 15 + 0)/3 = 21.67
        let score = compute_score(&metrics(5, 3.0, 0));
        assert!((score - 21.666_666_666_666_668).abs() < 1e-9);
        assert_eq!(classify(score), RiskLevel::Low);
    }

    #[test]
    fn heavy_day_with_streak_scores_medium() {
        // freq=10, avg=10, streak=4 → (100 + 50 + 60)/3 = 70
        let score = compute_score(&metrics(10, 10.0, 4));
        assert!((score - 70.0).abs() < 1e-9);
        assert_eq!(classify(score), RiskLevel::Medium);
    }

    #[test]
    fn empty_window_scores_zero_with_static_message() {
        let record = evaluate(&metrics(0, 0.0, 0), 42);
        assert_eq!(record.risk_score, 0.0);
        assert_eq!(record.risk_level, RiskLevel::Low);
        assert_eq!(record.message, "Low risk level. Enjoy responsible betting!");
        assert_eq!(record.evaluated_at_ns, 42);
    }

    #[test]
    fn score_is_clamped_to_100() {
        let score = compute_score(&metrics(1000, 500.0, 50));
        assert_eq!(score, 100.0);
        assert_eq!(classify(score), RiskLevel::High);
    }

    #[test]
    fn score_stays_in_range_for_arbitrary_inputs() {
        for freq in [0u32, 1, 7, 50, 10_000] {
            for avg in [0.0, 0.5, 3.0, 250.0, 1e9] {
                for streak in [0u32, 1, 4, 99] {
                    let score = compute_score(&metrics(freq, avg, streak));
                    assert!((0.0..=100.0).contains(&score), "score={score}");
                }
            }
        }
    }

    #[test]
    fn high_message_enumerates_all_metrics() {
        let m = metrics(20, 15.0, 6);
        let record = evaluate(&m, 0);
        assert_eq!(record.risk_level, RiskLevel::High);
        assert!(record.message.contains("20 bets"));
        assert!(record.message.contains("15.00"));
        assert!(record.message.contains("loss streak: 6"));
        assert!(record.message.contains("taking a break"));
    }

    #[test]
    fn medium_message_omits_loss_streak() {
        let m = metrics(10, 10.0, 4);
        let record = evaluate(&m, 0);
        assert_eq!(record.risk_level, RiskLevel::Medium);
        assert!(!record.message.contains("loss streak"));
        assert!(record.message.contains("comfortable limits"));
    }

    #[test]
    fn boundary_scores_classify_upward() {
        assert_eq!(classify(59.999), RiskLevel::Low);
        assert_eq!(classify(60.0), RiskLevel::Medium);
        assert_eq!(classify(79.999), RiskLevel::Medium);
        assert_eq!(classify(80.0), RiskLevel::High);
    }

    #[test]
    fn combined_score_halves_participant_term_only() {
        assert_eq!(combined_score(50.0, Some(40.0)), 70.0);
        assert_eq!(combined_score(50.0, None), 50.0);
    }

    #[test]
    fn determinism() {
        let m = metrics(8, 12.5, 2);
        assert_eq!(evaluate(&m, 7).risk_score, evaluate(&m, 7).risk_score);
        assert_eq!(evaluate(&m, 7).message, evaluate(&m, 7).message);
    }
}
