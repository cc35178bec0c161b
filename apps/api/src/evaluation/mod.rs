//! Evaluation: classification metrics for a model scored against labeled samples.
//!
//! Every ratio is derived from the confusion matrix and is 0.0 when its denominator is 0.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::models::model::{ConfusionMatrix, ModelMetrics};

/// Scores at or above this count as a predicted match.
pub const DECISION_THRESHOLD: f64 = 0.5;

pub fn confusion_matrix(scores: &[f64], labels: &[bool], threshold: f64) -> ConfusionMatrix {
    let mut cm = ConfusionMatrix::default();
    for (score, label) in scores.iter().zip(labels) {
        match (*score >= threshold, *label) {
            (true, true) => cm.true_positives += 1,
            (true, false) => cm.false_positives += 1,
            (false, false) => cm.true_negatives += 1,
            (false, true) => cm.false_negatives += 1,
        }
    }
    cm
}

pub fn compute_metrics(scores: &[f64], labels: &[bool], evaluated_at: DateTime<Utc>) -> ModelMetrics {
    let cm = confusion_matrix(scores, labels, DECISION_THRESHOLD);
    let tp = cm.true_positives as f64;
    let fp = cm.false_positives as f64;
    let tn = cm.true_negatives as f64;
    let fn_ = cm.false_negatives as f64;

    let accuracy = safe_div(tp + tn, cm.total() as f64);
    let precision = safe_div(tp, tp + fp);
    let recall = safe_div(tp, tp + fn_);
    let f1_score = safe_div(2.0 * precision * recall, precision + recall);

    ModelMetrics {
        accuracy,
        precision,
        recall,
        f1_score,
        auc_roc: auc_roc(scores, labels),
        confusion_matrix: cm,
        evaluated_at,
    }
}

pub fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Rank-sum (Mann–Whitney) AUC with average ranks for ties.
/// 0.0 when either class is absent.
pub fn auc_roc(scores: &[f64], labels: &[bool]) -> f64 {
    let n = scores.len().min(labels.len());
    let positives = labels[..n].iter().filter(|l| **l).count();
    let negatives = n - positives;
    if positives == 0 || negatives == 0 {
        return 0.0;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|a, b| scores[*a].partial_cmp(&scores[*b]).unwrap_or(Ordering::Equal));

    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // ranks are 1-based; tied block i..=j shares the average rank
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for idx in &order[i..=j] {
            if labels[*idx] {
                rank_sum_pos += avg_rank;
            }
        }
        i = j + 1;
    }

    let p = positives as f64;
    let q = negatives as f64;
    (rank_sum_pos - p * (p + 1.0) / 2.0) / (p * q)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_match_confusion_matrix() {
        // tp=2 fp=1 tn=1 fn=1
        let scores = [0.9, 0.8, 0.7, 0.2, 0.1];
        let labels = [true, true, false, true, false];
        let m = compute_metrics(&scores, &labels, Utc::now());
        let cm = m.confusion_matrix;
        assert_eq!(
            (cm.true_positives, cm.false_positives, cm.true_negatives, cm.false_negatives),
            (2, 1, 1, 1)
        );
        assert!((m.accuracy - 3.0 / 5.0).abs() < 1e-12);
        assert!((m.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.recall - 2.0 / 3.0).abs() < 1e-12);
        let expected_f1 = 2.0 * m.precision * m.recall / (m.precision + m.recall);
        assert!((m.f1_score - expected_f1).abs() < 1e-12);
    }

    #[test]
    fn test_zero_denominators_yield_zero() {
        // nothing predicted positive, no positive labels
        let m = compute_metrics(&[0.1, 0.2], &[false, false], Utc::now());
        assert_eq!(m.precision, 0.0);
        assert_eq!(m.recall, 0.0);
        assert_eq!(m.f1_score, 0.0);
        assert_eq!(m.auc_roc, 0.0);
        assert!(!m.f1_score.is_nan());
        assert_eq!(m.accuracy, 1.0);
    }

    #[test]
    fn test_empty_input_is_all_zero() {
        let m = compute_metrics(&[], &[], Utc::now());
        assert_eq!(m.accuracy, 0.0);
        assert_eq!(m.confusion_matrix.total(), 0);
    }

    #[test]
    fn test_auc_perfect_and_inverted() {
        let labels = [false, false, true, true];
        assert!((auc_roc(&[0.1, 0.2, 0.8, 0.9], &labels) - 1.0).abs() < 1e-12);
        assert!(auc_roc(&[0.9, 0.8, 0.2, 0.1], &labels).abs() < 1e-12);
    }

    #[test]
    fn test_auc_all_tied_is_half() {
        let auc = auc_roc(&[0.5, 0.5, 0.5, 0.5], &[true, false, true, false]);
        assert!((auc - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let cm = confusion_matrix(&[0.5], &[true], DECISION_THRESHOLD);
        assert_eq!(cm.true_positives, 1);
    }
}
