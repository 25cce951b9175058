use std::collections::VecDeque;

use crate::db::QualityLabel;

/// Tunable thresholds for the IAQ quality flag.
#[derive(Debug, Clone)]
pub struct QualityConfig {
    /// Most recent readings kept (~2 minutes at 1 Hz).
    pub window_capacity: usize,

    /// Readings required before variability is judged at all.
    pub min_samples: usize,

    /// Population standard deviation above which the stream is `unstable`.
    pub max_std_dev: f64,

    /// Lowest sensor accuracy code that counts as settled.
    pub min_confidence: i64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            window_capacity: 120,
            min_samples: 30,
            max_std_dev: 5.0,
            min_confidence: 2,
        }
    }
}

/// Rolling IAQ window for one run. A new run gets a fresh evaluator.
#[derive(Debug, Clone)]
pub struct QualityEvaluator {
    config: QualityConfig,
    window: VecDeque<f64>,
}

impl Default for QualityEvaluator {
    fn default() -> Self {
        Self::new(QualityConfig::default())
    }
}

impl QualityEvaluator {
    pub fn new(config: QualityConfig) -> Self {
        let window = VecDeque::with_capacity(config.window_capacity);
        Self { config, window }
    }

    pub fn evaluate(&mut self, confidence: Option<i64>, value: Option<f64>) -> QualityLabel {
        match confidence {
            Some(code) if code >= self.config.min_confidence => {}
            _ => return QualityLabel::LowAccuracy,
        }

        if let Some(value) = value.filter(|v| v.is_finite()) {
            self.push(value);
        }

        if self.window.len() >= self.config.min_samples
            && population_std_dev(&self.window) > self.config.max_std_dev
        {
            return QualityLabel::Unstable;
        }

        QualityLabel::Ok
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    fn push(&mut self, value: f64) {
        self.window.push_back(value);
        while self.window.len() > self.config.window_capacity {
            self.window.pop_front();
        }
    }
}

fn population_std_dev(values: &VecDeque<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alternating(evaluator: &mut QualityEvaluator, count: usize) -> QualityLabel {
        let mut label = QualityLabel::Ok;
        for i in 0..count {
            let value = if i % 2 == 0 { 0.0 } else { 100.0 };
            label = evaluator.evaluate(Some(3), Some(value));
        }
        label
    }

    #[test]
    fn low_or_missing_confidence_overrides_everything() {
        let mut evaluator = QualityEvaluator::default();
        alternating(&mut evaluator, 60);

        for code in [None, Some(-1), Some(0), Some(1)] {
            assert_eq!(
                evaluator.evaluate(code, Some(500.0)),
                QualityLabel::LowAccuracy
            );
        }
    }

    #[test]
    fn never_unstable_below_min_samples() {
        let mut evaluator = QualityEvaluator::default();
        for i in 0..29 {
            let value = if i % 2 == 0 { 0.0 } else { 1000.0 };
            assert_eq!(evaluator.evaluate(Some(3), Some(value)), QualityLabel::Ok);
        }
        assert_eq!(evaluator.len(), 29);
    }

    #[test]
    fn noisy_stream_becomes_unstable_at_thirty_samples() {
        let mut evaluator = QualityEvaluator::default();
        assert_eq!(alternating(&mut evaluator, 29), QualityLabel::Ok);
        assert_eq!(alternating(&mut evaluator, 1), QualityLabel::Unstable);
    }

    #[test]
    fn constant_stream_is_always_ok() {
        let mut evaluator = QualityEvaluator::default();
        for _ in 0..300 {
            assert_eq!(evaluator.evaluate(Some(2), Some(42.0)), QualityLabel::Ok);
        }
    }

    #[test]
    fn window_is_bounded_and_forgets_old_noise() {
        let mut evaluator = QualityEvaluator::default();
        assert_eq!(alternating(&mut evaluator, 40), QualityLabel::Unstable);

        let mut label = QualityLabel::Unstable;
        for _ in 0..120 {
            label = evaluator.evaluate(Some(3), Some(50.0));
        }
        assert_eq!(evaluator.len(), 120);
        assert_eq!(label, QualityLabel::Ok);
    }

    #[test]
    fn missing_value_still_gets_a_label() {
        let mut evaluator = QualityEvaluator::default();
        assert_eq!(evaluator.evaluate(Some(3), None), QualityLabel::Ok);
        assert_eq!(evaluator.evaluate(Some(3), Some(f64::NAN)), QualityLabel::Ok);
        assert!(evaluator.is_empty());
    }

    #[test]
    fn low_confidence_readings_are_not_buffered() {
        let mut evaluator = QualityEvaluator::default();
        evaluator.evaluate(Some(1), Some(10.0));
        evaluator.evaluate(None, Some(10.0));
        assert!(evaluator.is_empty());
    }
}
