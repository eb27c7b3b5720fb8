use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::{
    data::Label,
    error::{PipelineError, Result},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

/// Per-class precision/recall/F1 plus accuracy and averages.
#[derive(Debug, Clone)]
pub struct ClassificationReport {
    /// Indexed by [`Label::to_index`].
    pub classes: [ClassMetrics; 2],
    pub accuracy: f64,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
    /// `confusion_matrix[actual][predicted]`.
    pub confusion_matrix: [[usize; 2]; 2],
}

impl ClassificationReport {
    pub fn calculate(predictions: &[Label], targets: &[Label]) -> Self {
        let mut confusion_matrix = [[0usize; 2]; 2];
        for (pred, target) in predictions.iter().zip(targets) {
            confusion_matrix[target.to_index()][pred.to_index()] += 1;
        }

        let total: usize = confusion_matrix.iter().flatten().sum();
        let correct = confusion_matrix[0][0] + confusion_matrix[1][1];

        let classes = Label::ALL.map(|label| {
            let c = label.to_index();
            let tp = confusion_matrix[c][c];
            let predicted = confusion_matrix[0][c] + confusion_matrix[1][c];
            let support = confusion_matrix[c][0] + confusion_matrix[c][1];

            let precision = ratio(tp, predicted, || {
                warn!("precision for {} is ill-defined: no predicted samples", label.name())
            });
            let recall = ratio(tp, support, || {
                warn!("recall for {} is ill-defined: no true samples", label.name())
            });
            let f1_score = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };

            ClassMetrics {
                precision,
                recall,
                f1_score,
                support,
            }
        });

        let accuracy = if total > 0 {
            correct as f64 / total as f64
        } else {
            0.0
        };

        let macro_avg = average(&classes, [1.0, 1.0], total);
        let weighted_avg = average(&classes, classes.map(|m| m.support as f64), total);

        Self {
            classes,
            accuracy,
            macro_avg,
            weighted_avg,
            confusion_matrix,
        }
    }

    pub fn class(&self, label: Label) -> &ClassMetrics {
        &self.classes[label.to_index()]
    }

    pub fn print_summary(&self) {
        println!("{self}");
        println!("Confusion Matrix:");
        println!("                Predicted");
        println!("                M     F");
        println!(
            "Actual  M     {:4}  {:4}",
            self.confusion_matrix[0][0], self.confusion_matrix[0][1]
        );
        println!(
            "        F     {:4}  {:4}",
            self.confusion_matrix[1][0], self.confusion_matrix[1][1]
        );
    }
}

fn average(classes: &[ClassMetrics; 2], weights: [f64; 2], support: usize) -> ClassMetrics {
    let norm: f64 = weights.iter().sum();
    let mean = |values: [f64; 2]| {
        if norm > 0.0 {
            values.iter().zip(weights).map(|(v, w)| v * w).sum::<f64>() / norm
        } else {
            0.0
        }
    };
    ClassMetrics {
        precision: mean(classes.map(|m| m.precision)),
        recall: mean(classes.map(|m| m.recall)),
        f1_score: mean(classes.map(|m| m.f1_score)),
        support,
    }
}

fn ratio(numerator: usize, denominator: usize, on_zero: impl FnOnce()) -> f64 {
    if denominator > 0 {
        numerator as f64 / denominator as f64
    } else {
        on_zero();
        0.0
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let row = |f: &mut fmt::Formatter<'_>, name: &str, m: &ClassMetrics| {
            writeln!(
                f,
                "{:>12} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                name, m.precision, m.recall, m.f1_score, m.support
            )
        };

        writeln!(f, "{:>12} {:>9} {:>9} {:>9} {:>9}", "", "precision", "recall", "f1-score", "support")?;
        writeln!(f)?;
        for label in Label::ALL {
            row(f, label.name(), self.class(label))?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>12} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        row(f, "macro avg", &self.macro_avg)?;
        row(f, "weighted avg", &self.weighted_avg)
    }
}

/// Area under the ROC curve for class [`Label::Female`], computed from rank
/// sums with tied scores sharing their average rank.
pub fn roc_auc(scores: &[f32], targets: &[Label]) -> Result<f64> {
    let positives = targets.iter().filter(|l| **l == Label::Female).count();
    let negatives = targets.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(PipelineError::SingleClass);
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut positive_rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // ranks are 1-based; a tie group shares the mean of its ranks
        let mean_rank = (start + end + 1) as f64 / 2.0;
        positive_rank_sum += order[start..end]
            .iter()
            .filter(|&&idx| targets[idx] == Label::Female)
            .count() as f64
            * mean_rank;
        start = end;
    }

    let (p, n) = (positives as f64, negatives as f64);
    Ok((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

/// Metrics of one completed epoch. Non-finite values are stored as JSON
/// `null` and read back as NaN.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// 1-based.
    pub epoch: usize,
    #[serde(with = "nan_as_null")]
    pub train_loss: f64,
    #[serde(with = "nan_as_null")]
    pub train_accuracy: f64,
    #[serde(with = "nan_as_null")]
    pub val_loss: f64,
    #[serde(with = "nan_as_null")]
    pub val_accuracy: f64,
}

mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}

/// Per-epoch records in training order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    records: Vec<EpochRecord>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, record: EpochRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[EpochRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn series(&self, field: fn(&EpochRecord) -> f64) -> Vec<f64> {
        self.records.iter().map(field).collect()
    }

    pub fn best_epoch(&self) -> Option<&EpochRecord> {
        self.records
            .iter()
            .filter(|r| !r.val_accuracy.is_nan())
            .max_by(|a, b| a.val_accuracy.total_cmp(&b.val_accuracy))
    }

    pub fn print_history(&self) {
        println!("┌─────────┬────────────┬──────────────┬────────────┬──────────────┐");
        println!("│ Epoch   │ Train Loss │ Train Acc    │ Val Loss   │ Val Acc      │");
        println!("├─────────┼────────────┼──────────────┼────────────┼──────────────┤");

        for record in &self.records {
            println!(
                "│ {:7} │ {:10.4} │ {:12.4} │ {:10.4} │ {:12.4} │",
                record.epoch,
                record.train_loss,
                record.train_accuracy,
                record.val_loss,
                record.val_accuracy
            );
        }
        println!("└─────────┴────────────┴──────────────┴────────────┴──────────────┘");

        if let Some(best) = self.best_epoch() {
            println!(
                "Best epoch: {} with validation accuracy: {:.2}%",
                best.epoch,
                best.val_accuracy * 100.0
            );
        }
    }
}
