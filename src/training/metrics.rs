use serde::{Deserialize, Serialize};
use std::fmt;

/// `matrix[true][predicted]` counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    matrix: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn new(n_classes: usize) -> Self {
        Self {
            matrix: vec![vec![0; n_classes]; n_classes],
        }
    }

    pub fn n_classes(&self) -> usize {
        self.matrix.len()
    }

    /// Record predictions; pairs whose class is out of range are skipped.
    pub fn update(&mut self, predictions: &[usize], targets: &[usize]) {
        let n = self.n_classes();
        for (&pred, &target) in predictions.iter().zip(targets) {
            if pred < n && target < n {
                self.matrix[target][pred] += 1;
            }
        }
    }

    pub fn get(&self, target: usize, predicted: usize) -> usize {
        self.matrix[target][predicted]
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.n_classes()).map(|i| self.matrix[i][i]).sum()
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.correct(), self.total())
    }

    pub fn precision(&self, class: usize) -> f64 {
        let predicted: usize = self.matrix.iter().map(|row| row[class]).sum();
        ratio(self.matrix[class][class], predicted)
    }

    pub fn recall(&self, class: usize) -> f64 {
        let actual: usize = self.matrix[class].iter().sum();
        ratio(self.matrix[class][class], actual)
    }

    pub fn f1(&self, class: usize) -> f64 {
        let (p, r) = (self.precision(class), self.recall(class));
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    /// Unweighted mean of the per-class F1 scores.
    pub fn macro_f1(&self) -> f64 {
        let n = self.n_classes();
        if n == 0 {
            return 0.0;
        }
        (0..n).map(|c| self.f1(c)).sum::<f64>() / n as f64
    }
}

fn ratio(num: usize, denom: usize) -> f64 {
    if denom == 0 {
        0.0
    } else {
        num as f64 / denom as f64
    }
}

/// Result of one evaluation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub name: String,
    pub step: usize,
    /// Mean loss per example; `None` when nothing was evaluated.
    pub loss: Option<f64>,
    pub accuracy: f64,
    pub macro_f1: f64,
    pub num_examples: usize,
    pub confusion: ConfusionMatrix,
}

impl EvalMetrics {
    pub fn new(name: &str, step: usize, loss: Option<f64>, confusion: ConfusionMatrix) -> Self {
        Self {
            name: name.to_string(),
            step,
            loss,
            accuracy: confusion.accuracy(),
            macro_f1: confusion.macro_f1(),
            num_examples: confusion.total(),
            confusion,
        }
    }
}

impl fmt::Display for EvalMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] step {}: ", self.name, self.step)?;
        match self.loss {
            Some(loss) => write!(f, "loss = {:.6}", loss)?,
            None => f.write_str("loss = n/a")?,
        }
        write!(
            f,
            ", accuracy = {:.4}, macro-F1 = {:.4} ({} examples)",
            self.accuracy, self.macro_f1, self.num_examples
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_counts() {
        let mut cm = ConfusionMatrix::new(3);
        cm.update(&[0, 1, 2, 2, 0], &[0, 1, 1, 2, 2]);
        assert_eq!(cm.total(), 5);
        assert_eq!(cm.correct(), 3);
        assert_eq!(cm.get(1, 2), 1);
        assert!((cm.accuracy() - 0.6).abs() < 1e-9);
        assert!((cm.precision(2) - 0.5).abs() < 1e-9);
        assert!((cm.recall(1) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_macro_f1_perfect() {
        let mut cm = ConfusionMatrix::new(3);
        cm.update(&[0, 1, 2], &[0, 1, 2]);
        assert!((cm.macro_f1() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_matrix() {
        let cm = ConfusionMatrix::new(3);
        assert_eq!(cm.accuracy(), 0.0);
        assert_eq!(cm.macro_f1(), 0.0);
    }

    #[test]
    fn test_display_without_loss() {
        let metrics = EvalMetrics::new("test", 4, None, ConfusionMatrix::new(3));
        let line = metrics.to_string();
        assert!(line.contains("loss = n/a"), "{line}");
        assert!(line.ends_with("(0 examples)"));
    }
}
