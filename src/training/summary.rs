use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::metrics::EvalMetrics;

pub const SUMMARY_FILE: &str = "summaries.jsonl";

/// One line of `summaries.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SummaryRecord {
    Train {
        step: usize,
        loss: f64,
        learning_rate: f64,
        elapsed_secs: f64,
    },
    Eval {
        name: String,
        step: usize,
        /// `null` when the split had no examples.
        loss: Option<f64>,
        accuracy: f64,
        macro_f1: f64,
        num_examples: usize,
    },
}

/// Appends training and evaluation summaries as JSON lines.
pub struct SummaryWriter {
    path: PathBuf,
    file: File,
    started: Instant,
}

impl SummaryWriter {
    pub fn create(model_dir: &Path) -> Result<Self> {
        fs::create_dir_all(model_dir)
            .with_context(|| format!("Failed to create model directory: {:?}", model_dir))?;

        let path = model_dir.join(SUMMARY_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open summary file: {:?}", path))?;

        Ok(Self {
            path,
            file,
            started: Instant::now(),
        })
    }

    pub fn train(&mut self, step: usize, loss: f64, learning_rate: f64) -> Result<()> {
        let record = SummaryRecord::Train {
            step,
            loss,
            learning_rate,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
        };
        self.write(&record)
    }

    pub fn eval(&mut self, metrics: &EvalMetrics) -> Result<()> {
        let record = SummaryRecord::Eval {
            name: metrics.name.clone(),
            step: metrics.step,
            loss: metrics.loss,
            accuracy: metrics.accuracy,
            macro_f1: metrics.macro_f1,
            num_examples: metrics.num_examples,
        };
        self.write(&record)
    }

    fn write(&mut self, record: &SummaryRecord) -> Result<()> {
        let line = serde_json::to_string(record).with_context(|| "Failed to serialize summary")?;
        writeln!(self.file, "{}", line)
            .with_context(|| format!("Failed to append summary to {:?}", self.path))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read back every record of a summary file. Blank lines are ignored; any
/// other line that does not parse is an error.
pub fn read_summaries(path: &Path) -> Result<Vec<SummaryRecord>> {
    let file = File::open(path).with_context(|| format!("Failed to open summaries: {:?}", path))?;
    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read summaries: {:?}", path))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("Malformed summary at {:?} line {}", path, idx + 1))?;
        records.push(record);
    }
    Ok(records)
}
