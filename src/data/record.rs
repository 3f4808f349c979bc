use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::path::Path;
use tracing::{debug, info};

use crate::error::NliError;

/// Gold label of a claim. Indices are shared by NLI and FEVER naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawLabel", into = "String")]
pub enum Label {
    /// `SUPPORTS` / entailment
    Supports,
    /// `REFUTES` / contradiction
    Refutes,
    /// `NOT ENOUGH INFO` / neutral
    NotEnoughInfo,
}

impl Label {
    pub const COUNT: usize = 3;

    pub fn index(self) -> usize {
        match self {
            Label::Supports => 0,
            Label::Refutes => 1,
            Label::NotEnoughInfo => 2,
        }
    }

    pub fn from_index(index: i64) -> Result<Self, NliError> {
        match index {
            0 => Ok(Label::Supports),
            1 => Ok(Label::Refutes),
            2 => Ok(Label::NotEnoughInfo),
            other => Err(NliError::UnknownLabel(other.to_string())),
        }
    }

    pub fn parse(text: &str) -> Result<Self, NliError> {
        let normalized = text.trim().to_ascii_lowercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "supports" | "entailment" => Ok(Label::Supports),
            "refutes" | "contradiction" => Ok(Label::Refutes),
            "not enough info" | "nei" | "neutral" => Ok(Label::NotEnoughInfo),
            _ => match normalized.parse::<i64>() {
                Ok(index) => Self::from_index(index),
                Err(_) => Err(NliError::UnknownLabel(text.to_string())),
            },
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Label::Supports => "SUPPORTS",
            Label::Refutes => "REFUTES",
            Label::NotEnoughInfo => "NOT ENOUGH INFO",
        };
        f.write_str(name)
    }
}

impl From<Label> for String {
    fn from(label: Label) -> Self {
        label.to_string()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLabel {
    Index(i64),
    Text(String),
}

impl TryFrom<RawLabel> for Label {
    type Error = NliError;

    fn try_from(raw: RawLabel) -> Result<Self, Self::Error> {
        match raw {
            RawLabel::Index(index) => Label::from_index(index),
            RawLabel::Text(text) => Label::parse(&text),
        }
    }
}

/// One claim with its evidence sentences, as stored in an NLI JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub claim: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    pub label: Label,
}

/// Read a JSON array of claim objects.
pub fn load_nli(path: &Path) -> Result<Vec<ClaimRecord>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read NLI file: {:?}", path))?;

    let records: Vec<ClaimRecord> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse NLI JSON: {:?}", path))?;

    info!("Loaded {} claims from {:?}", records.len(), path);
    Ok(records)
}

/// Separator between evidence sentences inside a single FEVER CSV cell.
pub const FEVER_EVIDENCE_SEPARATOR: &str = "|||";

#[derive(Debug, Deserialize)]
struct FeverRow {
    claim: String,
    #[serde(default)]
    evidence: String,
    label: String,
}

impl TryFrom<FeverRow> for ClaimRecord {
    type Error = NliError;

    fn try_from(row: FeverRow) -> Result<Self, Self::Error> {
        let evidence = row
            .evidence
            .split(FEVER_EVIDENCE_SEPARATOR)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Ok(ClaimRecord {
            claim: row.claim,
            evidence,
            label: Label::parse(&row.label)?,
        })
    }
}

/// Reads a FEVER CSV file `chunk_size` records at a time.
///
/// The last chunk holds whatever remains, so it may be shorter.
pub struct FeverChunks {
    rows: csv::DeserializeRecordsIntoIter<File, FeverRow>,
    chunk_size: usize,
    line: usize,
}

impl FeverChunks {
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            anyhow::bail!(NliError::InvalidConfig("chunk_size must be > 0".into()));
        }

        let reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .with_context(|| format!("Failed to open FEVER file: {:?}", path))?;

        Ok(Self {
            rows: reader.into_deserialize(),
            chunk_size,
            line: 1,
        })
    }
}

impl Iterator for FeverChunks {
    type Item = Result<Vec<ClaimRecord>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut chunk = Vec::with_capacity(self.chunk_size);

        while chunk.len() < self.chunk_size {
            let Some(row) = self.rows.next() else {
                break;
            };
            self.line += 1;

            let record = row
                .with_context(|| format!("Malformed FEVER row at line {}", self.line))
                .and_then(|row| {
                    ClaimRecord::try_from(row)
                        .with_context(|| format!("Invalid FEVER row at line {}", self.line))
                });

            match record {
                Ok(record) => chunk.push(record),
                Err(e) => return Some(Err(e)),
            }
        }

        if chunk.is_empty() {
            None
        } else {
            debug!("Read FEVER chunk of {} records", chunk.len());
            Some(Ok(chunk))
        }
    }
}

/// Load an entire FEVER CSV file, reading it chunk by chunk.
pub fn load_fever(path: &Path, chunk_size: usize) -> Result<Vec<ClaimRecord>> {
    let mut records = Vec::new();
    for chunk in FeverChunks::open(path, chunk_size)? {
        records.extend(chunk?);
    }

    info!("Loaded {} claims from {:?}", records.len(), path);
    Ok(records)
}
