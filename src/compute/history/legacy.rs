//! Plain-text evaluation log and its component index.
//!
//! The text log keeps one row per evaluated candidate but not the component
//! layout. The regions index records each candidate's components, keyed by
//! sequence index. Together they can rebuild a history when no binary
//! checkpoint is available.
//!
//! ```text
//! Entry       | Gnorm.1 (70) ... | Function (Rank) | DMA.Spread (0.2)
//! ================================================================
//! Targets     |     0 0 0 0 0 0    |      **************      |       0
//! 0           |  0.01 0.02 0.5 1.2 -8.1 0.4  |  3.25 (  1)  |  0.7
//! ================================================================
//! ```

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use log::warn;

use crate::compute::cost::CostFunction;
use crate::schema::{
    Candidate, Component, ComponentClass, Diagnostics, HARTREE_TO_EV, RegionStats, SpreadStats,
};

/// Separator written between rounds and entries.
pub const SEPARATOR: &str =
    "================================================================================";

const LOG_DELIMITERS: &[char] = &['(', ')', '|', '=', ' ', '\t'];
const TARGET_DELIMITERS: &[char] = &['(', ')', '|', '=', '*', ' ', '\t'];
const REGION_DELIMITERS: &[char] = &['(', ')', '=', ' ', '\t'];

/// Number of gradient regions stored for a reconstructed entry.
const LEGACY_REGIONS: usize = 5;

/// Errors reading the text log or the regions index.
#[derive(Debug, thiserror::Error)]
pub enum LegacyLogError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Malformed regions index line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// Contents recovered from a text log.
#[derive(Debug, Clone, Default)]
pub struct LegacyLog {
    /// Weights found in the header, in header order.
    pub weights: Vec<f64>,
    /// Targets found on the targets line, if present.
    pub targets: Option<Vec<f64>>,
    /// Reconstructed entries in log order. May contain duplicates.
    pub entries: Vec<Candidate>,
}

impl LegacyLog {
    /// Read a log and its regions index. `None` when the log is absent.
    pub fn read(log_path: &Path, regions_path: &Path) -> Result<Option<Self>, LegacyLogError> {
        if !log_path.exists() {
            return Ok(None);
        }
        let log_text = fs::read_to_string(log_path)?;
        let regions_text = if regions_path.exists() {
            fs::read_to_string(regions_path)?
        } else {
            String::new()
        };
        Self::parse(&log_text, &regions_text).map(Some)
    }

    /// Parse log and regions index text.
    pub fn parse(log_text: &str, regions_text: &str) -> Result<Self, LegacyLogError> {
        let regions = parse_regions_index(regions_text)?;
        let lines: Vec<&str> = log_text.lines().collect();

        let weights = lines.first().map(|l| header_weights(l)).unwrap_or_default();
        let targets = lines.get(2).and_then(|l| targets_row(l));

        let mut entries = Vec::new();
        for (number, line) in lines.iter().enumerate().skip(3) {
            let tokens = tokenize(line, LOG_DELIMITERS);
            if tokens.len() <= 1 {
                continue;
            }
            match parse_row(&tokens, &regions) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(reason) => warn!("Skipping log line {}: {}", number + 1, reason),
            }
        }

        Ok(Self {
            weights,
            targets,
            entries,
        })
    }

    /// Whether the recorded weights and targets match the current cost function.
    pub fn matches_cost(&self, cost: &CostFunction, dataset: usize) -> bool {
        cost.check_weights(&self.weights)
            && self
                .targets
                .as_ref()
                .is_none_or(|t| cost.check_targets(t, dataset))
    }
}

fn tokenize<'a>(line: &'a str, delimiters: &[char]) -> Vec<&'a str> {
    line.split(|c| delimiters.contains(&c))
        .filter(|t| !t.is_empty())
        .collect()
}

fn header_weights(line: &str) -> Vec<f64> {
    line.split('(')
        .skip(1)
        .filter_map(|part| part.split(')').next())
        .filter_map(|inner| inner.trim().parse().ok())
        .collect()
}

fn targets_row(line: &str) -> Option<Vec<f64>> {
    let tokens = tokenize(line, TARGET_DELIMITERS);
    if tokens.first() != Some(&"Targets") {
        return None;
    }
    Some(tokens[1..].iter().filter_map(|t| t.parse().ok()).collect())
}

fn parse_row(
    tokens: &[&str],
    regions: &HashMap<u64, Vec<Component>>,
) -> Result<Option<Candidate>, String> {
    if tokens.len() < 9 {
        return Err(format!("expected at least 9 fields, found {}", tokens.len()));
    }

    let number = |i: usize| -> Result<f64, String> {
        tokens[i]
            .parse::<f64>()
            .map_err(|e| format!("field {} ({}): {}", i, tokens[i], e))
    };

    let index: u64 = tokens[0]
        .parse()
        .map_err(|e| format!("entry index {}: {}", tokens[0], e))?;
    let cost = number(7)?;
    if cost <= 0.0 {
        return Ok(None);
    }
    let rank: u32 = tokens[8]
        .parse()
        .map_err(|e| format!("field 8 ({}): {}", tokens[8], e))?;

    let components = regions
        .get(&index)
        .ok_or_else(|| format!("entry {} missing from regions index", index))?
        .clone();

    let mut region_stats = vec![RegionStats::default(); LEGACY_REGIONS];
    for (region, stats) in region_stats.iter_mut().take(3).enumerate() {
        stats.gnorm = number(1 + region)?;
    }

    let dma_spread = if tokens.len() > 9 {
        vec![SpreadStats {
            spread: number(9)?,
            ..Default::default()
        }]
    } else {
        Vec::new()
    };

    Ok(Some(Candidate {
        components,
        cost,
        rank,
        sequence_index: Some(index),
        failed: false,
        diagnostics: Diagnostics {
            regions: region_stats,
            orbital_spread: vec![SpreadStats {
                spread: number(4)? / HARTREE_TO_EV,
                ..Default::default()
            }],
            dma_spread,
            homo: number(5)? / HARTREE_TO_EV,
            lumo: number(6)? / HARTREE_TO_EV,
        },
    }))
}

/// Parse the regions index into components keyed by sequence index.
pub fn parse_regions_index(text: &str) -> Result<HashMap<u64, Vec<Component>>, LegacyLogError> {
    let mut index_map = HashMap::new();
    let mut current: Option<u64> = None;
    let mut components = Vec::new();

    for (number, line) in text.lines().enumerate().skip(2) {
        let line_no = number + 1;
        if line.starts_with('=') {
            if let Some(index) = current.take() {
                index_map.insert(index, std::mem::take(&mut components));
            }
            continue;
        }

        let tokens = tokenize(line, REGION_DELIMITERS);
        if tokens.is_empty() {
            continue;
        }

        let offset = if tokens[0].starts_with('|') {
            if current.is_none() {
                return Err(LegacyLogError::Malformed {
                    line: line_no,
                    reason: "continuation row before any entry".to_string(),
                });
            }
            1
        } else if tokens.len() > 1 && tokens[1].starts_with('|') {
            let index = tokens[0].parse().map_err(|e| LegacyLogError::Malformed {
                line: line_no,
                reason: format!("entry index {}: {}", tokens[0], e),
            })?;
            current = Some(index);
            0
        } else {
            return Err(LegacyLogError::Malformed {
                line: line_no,
                reason: "missing '|' column".to_string(),
            });
        };

        if tokens.len() < 5 - offset {
            return Err(LegacyLogError::Malformed {
                line: line_no,
                reason: format!("expected {} fields, found {}", 5 - offset, tokens.len()),
            });
        }

        let malformed = |reason: String| LegacyLogError::Malformed {
            line: line_no,
            reason,
        };
        let origin: u32 = tokens[2 - offset]
            .parse()
            .map_err(|e| malformed(format!("origin {}: {}", tokens[2 - offset], e)))?;
        let code: u8 = tokens[3 - offset]
            .parse()
            .map_err(|e| malformed(format!("class {}: {}", tokens[3 - offset], e)))?;
        let class = ComponentClass::from_code(code)
            .ok_or_else(|| malformed(format!("unknown class code {}", code)))?;
        let value: f64 = tokens[4 - offset]
            .parse()
            .map_err(|e| malformed(format!("value {}: {}", tokens[4 - offset], e)))?;

        components.push(Component::new(origin, class, value));
    }

    if let Some(index) = current
        && !components.is_empty()
    {
        index_map.insert(index, components);
    }

    Ok(index_map)
}

/// Write the log header and targets line.
pub fn write_log_header<W: Write>(w: &mut W, cost: &CostFunction, dataset: usize) -> io::Result<()> {
    writeln!(w, "{}", cost.header_line())?;
    writeln!(w, "{}", SEPARATOR)?;
    writeln!(w, "{}", cost.targets_line(dataset))?;
    Ok(())
}

/// Write one round of rows followed by a separator.
pub fn write_log_rows<W: Write>(w: &mut W, batch: &[Candidate]) -> io::Result<()> {
    for c in batch {
        let d = &c.diagnostics;
        write!(
            w,
            "{:<10}  |  {:>14} {:>14} {:>14} {:>16} {:>16} {:>16}  |  {:>14} ({:>3})  |  ",
            c.sequence_index.unwrap_or(0),
            d.gnorm(0),
            d.gnorm(1),
            d.gnorm(2),
            d.anion_spread() * HARTREE_TO_EV,
            d.homo * HARTREE_TO_EV,
            d.lumo * HARTREE_TO_EV,
            c.cost,
            c.rank,
        )?;
        if !d.dma_spread.is_empty() {
            write!(w, "{}", d.dma_total())?;
        }
        writeln!(w)?;
    }
    writeln!(w, "{}", SEPARATOR)?;
    Ok(())
}

/// Write the regions index header.
pub fn write_regions_header<W: Write>(w: &mut W) -> io::Result<()> {
    writeln!(w, "Entry\t|\t      Line\t\tType\t\tValue")?;
    writeln!(w, "{}", SEPARATOR)?;
    Ok(())
}

/// Write component rows for each freshly evaluated batch member.
pub fn write_regions_rows<W: Write>(
    w: &mut W,
    batch: &[Candidate],
    from_history: &[bool],
) -> io::Result<()> {
    for (i, c) in batch.iter().enumerate() {
        if from_history.get(i).copied().unwrap_or(false) {
            continue;
        }
        for (j, component) in c.components.iter().enumerate() {
            if j == 0 {
                write!(w, "{}", c.sequence_index.unwrap_or(0))?;
            } else {
                write!(w, " ")?;
            }
            writeln!(
                w,
                "\t|\t{:>10}\t\t{}\t\t{}",
                component.origin,
                component.class.code(),
                component.value
            )?;
        }
        writeln!(w, "{}", SEPARATOR)?;
    }
    Ok(())
}

fn open_append(path: &Path) -> io::Result<(BufWriter<File>, bool)> {
    let fresh = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok((BufWriter::new(file), fresh))
}

/// Append a round to a dataset log, writing the header first if the log is new.
pub fn append_log_round(
    path: &Path,
    cost: &CostFunction,
    dataset: usize,
    batch: &[Candidate],
) -> io::Result<()> {
    let (mut w, fresh) = open_append(path)?;
    if fresh {
        write_log_header(&mut w, cost, dataset)?;
    }
    write_log_rows(&mut w, batch)?;
    w.flush()
}

/// Append freshly evaluated candidates to the shared regions index.
pub fn append_regions(path: &Path, batch: &[Candidate], from_history: &[bool]) -> io::Result<()> {
    let (mut w, fresh) = open_append(path)?;
    if fresh {
        write_regions_header(&mut w)?;
    }
    write_regions_rows(&mut w, batch, from_history)?;
    w.flush()
}
