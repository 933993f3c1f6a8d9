//! Filament-based price estimation for generated G-code.
//!
//! Slicers annotate their output with comment lines such as `; filament used [mm] = 1234.5`. The
//! estimator scans a file for the configured marker, reads the number after the first `=`, and
//! multiplies it by a per-millimetre rate.
//!
//! The marker is a plain substring, so the default `filament used` also matches PrusaSlicer's
//! `filament used [cm3]` and `filament used [g]` lines, which follow the `[mm]` line. With `last`
//! the reading is therefore the gram figure, and `sum` adds millimetres, cubic centimetres and
//! grams together. Configure a narrower marker such as `filament used [mm]` to price by length
//! only.
//!
//! The scan never aborts on a malformed marker line. Instead the outcome is reported as a
//! [`FilamentReading`], which distinguishes "no marker", "marker but nothing parseable" and a
//! parsed value. How multiple matching lines combine is chosen with [`FilamentStrategy`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};

/// How values from several matching lines are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilamentStrategy {
    /// Keep only the last successfully parsed value
    #[default]
    Last,
    /// Add up every successfully parsed value
    Sum,
}

/// Outcome of scanning a file for the filament marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilamentReading {
    /// No line contained the marker
    NoMarker,
    /// The marker was present but no matching line parsed. `line` is the first offending line (1-based).
    Unparseable { line: usize },
    /// Filament length in millimetres
    Parsed(Decimal),
}

impl FilamentReading {
    pub fn filament_mm(&self) -> Option<Decimal> {
        match self {
            FilamentReading::Parsed(value) => Some(*value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceEstimate {
    pub reading: FilamentReading,
    pub price: Decimal,
}

#[derive(Debug, Error)]
pub enum PricingError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Filament total overflowed at line {line}")]
    FilamentOverflow { line: usize },

    #[error("Price for {filament} overflowed")]
    PriceOverflow { filament: Decimal },
}

impl PricingError {
    /// Name of the file that could not be read, for I/O errors.
    pub fn file_name(&self) -> Option<String> {
        match self {
            PricingError::Io { path, .. } => Some(
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string()),
            ),
            PricingError::FilamentOverflow { .. } | PricingError::PriceOverflow { .. } => None,
        }
    }
}

/// Line-at-a-time accumulator. Feed every line of the file, then call [`finish`](Self::finish).
#[derive(Debug)]
pub struct FilamentScanner<'a> {
    marker: &'a str,
    strategy: FilamentStrategy,
    line_number: usize,
    value: Option<Decimal>,
    first_unparseable: Option<usize>,
    overflow_line: Option<usize>,
}

impl<'a> FilamentScanner<'a> {
    pub fn new(marker: &'a str, strategy: FilamentStrategy) -> Self {
        Self {
            marker,
            strategy,
            line_number: 0,
            value: None,
            first_unparseable: None,
            overflow_line: None,
        }
    }

    pub fn feed(&mut self, line: &str) {
        self.line_number += 1;
        if self.overflow_line.is_some() || !line.contains(self.marker) {
            return;
        }

        match parse_marker_value(line) {
            Some(parsed) => match (self.strategy, self.value) {
                (FilamentStrategy::Sum, Some(total)) => match total.checked_add(parsed) {
                    Some(sum) => self.value = Some(sum),
                    None => self.overflow_line = Some(self.line_number),
                },
                _ => self.value = Some(parsed),
            },
            None => {
                tracing::trace!(line = self.line_number, "Ignoring unparseable filament marker");
                self.first_unparseable.get_or_insert(self.line_number);
            }
        }
    }

    pub fn finish(self) -> Result<FilamentReading, PricingError> {
        if let Some(line) = self.overflow_line {
            return Err(PricingError::FilamentOverflow { line });
        }

        Ok(match (self.value, self.first_unparseable) {
            (Some(value), _) => FilamentReading::Parsed(value),
            (None, Some(line)) => FilamentReading::Unparseable { line },
            (None, None) => FilamentReading::NoMarker,
        })
    }
}

/// Text after the first `=`, first whitespace token, trailing unit letters dropped.
fn parse_marker_value(line: &str) -> Option<Decimal> {
    let token = line.trim().split('=').nth(1)?.split_whitespace().next()?;
    let number = token.trim_end_matches(|c: char| c.is_alphabetic());
    Decimal::from_str(number).or_else(|_| Decimal::from_scientific(number)).ok()
}

#[derive(Debug, Clone)]
pub struct PriceEstimator {
    marker: String,
    price_per_mm: Decimal,
}

impl PriceEstimator {
    pub fn new(marker: impl Into<String>, price_per_mm: Decimal) -> Self {
        Self {
            marker: marker.into(),
            price_per_mm,
        }
    }

    /// Price for a reading, rounded to cents. Anything other than a parsed value costs nothing.
    pub fn price(&self, reading: &FilamentReading) -> Result<Decimal, PricingError> {
        match reading {
            FilamentReading::Parsed(mm) => mm
                .checked_mul(self.price_per_mm)
                .map(|price| price.round_dp(2))
                .ok_or(PricingError::PriceOverflow { filament: *mm }),
            _ => Ok(Decimal::ZERO),
        }
    }

    pub fn estimate_text(&self, text: &str, strategy: FilamentStrategy) -> Result<PriceEstimate, PricingError> {
        let mut scanner = FilamentScanner::new(&self.marker, strategy);
        text.lines().for_each(|line| scanner.feed(line));
        let reading = scanner.finish()?;
        Ok(PriceEstimate {
            price: self.price(&reading)?,
            reading,
        })
    }

    #[tracing::instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn estimate_file(&self, path: &Path, strategy: FilamentStrategy) -> Result<PriceEstimate, PricingError> {
        let io_err = |source| PricingError::Io {
            path: path.to_path_buf(),
            source,
        };

        let file = tokio::fs::File::open(path).await.map_err(io_err)?;
        let mut lines = BufReader::new(file).lines();
        let mut scanner = FilamentScanner::new(&self.marker, strategy);
        while let Some(line) = lines.next_line().await.map_err(io_err)? {
            scanner.feed(&line);
        }

        let reading = scanner.finish()?;
        let price = self.price(&reading)?;
        tracing::debug!(?reading, %price, "Estimated print price");
        Ok(PriceEstimate { reading, price })
    }
}
