use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::pricing::{FilamentReading, FilamentStrategy, PriceEstimate};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EstimateQuery {
    /// Overrides the configured strategy
    pub strategy: Option<FilamentStrategy>,
}

/// Which kind of [`FilamentReading`] the estimate was based on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingKind {
    Parsed,
    NoMarker,
    Unparseable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimateResponse {
    pub file: String,
    pub strategy: FilamentStrategy,
    pub reading: ReadingKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filament_mm: Option<Decimal>,
    /// First marker line that could not be parsed, when nothing parsed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unparseable_line: Option<usize>,
    pub price: Decimal,
}

impl EstimateResponse {
    pub fn new(file: String, strategy: FilamentStrategy, estimate: PriceEstimate) -> Self {
        let (reading, unparseable_line) = match estimate.reading {
            FilamentReading::Parsed(_) => (ReadingKind::Parsed, None),
            FilamentReading::NoMarker => (ReadingKind::NoMarker, None),
            FilamentReading::Unparseable { line } => (ReadingKind::Unparseable, Some(line)),
        };

        Self {
            file,
            strategy,
            reading,
            filament_mm: estimate.reading.filament_mm(),
            unparseable_line,
            price: estimate.price,
        }
    }
}
