//! Response Parser: remote payload bytes to Instrument Records.

pub mod coerce;
pub mod warning;
pub mod xml;

pub use warning::{ParseError, ParseStats, ParseWarning, WarningKind};
pub use xml::{parse, InstrumentRecords, ParsedResponse};
