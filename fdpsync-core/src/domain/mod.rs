//! Domain types shared across the pipeline.

pub mod codes;
pub mod identifier;
pub mod instrument;

pub use codes::{CodeError, Isin, Lei};
pub use identifier::IdentifierRecord;
pub use instrument::InstrumentRecord;
