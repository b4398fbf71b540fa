//! fdpsync core: identifier catalog, remote client, response parser and
//! reconciliation engine.
//!
//! - Domain types (ISIN, LEI, identifier and instrument records)
//! - `;`-delimited identifier catalog with O(1) lookup
//! - Fund Data Platform client with retry, backoff and batching
//! - Streaming `FundsXML4` response parser with per-record warnings
//! - Deterministic reconciliation into a Run Report

pub mod catalog;
pub mod domain;
pub mod parse;
pub mod reconcile;
pub mod remote;

pub use catalog::{Catalog, CatalogError};
pub use domain::{IdentifierRecord, InstrumentRecord, Isin, Lei};
pub use reconcile::{reconcile, MatchStatus, Reconciler, RunReport};
