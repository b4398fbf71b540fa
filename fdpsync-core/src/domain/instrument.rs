//! Share class reference data decoded from a remote response.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::codes::Isin;

/// Remote reference data for a single share class.
///
/// Fields that failed coercion are `None`; the parser records a warning for
/// each of them instead of substituting a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentRecord {
    pub isin: Isin,
    pub name: Option<String>,
    pub currency: Option<String>,
    pub nav: Option<f64>,
    pub nav_date: Option<NaiveDate>,
    pub status: Option<String>,
    pub source_timestamp: Option<NaiveDateTime>,
}

impl InstrumentRecord {
    /// A record carrying only its identifier.
    pub fn bare(isin: Isin) -> Self {
        Self {
            isin,
            name: None,
            currency: None,
            nav: None,
            nav_date: None,
            status: None,
            source_timestamp: None,
        }
    }

    /// True when none of the attribute fields were populated.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.currency.is_none()
            && self.nav.is_none()
            && self.nav_date.is_none()
            && self.status.is_none()
    }
}
