//! Entries of the locally bundled ISIN/LEI list.

use serde::{Deserialize, Serialize};

use super::codes::{Isin, Lei};

/// Share-class suffixes that are dropped from fund names for display.
const SHARE_CLASS_SUFFIXES: &[&str] = &[
    "(A)", "(T)", "(VT)", "(V)", "(VA)", "(R)", "(I)", "(S)", "(VS)", "(RT)", "(VI)", "(IT)",
];

/// A locally known instrument. Immutable once the catalog is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierRecord {
    pub isin: Isin,
    pub name: String,
    /// Category tag (the wrapper column of the bundled list).
    pub category: Option<String>,
    pub management_company: Option<String>,
    pub oenb_id: Option<String>,
    pub lei: Option<Lei>,
    pub lei_status: Option<String>,
    pub isin_status: Option<String>,
}

impl IdentifierRecord {
    pub fn new(isin: Isin, name: impl Into<String>) -> Self {
        Self {
            isin,
            name: name.into(),
            category: None,
            management_company: None,
            oenb_id: None,
            lei: None,
            lei_status: None,
            isin_status: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Fund name without a trailing share-class suffix such as `(A)` or `(VT)`.
    pub fn display_name(&self) -> &str {
        let name = self.name.trim_end();
        SHARE_CLASS_SUFFIXES
            .iter()
            .find_map(|suffix| name.strip_suffix(suffix))
            .map(str::trim_end)
            .unwrap_or(name)
    }
}
