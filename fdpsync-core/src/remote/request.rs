//! Download requests and batching.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::Isin;

/// Download mode for share class / segment reference data.
pub const MODE_SHARECLASS: &str = "DOWNLOAD_SHARECLASS_SEGMENT";

/// Which platform instance the client talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Test,
    Prod,
}

impl Environment {
    pub fn default_endpoint(self) -> &'static str {
        match self {
            Self::Test => "https://fdp-qas-service.oekb.at/client",
            Self::Prod => "https://fdp-service.oekb.at/client",
        }
    }

    /// Value of the `server` form field.
    pub fn server_param(self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Prod => "prod",
        }
    }

    /// Prefix used when archiving raw responses.
    pub fn label(self) -> &'static str {
        match self {
            Self::Test => "TEST",
            Self::Prod => "PROD",
        }
    }
}

/// One request to the remote service, covering a block of ISINs.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    /// Position of this batch in the run; outcomes are merged in this order.
    pub batch_index: usize,
    pub isins: Vec<Isin>,
    pub content_date: Option<NaiveDate>,
    pub profile: Option<String>,
}

impl FetchRequest {
    pub fn new(isins: Vec<Isin>) -> Self {
        Self {
            batch_index: 0,
            isins,
            content_date: None,
            profile: None,
        }
    }

    pub fn mode(&self) -> &'static str {
        MODE_SHARECLASS
    }

    /// Form fields for the POST body. Empty optional fields are omitted.
    pub fn form_fields(&self, identity: &ClientIdentity) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("mode", self.mode().to_string()),
            ("server", identity.environment.server_param().to_string()),
        ];
        push_non_empty(&mut fields, "user", &identity.user);
        push_non_empty(&mut fields, "datasupplier", &identity.data_supplier);
        push_non_empty(&mut fields, "clientversion", &identity.client_version);
        if let Some(date) = self.content_date {
            fields.push(("date", date.format("%Y-%m-%d").to_string()));
        }
        if let Some(profile) = &self.profile {
            push_non_empty(&mut fields, "profile", profile);
        }
        let isins: Vec<&str> = self.isins.iter().map(Isin::as_str).collect();
        push_non_empty(&mut fields, "isin", &isins.join(" "));
        fields.push(("requestblock-size", self.isins.len().to_string()));
        fields
    }
}

/// Split `isins` into requests of at most `block_size` codes each.
///
/// Every request inherits date and profile from `template`.
pub fn plan_batches<'a>(
    isins: impl IntoIterator<Item = &'a Isin>,
    block_size: usize,
    template: &FetchRequest,
) -> Vec<FetchRequest> {
    let codes: Vec<Isin> = isins.into_iter().cloned().collect();
    codes
        .chunks(block_size.max(1))
        .enumerate()
        .map(|(batch_index, chunk)| FetchRequest {
            batch_index,
            isins: chunk.to_vec(),
            content_date: template.content_date,
            profile: template.profile.clone(),
        })
        .collect()
}

fn push_non_empty(fields: &mut Vec<(&'static str, String)>, key: &'static str, value: &str) {
    if !value.is_empty() {
        fields.push((key, value.to_string()));
    }
}

/// Who is asking: sent with every request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientIdentity {
    pub environment: Environment,
    pub user: String,
    pub data_supplier: String,
    pub client_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn isins(codes: &[&str]) -> Vec<Isin> {
        codes.iter().map(|c| Isin::parse(c).unwrap()).collect()
    }

    #[test]
    fn batches_chunk_and_keep_order() {
        let codes = isins(&[
            "AT0000A20FX4",
            "US0378331005",
            "DE0005140008",
            "IE00B4L5Y983",
            "LU0274208692",
        ]);
        let template = FetchRequest {
            content_date: NaiveDate::from_ymd_opt(2024, 5, 31),
            profile: Some("Vendor".into()),
            ..FetchRequest::new(Vec::new())
        };
        let batches = plan_batches(&codes, 2, &template);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].isins, codes[..2]);
        assert_eq!(batches[2].isins, codes[4..]);
        assert_eq!(batches[2].batch_index, 2);
        assert!(batches.iter().all(|b| b.profile.as_deref() == Some("Vendor")));
    }

    #[test]
    fn zero_block_size_is_treated_as_one() {
        let codes = isins(&["AT0000A20FX4", "US0378331005"]);
        let batches = plan_batches(&codes, 0, &FetchRequest::new(Vec::new()));
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn form_fields_omit_empty_values() {
        let request = FetchRequest {
            content_date: NaiveDate::from_ymd_opt(2024, 5, 31),
            ..FetchRequest::new(isins(&["AT0000A20FX4", "US0378331005"]))
        };
        let identity = ClientIdentity {
            environment: Environment::Prod,
            user: "alice".into(),
            data_supplier: String::new(),
            client_version: "0.1.0".into(),
        };
        let fields = request.form_fields(&identity);
        let get = |k: &str| fields.iter().find(|(key, _)| *key == k).map(|(_, v)| v.as_str());

        assert_eq!(get("mode"), Some(MODE_SHARECLASS));
        assert_eq!(get("server"), Some("prod"));
        assert_eq!(get("user"), Some("alice"));
        assert_eq!(get("datasupplier"), None);
        assert_eq!(get("profile"), None);
        assert_eq!(get("date"), Some("2024-05-31"));
        assert_eq!(get("isin"), Some("AT0000A20FX4 US0378331005"));
        assert_eq!(get("requestblock-size"), Some("2"));
    }
}
