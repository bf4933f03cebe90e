//! Contact details a model reports inside `<extracted_info>` tags.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Opening tag of the extraction block.
pub const OPEN_TAG: &str = "<extracted_info>";

/// Closing tag of the extraction block.
pub const CLOSE_TAG: &str = "</extracted_info>";

/// Business-card fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactInfo {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub position: String,
    #[serde(deserialize_with = "null_as_default")]
    pub company: String,
    #[serde(deserialize_with = "null_as_default")]
    pub phone: String,
    #[serde(deserialize_with = "null_as_default")]
    pub email: String,
    #[serde(deserialize_with = "null_as_default")]
    pub address: String,
    #[serde(deserialize_with = "null_as_default")]
    pub website: String,
    /// Free-form extras; models emit strings or small objects here.
    #[serde(deserialize_with = "null_as_default")]
    pub other_details: Vec<serde_json::Value>,
}

// Models write `null` for fields the card does not show.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ContactInfo {
    /// Parse the last `<extracted_info>` block in `text`.
    ///
    /// The block may wrap its JSON in a Markdown code fence. Returns `None`
    /// when there is no block or its body is not a JSON object.
    #[must_use]
    pub fn extract(text: &str) -> Option<Self> {
        let start = text.rfind(OPEN_TAG)? + OPEN_TAG.len();
        let end = start + text[start..].find(CLOSE_TAG)?;
        let body = strip_code_fence(text[start..end].trim());
        serde_json::from_str(body).ok()
    }

    /// Whether every field is blank.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields().iter().all(|(_, value)| value.trim().is_empty()) && self.other_details.is_empty()
    }

    /// Named scalar fields in display order.
    #[must_use]
    pub fn fields(&self) -> [(&'static str, &str); 7] {
        [
            ("name", self.name.as_str()),
            ("position", self.position.as_str()),
            ("company", self.company.as_str()),
            ("phone", self.phone.as_str()),
            ("email", self.email.as_str()),
            ("address", self.address.as_str()),
            ("website", self.website.as_str()),
        ]
    }
}

impl fmt::Display for ContactInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (label, value) in self.fields() {
            if !value.trim().is_empty() {
                writeln!(f, "{label:>9}: {value}")?;
            }
        }
        for detail in &self.other_details {
            match detail {
                serde_json::Value::String(s) => writeln!(f, "{:>9}: {s}", "other")?,
                other => writeln!(f, "{:>9}: {other}", "other")?,
            }
        }
        Ok(())
    }
}

fn strip_code_fence(body: &str) -> &str {
    let Some(rest) = body.strip_prefix("```") else {
        return body;
    };
    // drop the info string (```json)
    let rest = rest.find('\n').map_or("", |idx| &rest[idx + 1..]);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
