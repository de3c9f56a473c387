//! Reusable named message templates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder replaced with the recipient's local-part when rendering.
pub const USER_PLACEHOLDER: &str = "{{user}}";

/// A named email body (HTML plus opaque editor design) usable by a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// Opaque identifier assigned when the name is first saved.
    pub id: String,
    /// Unique template name.
    pub name: String,
    /// Rendered HTML body; `None` means "use the generated fallback message".
    pub html: Option<String>,
    /// Editor layout payload, stored verbatim.
    #[serde(default)]
    pub design: serde_json::Value,
    /// When the template was first created.
    pub created_at: DateTime<Utc>,
}

impl Template {
    /// A template with no HTML, used when a campaign has no templates at all.
    pub fn pass_through() -> Self {
        Self {
            id: String::new(),
            name: "default".to_string(),
            html: None,
            design: serde_json::Value::Null,
            created_at: DateTime::UNIX_EPOCH,
        }
    }

    /// Render the HTML body for `local_part`, if this template has HTML.
    pub fn render(&self, local_part: &str) -> Option<String> {
        self.html
            .as_deref()
            .map(|html| html.replace(USER_PLACEHOLDER, local_part))
    }
}
