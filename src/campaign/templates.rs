//! Where a campaign gets its templates from.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::Result;
use crate::model::template::Template;
use crate::store::LogStore;

pub trait TemplateSource {
    fn fetch_templates(&self) -> Result<Vec<Template>>;
}

impl TemplateSource for LogStore {
    fn fetch_templates(&self) -> Result<Vec<Template>> {
        self.list_templates()
    }
}

/// No templates: every recipient gets the generated body.
pub struct NoTemplates;

impl TemplateSource for NoTemplates {
    fn fetch_templates(&self) -> Result<Vec<Template>> {
        Ok(Vec::new())
    }
}

/// Template HTTP API answering `GET {base}/mails` with a JSON array.
pub struct RemoteTemplates {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl RemoteTemplates {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

/// Wire shape; the API is loose about id types and timestamps.
#[derive(Deserialize)]
struct RemoteTemplate {
    #[serde(default)]
    id: serde_json::Value,
    name: String,
    #[serde(default)]
    html: Option<String>,
    #[serde(default)]
    design: serde_json::Value,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl From<RemoteTemplate> for Template {
    fn from(r: RemoteTemplate) -> Self {
        let id = match r.id {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        };
        Template {
            id,
            name: r.name,
            html: r.html,
            design: r.design,
            created_at: r.created_at.unwrap_or(DateTime::UNIX_EPOCH),
        }
    }
}

impl TemplateSource for RemoteTemplates {
    fn fetch_templates(&self) -> Result<Vec<Template>> {
        let raw: Vec<RemoteTemplate> = self
            .client
            .get(format!("{}/mails", self.base_url))
            .send()?
            .error_for_status()?
            .json()?;
        Ok(raw.into_iter().map(Template::from).collect())
    }
}
