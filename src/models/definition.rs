//! Job definitions as exchanged with registering clients.
//!
//! A [`Job`] is an external id, an optional batch token and an ordered
//! attribute map. A handful of reserved attribute keys are promoted to
//! columns or to product associations when the job is stored; everything
//! else is carried opaquely in the row's `content`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use super::job_state::JobState;

/// Ordered attribute map of a job.
pub type JobAttributes = Map<String, JsonValue>;

/// External id of the synthetic job every requisite-free job depends on.
pub const INITIATOR_JOB_ID: &str = "INITIATOR";

/// Priority assigned when a job does not carry one.
pub const DEFAULT_PRIORITY: i32 = 1;

pub const STATE_ATTR: &str = "state";
pub const PRIORITY_ATTR: &str = "priority";
pub const START_DATETIME_ATTR: &str = "start_datetime";
pub const EXEC_NODE_ATTR: &str = "exec_node";
pub const EXEC_HOST_ATTR: &str = "exec_host";
pub const PRODUCTS_ATTR: &str = "products";
pub const REQUISITES_ATTR: &str = "requisites";

/// A job definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_id: Option<i64>,
    #[serde(flatten)]
    pub attributes: JobAttributes,
}

impl Job {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            update_id: None,
            attributes: JobAttributes::new(),
        }
    }

    /// Sets an attribute, replacing any previous value.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_products<I, S>(self, products: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_attr(PRODUCTS_ATTR, string_array(products))
    }

    pub fn with_requisites<I, S>(self, requisites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_attr(REQUISITES_ATTR, string_array(requisites))
    }

    pub fn attr(&self, key: &str) -> Option<&JsonValue> {
        self.attributes.get(key)
    }

    /// State carried in the attributes, if any and recognized.
    pub fn state(&self) -> Option<JobState> {
        self.attr(STATE_ATTR).and_then(state_from_json)
    }

    pub fn products(&self) -> Vec<String> {
        self.attr(PRODUCTS_ATTR).map(string_list).unwrap_or_default()
    }

    pub fn requisites(&self) -> Vec<String> {
        self.attr(REQUISITES_ATTR).map(string_list).unwrap_or_default()
    }
}

fn string_array<I, S>(items: I) -> JsonValue
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    JsonValue::Array(
        items
            .into_iter()
            .map(|item| JsonValue::String(item.into()))
            .collect(),
    )
}

fn string_list(value: &JsonValue) -> Vec<String> {
    match value {
        JsonValue::String(single) => vec![single.clone()],
        JsonValue::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// Interprets a state attribute given either as a numeric code or a name.
pub fn state_from_json(value: &JsonValue) -> Option<JobState> {
    match value {
        JsonValue::Number(number) => number
            .as_i64()
            .and_then(|code| i32::try_from(code).ok())
            .and_then(JobState::from_code),
        JsonValue::String(name) => name.parse().ok(),
        _ => None,
    }
}
