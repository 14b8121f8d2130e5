//! Wire types for controller resources.
//!
//! These are deliberately thin: the client marshals them as JSON and leaves
//! the field semantics to the server. Unknown fields are ignored on decode so
//! the client stays compatible with newer controllers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// An application registered with the controller.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct App {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protected: Option<bool>,
}

/// An immutable build artifact referenced by releases.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub uri: String,
}

/// A release: an artifact plus process configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Release {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub artifact_id: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

/// Desired process counts for an app release.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Formation {
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub release_id: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub processes: HashMap<String, i32>,
}

/// A formation change pushed on the streaming RPC session.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FormationUpdate {
    #[serde(default)]
    pub app: App,
    #[serde(default)]
    pub release: Release,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub processes: HashMap<String, i32>,
}

/// A job running (or run) under an app.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Job {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub state: String,
}

/// Parameters for starting a new job.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct NewJob {
    #[serde(default)]
    pub release_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub tty: bool,
}

/// A job state change delivered on the job event stream.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct JobEvent {
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub state: String,
}

/// Structured rejection returned with HTTP status 400.
///
/// Carries the offending field and a human-readable reason. Surfaced to
/// callers as [`ClientError::Validation`](crate::ClientError::Validation),
/// never as the generic status error.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationError {
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.field.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}
