//! Member-path parsing and derivation of the middleware addressing labels.
//!
//! A full member path has the form `Namespace::Instance.Member[.Sub]`, where
//! `::` separates namespace segments from the instance name and `.` separates
//! member segments. Container elements carry an `[index]` suffix on the
//! instance. The full path is the sole identity of a member within a service.

use crate::error::{AdapterError, Result};

/// Name of the virtual network all members are registered on.
pub const VIRTUAL_NETWORK: &str = "Default";

/// Addressing information derived from a full member path: the pub-sub /
/// RPC topic plus the labels both peers must agree on for the middleware to
/// match their endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunicationInfo {
    canonical_name: String,
    namespace: String,
    instance: String,
    topic: String,
}

impl CommunicationInfo {
    /// Splits `full_path` at the last `::` (namespace | rest) and at the
    /// first `.` of the rest (instance | topic).
    pub fn parse(full_path: &str) -> Result<Self> {
        let ns_end = full_path.rfind("::").ok_or_else(|| {
            AdapterError::InvalidUsage(format!("member path '{full_path}' has no namespace"))
        })?;
        let rest = &full_path[ns_end + 2..];
        let dot = rest.find('.').ok_or_else(|| {
            AdapterError::InvalidUsage(format!("member path '{full_path}' has no member segment"))
        })?;
        let instance = &rest[..dot];
        let topic = &rest[dot + 1..];
        if instance.is_empty() || topic.is_empty() {
            return Err(AdapterError::InvalidUsage(format!(
                "member path '{full_path}' has an empty segment"
            )));
        }
        Ok(Self {
            canonical_name: full_path.to_owned(),
            namespace: full_path[..ns_end].to_owned(),
            instance: instance.to_owned(),
            topic: topic.to_owned(),
        })
    }

    /// The full member path, used verbatim as the middleware service name.
    pub fn canonical_name(&self) -> &str {
        &self.canonical_name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The mandatory matching labels shared by publisher/subscriber and RPC
    /// client/server endpoints of this member.
    pub fn labels(&self) -> Vec<(String, String)> {
        vec![
            ("Namespace".to_owned(), self.namespace.clone()),
            ("Instance".to_owned(), self.instance.clone()),
            ("VirtualNetwork".to_owned(), VIRTUAL_NETWORK.to_owned()),
        ]
    }
}
