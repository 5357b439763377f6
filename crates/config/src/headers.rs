//! Inbound correlation header names.

use serde::Deserialize;

fn default_trace_id() -> String {
    "AH-Trace-Id".to_string()
}

fn default_thread_id() -> String {
    "AH-Thread-Id".to_string()
}

fn default_request_id() -> String {
    "AH-Request-Id".to_string()
}

fn default_channel_tags() -> String {
    "AH-Channel-Tags".to_string()
}

/// Names of the optional headers the gateway reads from inbound requests.
///
/// All of them are optional on the wire; missing trace and request ids are
/// generated by the gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct HeaderNamesConfig {
    /// Header carrying the caller-assigned trace id.
    #[serde(default = "default_trace_id")]
    pub trace_id: String,

    /// Header carrying the conversation thread id.
    #[serde(default = "default_thread_id")]
    pub thread_id: String,

    /// Header carrying the caller-assigned request id.
    #[serde(default = "default_request_id")]
    pub request_id: String,

    /// Header carrying a comma-separated channel tag filter.
    #[serde(default = "default_channel_tags")]
    pub channel_tags: String,
}

impl Default for HeaderNamesConfig {
    fn default() -> Self {
        Self {
            trace_id: default_trace_id(),
            thread_id: default_thread_id(),
            request_id: default_request_id(),
            channel_tags: default_channel_tags(),
        }
    }
}
