use std::collections::BTreeMap;

/// Per-envelope context threaded through dispatch, render, and delivery so
/// every log line and retry re-enqueue can be tagged with the same trace
/// identity. An explicit struct rather than a thread-local or a context
/// extension, per the design's preference for passing state that can cross
/// an `.await` point without relying on task-local storage.
#[derive(Debug, Clone, Default)]
pub struct ActivityInfo {
    fields: BTreeMap<String, String>,
}

impl ActivityInfo {
    pub fn new(trace_id: impl Into<String>, message_kind: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert("trace_id".to_string(), trace_id.into());
        fields.insert("message_kind".to_string(), message_kind.into());
        Self { fields }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn trace_id(&self) -> &str {
        self.get("trace_id").unwrap_or("")
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carries_trace_and_kind() {
        let info = ActivityInfo::new("trace-1", "post_report").with("user_id", "U1");
        assert_eq!(info.trace_id(), "trace-1");
        assert_eq!(info.get("message_kind"), Some("post_report"));
        assert_eq!(info.get("user_id"), Some("U1"));
    }
}
