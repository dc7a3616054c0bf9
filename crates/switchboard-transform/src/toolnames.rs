use std::collections::HashMap;

/// Longest tool name some sinks accept.
pub const MAX_SINK_NAME_LEN: usize = 64;

/// Bidirectional map between original tool names and the shortened names
/// sent to a length-limited sink. Built once per request while converting
/// tool declarations; consulted when function calls come back.
#[derive(Debug, Clone, Default)]
pub struct ToolNameMap {
    to_sink: HashMap<String, String>,
    from_sink: HashMap<String, String>,
}

impl ToolNameMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `original` and return the name to use on the sink side.
    pub fn register(&mut self, original: &str) -> String {
        if let Some(existing) = self.to_sink.get(original) {
            return existing.clone();
        }
        let sink_name = shorten(original);
        self.to_sink
            .insert(original.to_string(), sink_name.clone());
        self.from_sink
            .insert(sink_name.clone(), original.to_string());
        sink_name
    }

    /// Map a name coming back from the sink to the original.
    pub fn restore(&self, sink_name: &str) -> String {
        self.from_sink
            .get(sink_name)
            .cloned()
            .unwrap_or_else(|| sink_name.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.to_sink.is_empty()
    }
}

/// Deterministic shortening for names over [`MAX_SINK_NAME_LEN`].
///
/// MCP-prefixed names (`mcp__server__leaf`) keep `mcp__leaf` truncated;
/// anything else keeps a 55-char prefix plus an 8-hex md5 suffix so
/// distinct long names stay distinct.
fn shorten(name: &str) -> String {
    if name.len() <= MAX_SINK_NAME_LEN {
        return name.to_string();
    }

    if let Some(rest) = name.strip_prefix("mcp__")
        && let Some(idx) = rest.rfind("__")
    {
        let leaf = &rest[idx + 2..];
        let mut short = format!("mcp__{leaf}");
        short.truncate(MAX_SINK_NAME_LEN);
        return short;
    }

    let digest = md5::compute(name.as_bytes());
    let suffix = format!("{digest:x}");
    let prefix: String = name.chars().take(55).collect();
    format!("{prefix}_{}", &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_pass_through() {
        let mut map = ToolNameMap::new();
        assert_eq!(map.register("Grep"), "Grep");
        assert_eq!(map.restore("Grep"), "Grep");
    }

    #[test]
    fn mcp_names_keep_leaf() {
        let server = "x".repeat(80);
        let original = format!("mcp__{server}__search_documents");
        let mut map = ToolNameMap::new();
        let sink = map.register(&original);
        assert_eq!(sink, "mcp__search_documents");
        assert_eq!(map.restore(&sink), original);
    }

    #[test]
    fn long_names_get_md5_suffix_and_round_trip() {
        let original = "a".repeat(128);
        let mut map = ToolNameMap::new();
        let sink = map.register(&original);
        assert!(sink.len() <= MAX_SINK_NAME_LEN);
        assert_eq!(sink.len(), 55 + 1 + 8);
        assert_eq!(map.restore(&sink), original);
    }

    #[test]
    fn distinct_long_names_stay_distinct() {
        let a = format!("{}{}", "a".repeat(70), "one");
        let b = format!("{}{}", "a".repeat(70), "two");
        let mut map = ToolNameMap::new();
        assert_ne!(map.register(&a), map.register(&b));
    }

    #[test]
    fn register_is_idempotent() {
        let original = "b".repeat(100);
        let mut map = ToolNameMap::new();
        assert_eq!(map.register(&original), map.register(&original));
    }
}
