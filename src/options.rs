use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::metrics::{default_metrics, GraphMetrics};

/// Default live-node percentage below which compaction renumbers the table.
pub const DEFAULT_COMPRESSION_THRESHOLD: u32 = 70;

/// Environment variable overriding [`GraphOptions::verify_graphs`].
pub const ENV_VERIFY: &str = "NODEGRAPH_VERIFY";
/// Environment variable overriding [`GraphOptions::verify_graph_edges`].
pub const ENV_VERIFY_EDGES: &str = "NODEGRAPH_VERIFY_EDGES";
/// Environment variable overriding [`GraphOptions::compression_threshold`].
pub const ENV_COMPRESSION_THRESHOLD: &str = "NODEGRAPH_COMPRESSION_THRESHOLD";

/// Configuration options supplied when creating a [`crate::Graph`].
///
/// Options are read once when the graph is built.
#[derive(Clone)]
pub struct GraphOptions {
    /// Run structural verification when asked to verify.
    pub verify_graphs: bool,
    /// Additionally verify input kinds against allowed usage types.
    pub verify_graph_edges: bool,
    /// Live-node percentage below which compaction renumbers; 0 disables it.
    pub compression_threshold: u32,
    /// How many non-matching entries bulk usage removal looks past before it
    /// falls back to one scan per edge.
    pub usage_removal_lookahead: usize,
    /// Stamp nodes with the current source position on registration.
    pub track_source_positions: bool,
    /// Optional graph name used in diagnostics.
    pub name: Option<String>,
    /// Metrics sink.
    pub metrics: Arc<dyn GraphMetrics>,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GraphOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphOptions")
            .field("verify_graphs", &self.verify_graphs)
            .field("verify_graph_edges", &self.verify_graph_edges)
            .field("compression_threshold", &self.compression_threshold)
            .field("usage_removal_lookahead", &self.usage_removal_lookahead)
            .field("track_source_positions", &self.track_source_positions)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl GraphOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self {
            verify_graphs: true,
            verify_graph_edges: false,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            usage_removal_lookahead: 1,
            track_source_positions: false,
            name: None,
            metrics: default_metrics(),
        }
    }

    /// Enables or disables structural verification.
    pub fn verify_graphs(mut self, enabled: bool) -> Self {
        self.verify_graphs = enabled;
        self
    }

    /// Enables or disables input-kind verification.
    pub fn verify_graph_edges(mut self, enabled: bool) -> Self {
        self.verify_graph_edges = enabled;
        self
    }

    /// Sets the compaction threshold in percent (0 disables compaction).
    pub fn compression_threshold(mut self, percent: u32) -> Self {
        self.compression_threshold = percent;
        self
    }

    /// Sets the bulk usage-removal lookahead.
    pub fn usage_removal_lookahead(mut self, entries: usize) -> Self {
        self.usage_removal_lookahead = entries;
        self
    }

    /// Enables or disables source position tracking.
    pub fn track_source_positions(mut self, enabled: bool) -> Self {
        self.track_source_positions = enabled;
        self
    }

    /// Sets the graph name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the metrics sink.
    pub fn metrics(mut self, metrics: Arc<dyn GraphMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Parses options from a TOML document with an optional `[graph]` table.
    /// Keys that are absent keep their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw: RawOptionsFile =
            toml::from_str(contents).map_err(|err| GraphError::Config(err.to_string()))?;
        let mut options = Self::new();
        raw.graph.apply(&mut options)?;
        Ok(options)
    }

    /// Reads options from a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Overlays settings found in the process environment.
    pub fn from_env(self) -> Result<Self> {
        self.overlay_vars(|key| std::env::var(key).ok())
    }

    /// Overlays settings looked up through `lookup`, which maps an
    /// environment variable name to its value.
    pub fn overlay_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = lookup(ENV_VERIFY) {
            self.verify_graphs = parse_flag(ENV_VERIFY, &value)?;
        }
        if let Some(value) = lookup(ENV_VERIFY_EDGES) {
            self.verify_graph_edges = parse_flag(ENV_VERIFY_EDGES, &value)?;
        }
        if let Some(value) = lookup(ENV_COMPRESSION_THRESHOLD) {
            let percent = value.trim().parse::<u32>().map_err(|err| {
                GraphError::Config(format!("{ENV_COMPRESSION_THRESHOLD}={value}: {err}"))
            })?;
            self.compression_threshold = check_threshold(percent)?;
        }
        Ok(self)
    }

    /// Serializes the file-backed settings as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        let raw = RawOptionsFile {
            graph: RawGraphOptions {
                verify_graphs: Some(self.verify_graphs),
                verify_graph_edges: Some(self.verify_graph_edges),
                compression_threshold: Some(self.compression_threshold),
                usage_removal_lookahead: Some(self.usage_removal_lookahead),
                track_source_positions: Some(self.track_source_positions),
                name: self.name.clone(),
            },
        };
        toml::to_string_pretty(&raw).map_err(|err| GraphError::Config(err.to_string()))
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(GraphError::Config(format!(
            "{key}: expected a boolean, got {other:?}"
        ))),
    }
}

fn check_threshold(percent: u32) -> Result<u32> {
    if percent > 100 {
        return Err(GraphError::Config(format!(
            "compression threshold {percent} is not a percentage"
        )));
    }
    Ok(percent)
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
struct RawOptionsFile {
    graph: RawGraphOptions,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
struct RawGraphOptions {
    verify_graphs: Option<bool>,
    verify_graph_edges: Option<bool>,
    compression_threshold: Option<u32>,
    usage_removal_lookahead: Option<usize>,
    track_source_positions: Option<bool>,
    name: Option<String>,
}

impl RawGraphOptions {
    fn apply(self, options: &mut GraphOptions) -> Result<()> {
        if let Some(verify) = self.verify_graphs {
            options.verify_graphs = verify;
        }
        if let Some(verify) = self.verify_graph_edges {
            options.verify_graph_edges = verify;
        }
        if let Some(percent) = self.compression_threshold {
            options.compression_threshold = check_threshold(percent)?;
        }
        if let Some(lookahead) = self.usage_removal_lookahead {
            options.usage_removal_lookahead = lookahead;
        }
        if let Some(track) = self.track_source_positions {
            options.track_source_positions = track;
        }
        if let Some(name) = self.name {
            options.name = Some(name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let options = GraphOptions::new();
        assert!(options.verify_graphs);
        assert!(!options.verify_graph_edges);
        assert_eq!(options.compression_threshold, 70);
        assert_eq!(options.usage_removal_lookahead, 1);
    }

    #[test]
    fn toml_overrides_only_present_keys() {
        let options = GraphOptions::from_toml_str(
            "[graph]\ncompression_threshold = 50\nname = \"kernel\"\n",
        )
        .unwrap();
        assert_eq!(options.compression_threshold, 50);
        assert_eq!(options.name.as_deref(), Some("kernel"));
        assert!(options.verify_graphs);
    }

    #[test]
    fn invalid_settings_are_config_errors() {
        assert!(matches!(
            GraphOptions::from_toml_str("[graph]\ncompression_threshold = 140\n"),
            Err(GraphError::Config(_))
        ));
        assert!(matches!(
            GraphOptions::from_toml_str("[graph]\nunknown = 1\n"),
            Err(GraphError::Config(_))
        ));
    }

    #[test]
    fn env_overlay_parses_flags() {
        let options = GraphOptions::new()
            .overlay_vars(|key| match key {
                ENV_VERIFY => Some("off".into()),
                ENV_COMPRESSION_THRESHOLD => Some(" 0 ".into()),
                _ => None,
            })
            .unwrap();
        assert!(!options.verify_graphs);
        assert_eq!(options.compression_threshold, 0);
        assert!(GraphOptions::new()
            .overlay_vars(|key| (key == ENV_VERIFY_EDGES).then(|| "maybe".to_string()))
            .is_err());
    }
}
