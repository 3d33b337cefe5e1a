use std::fs;

use nodegraph::options::{ENV_COMPRESSION_THRESHOLD, ENV_VERIFY_EDGES};
use nodegraph::testkit::SampleTypes;
use nodegraph::{GraphError, GraphOptions, Result};

#[test]
fn options_file_round_trips() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("graph.toml");
    let written = GraphOptions::new()
        .compression_threshold(45)
        .usage_removal_lookahead(4)
        .track_source_positions(true)
        .name("loop-body");
    fs::write(&path, written.to_toml_string()?)?;

    let loaded = GraphOptions::from_path(&path)?;
    assert_eq!(loaded.compression_threshold, 45);
    assert_eq!(loaded.usage_removal_lookahead, 4);
    assert!(loaded.track_source_positions);
    assert!(loaded.verify_graphs);
    assert_eq!(loaded.name.as_deref(), Some("loop-body"));

    let types = SampleTypes::new()?;
    let graph = types.graph(loaded);
    assert_eq!(graph.name(), Some("loop-body"));
    assert!(graph.tracks_source_positions());
    Ok(())
}

#[test]
fn files_without_a_graph_table_keep_defaults() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("empty.toml");
    fs::write(&path, "# nothing configured\n")?;
    let loaded = GraphOptions::from_path(&path)?;
    assert_eq!(loaded.compression_threshold, GraphOptions::new().compression_threshold);
    assert_eq!(loaded.name, None);
    Ok(())
}

#[test]
fn missing_and_malformed_files_are_reported() -> Result<()> {
    let dir = tempfile::tempdir()?;
    assert!(matches!(
        GraphOptions::from_path(dir.path().join("absent.toml")),
        Err(GraphError::Io(_))
    ));

    let path = dir.path().join("broken.toml");
    fs::write(&path, "[graph]\nverify_graphs = \"sometimes\"\n")?;
    assert!(matches!(
        GraphOptions::from_path(&path),
        Err(GraphError::Config(_))
    ));
    Ok(())
}

#[test]
fn environment_overrides_file_settings() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("graph.toml");
    fs::write(&path, "[graph]\ncompression_threshold = 30\nverify_graph_edges = false\n")?;

    let options = GraphOptions::from_path(&path)?.overlay_vars(|key| match key {
        ENV_COMPRESSION_THRESHOLD => Some("85".to_string()),
        ENV_VERIFY_EDGES => Some("yes".to_string()),
        _ => None,
    })?;
    assert_eq!(options.compression_threshold, 85);
    assert!(options.verify_graph_edges);

    let rejected = GraphOptions::new()
        .overlay_vars(|key| (key == ENV_COMPRESSION_THRESHOLD).then(|| "200".to_string()));
    assert!(matches!(rejected, Err(GraphError::Config(_))));
    Ok(())
}
