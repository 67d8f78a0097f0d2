use data_contracts::{ChannelMeans, ContractError};
use std::fs;

#[test]
fn means_artifact_survives_save_and_load() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("output").join("means.json");
    let means = ChannelMeans::new(120.0, 110.5, 99.25);
    means.save(&path)?;

    let raw = fs::read_to_string(&path)?;
    assert!(raw.contains("\"R\""));
    assert_eq!(ChannelMeans::load(&path)?, means);
    Ok(())
}

#[test]
fn load_reports_json_errors_with_path() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("means.json");
    fs::write(&path, b"{\"R\": 1.0}")?;
    match ChannelMeans::load(&path) {
        Err(ContractError::Json { path: p, .. }) => assert_eq!(p, path),
        other => panic!("expected json error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn missing_file_is_an_io_error() {
    let err = ChannelMeans::load(std::path::Path::new("/nonexistent/means.json")).unwrap_err();
    assert!(matches!(err, ContractError::Io { .. }));
}
