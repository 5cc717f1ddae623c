use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;
use usermerge::{pipeline, AggregatorConfig, CancelToken, ConfigOverrides};

fn write_config(dir: &TempDir, body: &str) -> anyhow::Result<String> {
    let path = dir.path().join("usermerge.toml");
    fs::write(&path, body)?;
    Ok(path.to_string_lossy().into_owned())
}

#[test]
fn file_values_fill_in_over_defaults() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = write_config(&dir, "shard_count = 7\nqueue_capacity = 3\n")?;

    let config = AggregatorConfig::load(Some(&path), ConfigOverrides::default())?;

    assert_eq!(config.shard_count, 7);
    assert_eq!(config.queue_capacity, 3);
    assert_eq!(config.output_path, AggregatorConfig::default().output_path);
    Ok(())
}

#[test]
fn cli_overrides_beat_the_file() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = write_config(&dir, "shard_count = 7\nworker_count = 2\n")?;
    let overrides = ConfigOverrides {
        shard_count: Some(64),
        output_path: Some(PathBuf::from("elsewhere.csv")),
        ..ConfigOverrides::default()
    };

    let config = AggregatorConfig::load(Some(&path), overrides)?;

    assert_eq!(config.shard_count, 64);
    assert_eq!(config.worker_count, 2);
    assert_eq!(config.output_path, PathBuf::from("elsewhere.csv"));
    Ok(())
}

#[test]
fn invalid_file_values_are_rejected() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = write_config(&dir, "worker_count = 0\n")?;

    let err = AggregatorConfig::load(Some(&path), ConfigOverrides::default()).unwrap_err();

    assert!(err.to_string().contains("worker_count"));
    Ok(())
}

#[test]
fn malformed_file_is_a_config_error() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = write_config(&dir, "shard_count = \"many\"\n")?;

    let err = AggregatorConfig::load(Some(&path), ConfigOverrides::default()).unwrap_err();

    assert!(err.to_string().starts_with("configuration error"));
    Ok(())
}

#[test]
fn loaded_config_drives_a_full_run() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let input = dir.path().join("in.data");
    let output = dir.path().join("out.csv");
    fs::write(
        &input,
        r#"{"id":"1","type":"attributes","user_id":"u9","data":{"tier":"gold"},"timestamp":1}"#,
    )?;
    let path = write_config(
        &dir,
        &format!(
            "input_path = {:?}\noutput_path = {:?}\nshard_count = 2\nworker_count = 3\n",
            input.to_string_lossy(),
            output.to_string_lossy(),
        ),
    )?;

    let config = AggregatorConfig::load(Some(&path), ConfigOverrides::default())?;
    let report = pipeline::run(&config, &CancelToken::new())?;

    assert!(report.is_clean());
    assert_eq!(fs::read_to_string(&output)?, "u9,tier=gold\n");
    Ok(())
}
