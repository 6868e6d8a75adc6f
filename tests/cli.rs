use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::*;

macro_rules! cargo_run {
    ($cmd:expr, $($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin($cmd)?;
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

#[rstest]
#[case::scan("scan")]
#[case::search("search")]
#[case::server("server")]
#[case::clean("clean")]
fn subcommand_help(#[case] subcmd: &str) -> Result<()> {
    cargo_run!("mmsearch", subcmd, "--help").success();
    Ok(())
}

#[test]
fn clean_creates_database() -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;

    cargo_run!("mmsearch", "-c", conf_dir.path(), "clean").success();
    assert!(conf_dir.path().join("mmsearch.db").exists());

    Ok(())
}

#[test]
fn scan_requires_assets() -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;

    cargo_run!("mmsearch", "-c", conf_dir.path(), "scan")
        .failure()
        .stderr(predicate::str::contains("未指定素材目录"));

    Ok(())
}

#[test]
fn unknown_search_kind() -> Result<()> {
    cargo_run!("mmsearch", "search", "--kind", "audio", "cat")
        .failure()
        .stderr(predicate::str::contains("audio"));
    Ok(())
}
