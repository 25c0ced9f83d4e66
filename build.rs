//! Stamps build metadata into `OUT_DIR/version.rs` for `core::version`

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::Command;

const DEFAULT_SCHEMA_VERSION: u32 = 1;

/// `[package.metadata] record_schema_version`, which must be a positive integer
fn record_schema_version(manifest: &Path) -> Result<u32, Box<dyn Error>> {
    let table: toml::Table = std::fs::read_to_string(manifest)?.parse()?;
    let Some(value) = table
        .get("package")
        .and_then(|package| package.get("metadata"))
        .and_then(|metadata| metadata.get("record_schema_version"))
    else {
        return Ok(DEFAULT_SCHEMA_VERSION);
    };
    match value.as_integer().map(u32::try_from) {
        Some(Ok(version)) if version > 0 => Ok(version),
        _ => Err(format!(
            "record_schema_version must be a positive integer, not {}",
            value
        )
        .into()),
    }
}

/// Short hash of HEAD, or `unknown` outside a git checkout
fn git_hash() -> String {
    Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|hash| hash.trim().to_string())
        .filter(|hash| !hash.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn main() -> Result<(), Box<dyn Error>> {
    let manifest_dir = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR")?);
    let out_dir = PathBuf::from(std::env::var("OUT_DIR")?);

    let generated = format!(
        "pub const RECORD_SCHEMA_VERSION: u32 = {};\n\
         pub const BUILD_TIME: &str = {:?};\n\
         pub const GIT_HASH: &str = {:?};\n",
        record_schema_version(&manifest_dir.join("Cargo.toml"))?,
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        git_hash(),
    );
    std::fs::write(out_dir.join("version.rs"), generated)?;

    for watched in ["build.rs", "Cargo.toml", ".git/HEAD"] {
        println!("cargo:rerun-if-changed={}", watched);
    }
    Ok(())
}
