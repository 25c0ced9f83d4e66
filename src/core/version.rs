//! Build metadata accessors.
//! Includes the generated version.rs from the build script, providing a single
//! source of truth for the binary and the persistent store.

include!(concat!(env!("OUT_DIR"), "/version.rs"));

/// Schema version of the persisted work item record, from `[package.metadata]`
pub fn record_schema_version() -> u32 {
    RECORD_SCHEMA_VERSION
}

/// Build time string from the build script (UTC)
pub fn build_time() -> &'static str {
    BUILD_TIME
}

/// Short git hash captured by the build script
pub fn git_hash() -> &'static str {
    GIT_HASH
}

/// Long version string shown by `workline --version`
pub fn long_version() -> String {
    format!(
        "{} (git {}, built {})",
        env!("CARGO_PKG_VERSION"),
        git_hash(),
        build_time()
    )
}
