//! Engine binary locations.
//!
//! Downloading the binaries is the job of the external bootstrap; this
//! module only resolves where they must be and cleans up leftovers from
//! interrupted downloads.
use std::path::Path;
use std::path::PathBuf;

use crate::error::EngineError;

/// The pinned engine build the bootstrap installs.
pub(crate) const ENGINE_VERSION: &str = "34df67547cf5598f5a6cd3eb45f14ee70c3fb86f";

#[derive(Debug, Clone)]
pub(crate) struct EnginePaths {
    pub(crate) query_engine: PathBuf,
    pub(crate) introspection_engine: PathBuf,
}

impl EnginePaths {
    pub(crate) fn resolve(wundergraph_dir: &Path) -> Result<Self, EngineError> {
        let prisma_dir = wundergraph_dir.join("generated").join("prisma");
        std::fs::create_dir_all(&prisma_dir)?;

        let versioned = prisma_dir.join(ENGINE_VERSION);
        let query_engine = versioned.join(format!("prisma-query-engine-{}", platform_name()));
        let introspection_engine =
            versioned.join(format!("prisma-introspection-engine-{}", platform_name()));

        // leftovers of an interrupted download
        let _ = std::fs::remove_file(tmp_path(&query_engine));
        let _ = std::fs::remove_file(tmp_path(&introspection_engine));

        for path in [&query_engine, &introspection_engine] {
            if !path.exists() {
                return Err(EngineError::BinaryMissing { path: path.clone() });
            }
        }

        Ok(EnginePaths {
            query_engine,
            introspection_engine,
        })
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(".tmp");
    PathBuf::from(raw)
}

pub(crate) fn platform_name() -> &'static str {
    if cfg!(target_os = "macos") {
        if cfg!(target_arch = "aarch64") {
            "darwin-arm64"
        } else {
            "darwin"
        }
    } else if cfg!(target_os = "windows") {
        "windows"
    } else {
        "debian-openssl-1.1.x"
    }
}
