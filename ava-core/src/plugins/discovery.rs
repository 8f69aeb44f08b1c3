//! Plugin package discovery
//!
//! A discovery path contains one subdirectory per package. A package holds
//! a dynamic library named after its directory:
//!
//! ```text
//! plugins/
//! └── ava-heartbeat/
//!     └── libava_heartbeat.so   (or ava-heartbeat.so, libava-heartbeat.so)
//! ```

use libloading::Library;
use std::path::{Path, PathBuf};

use ava_plugin_api::{API_VERSION, PluginClass};

use super::error::PluginHostError;

/// A package directory and the library found in it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginPackage {
    pub dir: PathBuf,
    pub library: PathBuf,
}

/// An opened package: the library must outlive every class and instance
/// created from it.
pub(crate) struct OpenedPackage {
    pub library: Library,
    pub classes: Vec<PluginClass>,
}

fn library_extensions() -> &'static [&'static str] {
    if cfg!(target_os = "macos") {
        &["dylib", "so"]
    } else if cfg!(target_os = "windows") {
        &["dll"]
    } else {
        &["so"]
    }
}

/// Scan the immediate subdirectories of `dir` for packages.
///
/// Subdirectories without a library are skipped. Results are sorted by
/// directory name.
pub fn scan_directory(dir: &Path) -> Result<Vec<PluginPackage>, PluginHostError> {
    if !dir.is_dir() {
        return Err(PluginHostError::PluginDirNotFound {
            path: dir.to_path_buf(),
        });
    }

    let mut packages = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match find_library(&path, name) {
            Ok(library) => packages.push(PluginPackage {
                dir: path.clone(),
                library,
            }),
            Err(e) => {
                tracing::debug!(dir = %path.display(), error = %e, "Skipping directory");
            }
        }
    }

    packages.sort_by(|a, b| a.dir.cmp(&b.dir));
    Ok(packages)
}

/// Find the library file in a package directory
pub fn find_library(dir: &Path, name: &str) -> Result<PathBuf, PluginHostError> {
    let snake = name.replace('-', "_");
    let stems = [name.to_string(), format!("lib{name}"), format!("lib{snake}")];

    for ext in library_extensions() {
        for stem in &stems {
            let lib_path = dir.join(format!("{stem}.{ext}"));
            if lib_path.is_file() {
                return Ok(lib_path);
            }
        }
    }

    Err(PluginHostError::LibraryNotFound {
        dir: dir.to_path_buf(),
    })
}

/// Load a package library and collect the classes it exports.
pub(crate) fn open_package(path: &Path) -> Result<OpenedPackage, PluginHostError> {
    // SAFETY: plugin packages are trusted, in-process code placed in a
    // discovery path by the user.
    let library = unsafe { Library::new(path)? };

    let classes = {
        // SAFETY: symbol signature is fixed by `export_plugins!`.
        let api_version_fn: libloading::Symbol<extern "C" fn() -> u32> =
            unsafe { library.get(b"_ava_plugin_api_version")? };
        let found = api_version_fn();
        if found != API_VERSION {
            return Err(PluginHostError::ApiVersionMismatch {
                expected: API_VERSION,
                found,
            });
        }

        // SAFETY: the pointer comes from `Box::into_raw` in `export_plugins!`
        // and ownership is transferred to us.
        let classes_fn: libloading::Symbol<extern "C" fn() -> *mut Vec<PluginClass>> =
            unsafe { library.get(b"_ava_plugin_classes")? };
        let raw = classes_fn();
        if raw.is_null() {
            return Err(PluginHostError::EmptyPackage {
                path: path.to_path_buf(),
            });
        }
        let boxed = unsafe { Box::from_raw(raw) };
        *boxed
    };

    if classes.is_empty() {
        return Err(PluginHostError::EmptyPackage {
            path: path.to_path_buf(),
        });
    }

    Ok(OpenedPackage { library, classes })
}
