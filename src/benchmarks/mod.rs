//! Utilities for finding add-ons and the benchmarks they provide.
//!
//! Add-ons live in `<level>/datapacks/<dir>/`, each with a `pack.mcmeta`. An add-on is a benchmark group when its
//! metadata carries `"mch": true`; its benchmarks are the functions whose first line is [`BENCHMARK_MARKER`].
//!
//! # Examples
//!
//! ```no_run
//! use std::path::PathBuf;
//!
//! use mch::benchmarks::{find_all_addons, find_benchmarks};
//!
//! let datapacks = PathBuf::from("world/datapacks");
//!
//! for addon in find_all_addons(&datapacks).unwrap().iter().filter(|addon| addon.is_benchmark()) {
//!     println!("{}: {:?}", addon.name, find_benchmarks(addon).unwrap());
//! }
//! ```

use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::resource::ResourceLocation;

mod metadata;

pub use metadata::{FunctionTag, PackMetadata, PackSection};

/// Directory add-ons are installed in, relative to the level directory.
pub const DATAPACKS_DIR: &str = "datapacks";

/// Metadata file every add-on carries at its root.
pub const METADATA_FILE: &str = "pack.mcmeta";

/// First line that marks a function as a benchmark.
pub const BENCHMARK_MARKER: &str = "# @benchmark";

/// Prefix of the names the host gives to add-ons loaded from directories.
pub const FILE_PREFIX: &str = "file/";

/// An add-on found on disk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AddOn {
    /// Name the level's pack lists refer to it by, `file/<dir>`.
    pub name: String,
    /// Root directory of the add-on.
    pub path: PathBuf,
    /// Parsed `pack.mcmeta`.
    pub metadata: PackMetadata,
}

impl AddOn {
    /// Whether this add-on is a benchmark group.
    #[must_use]
    pub fn is_benchmark(&self) -> bool {
        self.metadata.pack.mch
    }
}

fn glob_under(root: &Path, pattern: &str) -> anyhow::Result<glob::Paths> {
    let root = root
        .to_str()
        .context("could not convert add-on path to string")?;
    glob::glob(&format!("{}/{pattern}", glob::Pattern::escape(root)))
        .context("could not build glob pattern")
}

/// Finds all add-ons directly under `datapacks`, sorted by name.
///
/// # Errors
///
/// If the glob pattern cannot be constructed, then the error is returned.
///
/// If any metadata file cannot be read or deserialized, then the error is logged and the add-on is skipped.
pub fn find_all_addons(datapacks: &Path) -> anyhow::Result<Vec<AddOn>> {
    log::debug!("finding all add-ons under {}...", datapacks.display());
    let mut addons: Vec<AddOn> = glob_under(datapacks, &format!("*/{METADATA_FILE}"))?
        .filter_map(|r| {
            let path = r
                .map_err(|err| log::warn!("could not get globbed path: {err}, skipping..."))
                .ok()?;
            let root = path.parent()?.to_path_buf();
            let dir = root.file_name()?.to_str().or_else(|| {
                log::warn!("add-on directory {} is not unicode, skipping...", root.display());
                None
            })?;
            let name = format!("{FILE_PREFIX}{dir}");

            let metadata: PackMetadata = serde_json::from_reader(BufReader::new(
                File::open(&path)
                    .map_err(|err| {
                        log::warn!("[{name}] could not open add-on metadata: {err}, skipping...");
                    })
                    .ok()?,
            ))
            .map_err(|err| {
                log::warn!("[{name}] could not deserialize add-on metadata: {err}, skipping...");
            })
            .ok()?;

            Some(AddOn {
                name,
                path: root,
                metadata,
            })
        })
        .collect();
    addons.sort_by(|a, b| a.name.cmp(&b.name));
    log::debug!("found {} add-ons", addons.len());
    log::trace!("add-ons: {addons:#?}");

    Ok(addons)
}

/// Splits `data/<ns>/<kind>/<rest>` (relative to the add-on root) into `(ns, rest)`.
fn split_data_path<'a>(relative: &'a Path, kind: &[&str]) -> Option<(&'a str, String)> {
    let mut components = relative.iter().map(|c| c.to_str());
    if components.next()?? != "data" {
        return None;
    }
    let namespace = components.next()??;
    for expected in kind {
        if components.next()?? != *expected {
            return None;
        }
    }
    let rest: Vec<&str> = components.collect::<Option<_>>()?;
    Some((namespace, rest.join("/")))
}

/// Finds every function an add-on defines, keyed by id.
///
/// # Errors
///
/// If the glob pattern cannot be constructed, then the error is returned. Files that do not map to a valid function
/// id are skipped.
pub fn function_files(addon: &Path) -> anyhow::Result<BTreeMap<ResourceLocation, PathBuf>> {
    Ok(glob_under(addon, "data/*/functions/**/*.mcfunction")?
        .filter_map(|r| {
            let path = r
                .map_err(|err| log::warn!("could not get globbed path: {err}, skipping..."))
                .ok()?;
            let relative = path.strip_prefix(addon).ok()?;
            let (namespace, rest) = split_data_path(relative, &["functions"])?;
            let id = ResourceLocation::from_function_path(namespace, &rest).or_else(|| {
                log::warn!("{} is not a valid function name, skipping...", path.display());
                None
            })?;
            Some((id, path))
        })
        .collect())
}

/// Finds every function tag an add-on defines, keyed by tag id.
///
/// # Errors
///
/// If the glob pattern cannot be constructed, then the error is returned. Tag files that cannot be read are logged and
/// skipped.
pub fn function_tags(addon: &Path) -> anyhow::Result<BTreeMap<ResourceLocation, FunctionTag>> {
    Ok(glob_under(addon, "data/*/tags/functions/**/*.json")?
        .filter_map(|r| {
            let path = r
                .map_err(|err| log::warn!("could not get globbed path: {err}, skipping..."))
                .ok()?;
            let relative = path.strip_prefix(addon).ok()?;
            let (namespace, rest) = split_data_path(relative, &["tags", "functions"])?;
            let id = ResourceLocation::new(namespace, rest.strip_suffix(".json")?)
                .map_err(|err| log::warn!("{err}, skipping..."))
                .ok()?;
            let tag: FunctionTag = serde_json::from_reader(BufReader::new(
                File::open(&path)
                    .map_err(|err| log::warn!("[#{id}] could not open tag: {err}, skipping..."))
                    .ok()?,
            ))
            .map_err(|err| log::warn!("[#{id}] could not deserialize tag: {err}, skipping..."))
            .ok()?;
            Some((id, tag))
        })
        .collect())
}

/// Finds the benchmarks a group provides: its functions whose first line is [`BENCHMARK_MARKER`].
///
/// # Errors
///
/// If the add-on's functions cannot be listed, then the error is returned. Unreadable function files are logged and
/// skipped.
pub fn find_benchmarks(addon: &AddOn) -> anyhow::Result<Vec<ResourceLocation>> {
    let benchmarks: Vec<ResourceLocation> = function_files(&addon.path)?
        .into_iter()
        .filter_map(|(id, path)| {
            let first = BufReader::new(
                File::open(&path)
                    .map_err(|err| {
                        log::warn!("[{}] could not open {id}: {err}, skipping...", addon.name);
                    })
                    .ok()?,
            )
            .lines()
            .next()?
            .map_err(|err| log::warn!("[{}] could not read {id}: {err}, skipping...", addon.name))
            .ok()?;
            (first == BENCHMARK_MARKER).then_some(id)
        })
        .collect();
    log::debug!("[{}] found {} benchmarks", addon.name, benchmarks.len());
    Ok(benchmarks)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn datapacks() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(
            &root.join("bench_pack").join(METADATA_FILE),
            r#"{"pack": {"pack_format": 15, "description": "x", "mch": true}}"#,
        );
        write(
            &root.join("bench_pack/data/bench/functions/fast.mcfunction"),
            "# @benchmark\nscoreboard players add n x 1\n",
        );
        write(
            &root.join("bench_pack/data/bench/functions/nested/slow.mcfunction"),
            "# @benchmark\r\nsay slow\r\n",
        );
        write(
            &root.join("bench_pack/data/bench/functions/helper.mcfunction"),
            "say not a benchmark\n# @benchmark\n",
        );
        write(
            &root.join("bench_pack/data/mch/tags/functions/setup.json"),
            r#"{"values": ["bench:helper"]}"#,
        );
        write(
            &root.join("plain_pack").join(METADATA_FILE),
            r#"{"pack": {"pack_format": 15, "description": "plain"}}"#,
        );
        write(&root.join("broken_pack").join(METADATA_FILE), "{ not json");
        write(&root.join("no_metadata/data/x/functions/f.mcfunction"), "");
        dir
    }

    #[test]
    fn addons_are_found_and_classified() {
        let dir = datapacks();
        let addons = find_all_addons(dir.path()).unwrap();
        let names: Vec<(&str, bool)> = addons
            .iter()
            .map(|addon| (addon.name.as_str(), addon.is_benchmark()))
            .collect();
        assert_eq!(names, [("file/bench_pack", true), ("file/plain_pack", false)]);
    }

    #[test]
    fn benchmarks_are_marked_by_their_first_line() {
        let dir = datapacks();
        let addons = find_all_addons(dir.path()).unwrap();
        let benchmarks: Vec<String> = find_benchmarks(&addons[0])
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(benchmarks, ["bench:fast", "bench:nested/slow"]);
    }

    #[test]
    fn tags_are_keyed_by_namespace_and_path() {
        let dir = datapacks();
        let tags = function_tags(&dir.path().join("bench_pack")).unwrap();
        let setup = tags.get(&"mch:setup".parse::<ResourceLocation>().unwrap()).unwrap();
        assert_eq!(setup.values, ["bench:helper"]);
        assert!(!setup.replace);
    }
}
