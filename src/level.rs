//! The world's persistent `level.dat`, as far as the harness cares about it.
//!
//! Only two fields are ever rewritten: the `Data.DataPacks.Enabled` and `Data.DataPacks.Disabled` string lists, which
//! decide which add-ons the host loads. Every other field is carried through untouched, in its original order.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::nbt::{self, Compound, List, Tag};

/// Name of the world save file inside a level directory.
pub const FILE_NAME: &str = "level.dat";

/// The built-in add-on every world starts with.
pub const VANILLA_PACK: &str = "vanilla";

/// Errors produced while loading or editing a level.
#[derive(Debug, Error)]
pub enum LevelError {
    /// The file could not be read or written, or is not a valid tagged tree.
    #[error("could not access {path}: {source}")]
    Tree {
        /// File being accessed.
        path: PathBuf,
        /// Underlying codec error.
        #[source]
        source: nbt::Error,
    },
    /// A field the harness edits exists but has an unexpected type.
    #[error("malformed level: {0} has an unexpected type")]
    UnexpectedType(&'static str),
}

/// Which of the two add-on lists a pack lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PackList {
    Enabled,
    Disabled,
}

impl PackList {
    fn key(self) -> &'static str {
        match self {
            PackList::Enabled => "Enabled",
            PackList::Disabled => "Disabled",
        }
    }
}

/// A loaded `level.dat`.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
///
/// use mch::level::LevelStorage;
///
/// let mut level = LevelStorage::load(Path::new("world/level.dat")).unwrap();
/// level.activate("file/my_pack").unwrap();
/// level.save().unwrap();
/// ```
#[derive(Clone, Debug)]
pub struct LevelStorage {
    path: PathBuf,
    root: Compound,
}

impl LevelStorage {
    /// Loads an existing save file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not a well-formed tree with a compound root.
    pub fn load(path: &Path) -> Result<Self, LevelError> {
        log::debug!("loading {}...", path.display());
        let root = nbt::read_file(path).map_err(|source| LevelError::Tree {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            root,
        })
    }

    /// Builds a fresh save for `path` with the given packs enabled, nothing disabled and the default chain budget.
    /// Nothing is written until [`LevelStorage::save`].
    #[must_use]
    pub fn create(path: &Path, enabled: &[String], max_command_chain_length: i32) -> Self {
        let mut data_packs = Compound::new();
        data_packs.insert("Enabled", Tag::List(List::strings(enabled.iter().cloned())));
        data_packs.insert("Disabled", Tag::List(List::new()));

        let mut game_rules = Compound::new();
        game_rules.insert(
            "maxCommandChainLength",
            Tag::String(max_command_chain_length.to_string()),
        );

        let mut data = Compound::new();
        data.insert("DataPacks", Tag::Compound(data_packs));
        data.insert("GameRules", Tag::Compound(game_rules));
        data.insert("version", Tag::Int(19_133));

        let mut root = Compound::new();
        root.insert("Data", Tag::Compound(data));
        Self {
            path: path.to_path_buf(),
            root,
        }
    }

    /// Writes the whole tree back to where it was loaded from.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be written.
    pub fn save(&self) -> Result<(), LevelError> {
        log::debug!("overwriting {}...", self.path.display());
        nbt::write_file(&self.path, &self.root).map_err(|source| LevelError::Tree {
            path: self.path.clone(),
            source,
        })
    }

    /// Where the level is saved.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The whole tree.
    #[must_use]
    pub fn root(&self) -> &Compound {
        &self.root
    }

    /// Packs the host loads, in load order.
    #[must_use]
    pub fn enabled(&self) -> Vec<String> {
        self.packs(PackList::Enabled)
    }

    /// Packs the host knows about but skips.
    #[must_use]
    pub fn disabled(&self) -> Vec<String> {
        self.packs(PackList::Disabled)
    }

    /// Moves `pack` out of the disabled list and to the end of the enabled list, unless it is already enabled.
    ///
    /// # Errors
    ///
    /// Fails if the pack lists are present with the wrong type.
    pub fn activate(&mut self, pack: &str) -> Result<(), LevelError> {
        self.move_pack(pack, PackList::Disabled, PackList::Enabled)
    }

    /// Moves `pack` out of the enabled list and to the end of the disabled list, unless it is already disabled.
    ///
    /// # Errors
    ///
    /// Fails if the pack lists are present with the wrong type.
    pub fn deactivate(&mut self, pack: &str) -> Result<(), LevelError> {
        self.move_pack(pack, PackList::Enabled, PackList::Disabled)
    }

    /// Disables every benchmark add-on except `active`, which is enabled.
    ///
    /// # Errors
    ///
    /// Fails if the pack lists are present with the wrong type.
    pub fn select_group(
        &mut self,
        benchmark_packs: &BTreeSet<String>,
        active: Option<&str>,
    ) -> Result<(), LevelError> {
        for pack in benchmark_packs {
            if Some(pack.as_str()) != active {
                self.deactivate(pack)?;
            }
        }
        if let Some(active) = active {
            self.activate(active)?;
        }
        Ok(())
    }

    /// Appends packs that are in neither list to the enabled list, the way the host treats newly dropped-in packs.
    /// Returns whether anything changed.
    ///
    /// # Errors
    ///
    /// Fails if the pack lists are present with the wrong type.
    pub fn adopt_new_packs<'a>(
        &mut self,
        found: impl IntoIterator<Item = &'a str>,
    ) -> Result<bool, LevelError> {
        let known: BTreeSet<String> = self
            .enabled()
            .into_iter()
            .chain(self.disabled())
            .collect();
        let mut enabled = self.enabled();
        let before = enabled.len();
        for pack in found {
            if !known.contains(pack) && !enabled.iter().any(|p| p == pack) {
                enabled.push(pack.to_string());
            }
        }
        if enabled.len() == before {
            return Ok(false);
        }
        self.set_packs(PackList::Enabled, enabled)?;
        Ok(true)
    }

    /// Reads a game rule, stored as a string under `Data.GameRules`.
    #[must_use]
    pub fn game_rule(&self, name: &str) -> Option<&str> {
        self.root
            .get("Data")?
            .as_compound()?
            .get("GameRules")?
            .as_compound()?
            .get(name)?
            .as_str()
    }

    /// Sets a game rule.
    ///
    /// # Errors
    ///
    /// Fails if `Data` or `Data.GameRules` exists with the wrong type.
    pub fn set_game_rule(&mut self, name: &str, value: &str) -> Result<(), LevelError> {
        let game_rules = self
            .root
            .compound_entry("Data")
            .ok_or(LevelError::UnexpectedType("Data"))?
            .compound_entry("GameRules")
            .ok_or(LevelError::UnexpectedType("Data.GameRules"))?;
        game_rules.insert(name, Tag::String(value.to_string()));
        Ok(())
    }

    fn packs(&self, list: PackList) -> Vec<String> {
        self.root
            .get("Data")
            .and_then(Tag::as_compound)
            .and_then(|data| data.get("DataPacks"))
            .and_then(Tag::as_compound)
            .and_then(|packs| packs.get(list.key()))
            .and_then(Tag::as_list)
            .map(|list| {
                list.iter()
                    .filter_map(Tag::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn set_packs(&mut self, list: PackList, packs: Vec<String>) -> Result<(), LevelError> {
        let data_packs = self
            .root
            .compound_entry("Data")
            .ok_or(LevelError::UnexpectedType("Data"))?
            .compound_entry("DataPacks")
            .ok_or(LevelError::UnexpectedType("Data.DataPacks"))?;
        if data_packs
            .get(list.key())
            .is_some_and(|tag| tag.as_list().is_none())
        {
            return Err(LevelError::UnexpectedType(match list {
                PackList::Enabled => "Data.DataPacks.Enabled",
                PackList::Disabled => "Data.DataPacks.Disabled",
            }));
        }
        data_packs.insert(list.key(), Tag::List(List::strings(packs)));
        Ok(())
    }

    fn move_pack(&mut self, pack: &str, from: PackList, to: PackList) -> Result<(), LevelError> {
        let mut source = self.packs(from);
        let mut target = self.packs(to);
        let before = (source.len(), target.len());
        source.retain(|p| p != pack);
        if !target.iter().any(|p| p == pack) {
            target.push(pack.to_string());
        }
        if (source.len(), target.len()) == before {
            return Ok(());
        }
        self.set_packs(from, source)?;
        self.set_packs(to, target)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::GzDecoder;

    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    fn level_with_extras(dir: &Path) -> LevelStorage {
        let mut level =
            LevelStorage::create(&dir.join(FILE_NAME), &strings(&["vanilla", "file/b"]), 65536);
        level.activate("file/a").unwrap();
        level.deactivate("file/c").unwrap();
        let data = level.root.get_mut("Data").and_then(Tag::as_compound_mut).unwrap();
        data.insert("LevelName", Tag::String("bench".to_string()));
        data.insert("Time", Tag::Long(123_456));
        data.insert("Bytes", Tag::ByteArray(vec![1, 2, 3]));
        level
    }

    fn without_packs(root: &Compound) -> Vec<u8> {
        let mut root = root.clone();
        if let Some(data) = root.get_mut("Data").and_then(Tag::as_compound_mut) {
            data.remove("DataPacks");
        }
        let mut bytes = Vec::new();
        nbt::encode(&Tag::Compound(root), &mut bytes).unwrap();
        let mut raw = Vec::new();
        GzDecoder::new(bytes.as_slice()).read_to_end(&mut raw).unwrap();
        raw
    }

    #[test]
    fn activate_and_deactivate_touch_only_pack_lists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FILE_NAME);
        let mut original =
            LevelStorage::create(&path, &strings(&["file/a", "file/b"]), 65536);
        original.deactivate("file/c").unwrap();
        original
            .root
            .get_mut("Data")
            .and_then(Tag::as_compound_mut)
            .unwrap()
            .insert("Seed", Tag::Long(-42));
        assert_eq!(original.enabled(), strings(&["file/a", "file/b"]));
        assert_eq!(original.disabled(), strings(&["file/c"]));
        original.save().unwrap();

        let mut level = LevelStorage::load(&path).unwrap();
        level.activate("file/c").unwrap();
        level.deactivate("file/b").unwrap();
        level.save().unwrap();

        let reloaded = LevelStorage::load(&path).unwrap();
        assert_eq!(reloaded.enabled(), strings(&["file/a", "file/c"]));
        assert_eq!(reloaded.disabled(), strings(&["file/b"]));
        assert_eq!(without_packs(reloaded.root()), without_packs(original.root()));
    }

    #[test]
    fn select_group_enables_exactly_one_benchmark_pack() {
        let dir = tempfile::tempdir().unwrap();
        let mut level = level_with_extras(dir.path());
        let benchmark_packs: BTreeSet<String> =
            strings(&["file/a", "file/b", "file/c"]).into_iter().collect();

        level.select_group(&benchmark_packs, Some("file/c")).unwrap();
        assert_eq!(level.enabled(), strings(&["vanilla", "file/c"]));
        assert_eq!(level.disabled(), strings(&["file/a", "file/b"]));

        level.select_group(&benchmark_packs, None).unwrap();
        assert_eq!(level.enabled(), strings(&["vanilla"]));
        assert_eq!(level.disabled(), strings(&["file/a", "file/b", "file/c"]));
    }

    #[test]
    fn game_rules_are_strings() {
        let dir = tempfile::tempdir().unwrap();
        let mut level = level_with_extras(dir.path());
        assert_eq!(level.game_rule("maxCommandChainLength"), Some("65536"));
        level.set_game_rule("maxCommandChainLength", "10").unwrap();
        assert_eq!(level.game_rule("maxCommandChainLength"), Some("10"));
        assert_eq!(level.game_rule("doDaylightCycle"), None);
    }

    #[test]
    fn new_packs_are_adopted_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut level = level_with_extras(dir.path());
        assert!(level.adopt_new_packs(["file/a", "file/d"]).unwrap());
        assert!(!level.adopt_new_packs(["file/c", "file/d"]).unwrap());
        assert_eq!(level.enabled(), strings(&["vanilla", "file/b", "file/a", "file/d"]));
    }

    #[test]
    fn wrongly_typed_pack_list_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut level = level_with_extras(dir.path());
        level
            .root
            .get_mut("Data")
            .and_then(Tag::as_compound_mut)
            .and_then(|data| data.get_mut("DataPacks"))
            .and_then(Tag::as_compound_mut)
            .unwrap()
            .insert("Enabled", Tag::Int(0));
        assert!(matches!(
            level.activate("file/c"),
            Err(LevelError::UnexpectedType("Data.DataPacks.Enabled"))
        ));
    }
}
