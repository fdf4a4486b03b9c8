//! The host's `server.properties`, read only for where the level lives.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

/// Properties file looked up in the server's working directory.
pub const FILE_NAME: &str = "server.properties";

/// Level directory used when `level-name` is not set.
pub const DEFAULT_LEVEL_NAME: &str = "world";

/// Parsed `key=value` pairs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerProperties {
    entries: BTreeMap<String, String>,
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

impl ServerProperties {
    /// Parses properties text. Blank lines and lines starting with `#` or `!` are ignored; keys and values are
    /// separated by the first `=` or `:`.
    #[must_use]
    pub fn parse(source: &str) -> Self {
        let entries = source
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
            .map(|line| match line.find(['=', ':']) {
                Some(at) => (line[..at].trim_end(), line[at + 1..].trim_start()),
                None => (line, ""),
            })
            .map(|(key, value)| (unescape(key), unescape(value)))
            .collect();
        Self { entries }
    }

    /// Reads [`FILE_NAME`] from `directory`. A missing file is the same as an empty one.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read.
    pub fn load(directory: &Path) -> io::Result<Self> {
        match fs::read_to_string(directory.join(FILE_NAME)) {
            Ok(source) => Ok(Self::parse(&source)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err),
        }
    }

    /// Unescaped value of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// `level-name`, or [`DEFAULT_LEVEL_NAME`].
    #[must_use]
    pub fn level_name(&self) -> &str {
        self.get("level-name")
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_LEVEL_NAME)
    }

    /// The level directory, relative to the server's working `directory`.
    #[must_use]
    pub fn level_dir(&self, directory: &Path) -> PathBuf {
        directory.join(self.level_name())
    }
}
