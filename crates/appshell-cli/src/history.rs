//! Command history persisted as `{"entries": [...]}`.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    #[serde(default)]
    entries: Vec<String>,
    #[serde(skip)]
    path: PathBuf,
}

impl History {
    /// Loads the history stored at `path`; a missing file is an empty
    /// history.
    pub fn load(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let mut history = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<Self>(&bytes).map_err(io::Error::other)?,
            Err(error) if error.kind() == io::ErrorKind::NotFound => Self::default(),
            Err(error) => return Err(error),
        };
        history.path = path;
        history.dedup();
        Ok(history)
    }

    pub fn save(&self) -> io::Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(io::Error::other)?;
        fs::write(&self.path, json)
    }

    /// Appends `entry`, dropping any earlier copy of it.
    pub fn push(&mut self, entry: &str) {
        self.entries.retain(|existing| existing != entry);
        self.entries.push(entry.to_owned());
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keeps only the last occurrence of each entry.
    fn dedup(&mut self) {
        let mut kept: Vec<String> = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..).rev() {
            if !kept.contains(&entry) {
                kept.push(entry);
            }
        }
        kept.reverse();
        self.entries = kept;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn push_keeps_the_last_occurrence() {
        let mut history = History::default();
        for entry in ["a", "b", "a", "c"] {
            history.push(entry);
        }
        assert_eq!(history.entries(), ["b", "a", "c"]);
    }

    #[test]
    fn missing_file_is_empty_and_saves_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let mut history = History::load(&path).unwrap();
        assert!(history.entries().is_empty());

        history.push("x := 1");
        history.push("x");
        history.save().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"entries\""));
        assert_eq!(History::load(&path).unwrap().entries(), ["x := 1", "x"]);
    }

    #[test]
    fn duplicates_on_disk_are_collapsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, r#"{"entries": ["a", "b", "a"]}"#).unwrap();
        assert_eq!(History::load(&path).unwrap().entries(), ["b", "a"]);
    }
}
