// SPDX-License-Identifier: GPL-3.0-or-later
use std::path::Path;
use std::sync::RwLock;

use fetcharr_domain::{Error, Result};
use tracing::info;

/// Case-insensitive substring blacklist loaded from a word-list file.
/// One term per line, `#` comments allowed, terms lowercased on load.
pub struct Blacklist {
    words: RwLock<Vec<String>>,
}

impl Default for Blacklist {
    fn default() -> Self {
        Self::new()
    }
}

impl Blacklist {
    pub fn new() -> Self {
        Self { words: RwLock::new(Vec::new()) }
    }

    /// Load terms from the given file. A missing file leaves the list empty.
    pub fn load(&self, path: &Path) -> Result<()> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(Error::external("blacklist", err)),
        };

        let words: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_lowercase)
            .collect();

        info!(target: "blacklist", count = words.len(), "blacklist loaded");
        *self.words.write().expect("blacklist lock poisoned") = words;
        Ok(())
    }

    /// The first blacklisted term the title contains, if any.
    pub fn matches(&self, title: &str) -> Option<String> {
        let title = title.to_lowercase();
        self.words
            .read()
            .expect("blacklist lock poisoned")
            .iter()
            .find(|word| title.contains(word.as_str()))
            .cloned()
    }

    pub fn contains(&self, title: &str) -> bool {
        self.matches(title).is_some()
    }
}
