//! Exclude rules for the directory producer
//!
//! Sources, highest priority first:
//! 1. Built-in patterns (VCS metadata, editor temp files; always active)
//! 2. `.feedignore` in the scanned root
//! 3. `.gitignore` in the scanned root
//! 4. Patterns from configuration

use anyhow::Result;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory names never scanned
const BUILTIN_DIRS: &[&str] = &[".git", ".jj", ".hg", ".svn"];

/// Exclude configuration of one directory monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludeConfig {
    /// Honor `.gitignore` in the scanned root (default: true)
    #[serde(default = "default_true")]
    pub use_gitignore: bool,

    /// Honor `.feedignore` in the scanned root (default: true)
    #[serde(default = "default_true")]
    pub use_feedignore: bool,

    /// Additional gitignore-style patterns
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl Default for ExcludeConfig {
    fn default() -> Self {
        Self {
            use_gitignore: true,
            use_feedignore: true,
            patterns: vec![],
        }
    }
}

fn default_true() -> bool {
    true
}

/// Compiled exclude rules for one root
pub struct ExcludeRules {
    root: PathBuf,
    feedignore: Option<Gitignore>,
    gitignore: Option<Gitignore>,
    configured: Option<Gitignore>,
}

impl ExcludeRules {
    /// Load the exclude files found under `root`
    ///
    /// Exclude files are read once; a monitor picks up edits to them on its
    /// next start.
    pub fn load(root: &Path, config: &ExcludeConfig) -> Result<Self> {
        let feedignore = if config.use_feedignore {
            load_file(root, ".feedignore")?
        } else {
            None
        };
        let gitignore = if config.use_gitignore {
            load_file(root, ".gitignore")?
        } else {
            None
        };

        let configured = if config.patterns.is_empty() {
            None
        } else {
            let mut builder = GitignoreBuilder::new(root);
            for pattern in &config.patterns {
                builder.add_line(None, pattern)?;
            }
            Some(builder.build()?)
        };

        Ok(Self {
            root: root.to_path_buf(),
            feedignore,
            gitignore,
            configured,
        })
    }

    /// Whether `path` (relative to the root) is excluded
    pub fn is_excluded(&self, path: &Path, is_dir: bool) -> bool {
        if is_builtin_excluded(path) {
            return true;
        }

        // `.feedignore` can whitelist what `.gitignore` excludes
        if let Some(feedignore) = &self.feedignore {
            let matched = feedignore.matched(path, is_dir);
            if matched.is_ignore() {
                return true;
            }
            if matched.is_whitelist() {
                return false;
            }
        }

        [&self.gitignore, &self.configured]
            .into_iter()
            .flatten()
            .any(|rules| rules.matched(path, is_dir).is_ignore())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn load_file(root: &Path, name: &str) -> Result<Option<Gitignore>> {
    let path = root.join(name);
    if !path.exists() {
        return Ok(None);
    }

    let mut builder = GitignoreBuilder::new(root);
    if let Some(err) = builder.add(&path) {
        return Err(err.into());
    }
    Ok(Some(builder.build()?))
}

fn is_builtin_excluded(path: &Path) -> bool {
    let in_vcs_dir = path.components().any(|component| {
        component
            .as_os_str()
            .to_str()
            .map(|name| BUILTIN_DIRS.contains(&name))
            .unwrap_or(false)
    });
    if in_vcs_dir {
        return true;
    }

    let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("");

    // Vim swap files, backups, Emacs autosave/lock files
    filename.ends_with(".swp")
        || filename.ends_with(".swo")
        || filename.ends_with('~')
        || (filename.starts_with('#') && filename.ends_with('#'))
        || filename.starts_with(".#")
        || filename == ".DS_Store"
        || filename == "Thumbs.db"
}
