use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::info;

use crate::error::{Error, Result};

/// Run-wide class registry: the working directory and the ordered class names.
///
/// The position of a name in `class_names` is its label everywhere downstream,
/// so the list is fixed once built by [`MetaConfig::train`] or
/// [`MetaConfig::test`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaConfig {
    working_dir: PathBuf,
    class_names: Vec<String>,
}

impl MetaConfig {
    pub const CLASS_NAMES_FILENAME: &'static str = "class_names.txt";

    pub fn new(working_dir: impl Into<PathBuf>, class_names: Vec<String>) -> Self {
        MetaConfig {
            working_dir: working_dir.into(),
            class_names,
        }
    }

    /// `/tmp/<unix seconds>`, a fresh directory per run.
    pub fn default_working_dir() -> PathBuf {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        PathBuf::from("/tmp").join(secs.to_string())
    }

    /// Scans `image_dir` for class directories (every non-dot subdirectory, in
    /// sorted order) and persists the names to `working_dir`.
    pub fn train(image_dir: impl AsRef<Path>, working_dir: impl Into<PathBuf>) -> Result<Self> {
        let image_dir = image_dir.as_ref();
        let working_dir = working_dir.into();
        fs::create_dir_all(&working_dir)?;

        let mut class_names = Vec::new();
        for entry in fs::read_dir(image_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') && entry.path().is_dir() {
                check_class_name(&name)?;
                class_names.push(name);
            }
        }
        class_names.sort();

        let meta = MetaConfig::new(working_dir, class_names);
        meta.save()?;
        info!(
            classes = meta.class_names.len(),
            working_dir = %meta.working_dir.display(),
            "class names registered"
        );
        Ok(meta)
    }

    /// Loads the class names a previous training run persisted in `working_dir`.
    pub fn test(working_dir: impl Into<PathBuf>) -> Result<Self> {
        let working_dir = working_dir.into();
        let path = working_dir.join(Self::CLASS_NAMES_FILENAME);
        if !path.is_file() {
            return Err(Error::missing(format!(
                "class names file {} does not exist",
                path.display()
            )));
        }
        let text = fs::read_to_string(&path)?;
        let class_names = parse_class_names(&text);
        Ok(MetaConfig::new(working_dir, class_names))
    }

    /// Writes one class name per line.
    pub fn save(&self) -> Result<()> {
        let mut text = self.class_names.join("\n");
        text.push('\n');
        fs::write(self.class_names_path(), text)?;
        Ok(())
    }

    pub fn class_names_path(&self) -> PathBuf {
        self.working_dir.join(Self::CLASS_NAMES_FILENAME)
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    pub fn label_of(&self, class_name: &str) -> Option<usize> {
        self.class_names.iter().position(|name| name == class_name)
    }

    /// Fails unless at least one class is known.
    pub fn require_classes(&self) -> Result<()> {
        if self.class_names.is_empty() {
            return Err(Error::missing("no class names are loaded"));
        }
        Ok(())
    }
}

// Names must read back unchanged from `class_names.txt`.
fn check_class_name(name: &str) -> Result<()> {
    if name.contains(',') || name.trim() != name || name.chars().any(char::is_control) {
        return Err(Error::contract(format!(
            "class directory {name:?} cannot be stored in {}",
            MetaConfig::CLASS_NAMES_FILENAME
        )));
    }
    Ok(())
}

// Accepts both the one-per-line layout and comma separated lists.
fn parse_class_names(text: &str) -> Vec<String> {
    text.lines()
        .flat_map(|line| line.split(','))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}
