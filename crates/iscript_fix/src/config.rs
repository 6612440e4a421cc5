use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Optional `iscript_fix.toml`; command-line flags win over it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Stock iscript.bin the new entries are appended to.
    pub baseline: Option<PathBuf>,
    /// Replaces the extension of the input file to name the output.
    pub output_suffix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            baseline: None,
            output_suffix: " fixed.bin".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config =
            toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// `mods/iscript.bin` becomes `mods/iscript fixed.bin` with the default suffix.
    pub fn output_path(&self, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        input.with_file_name(format!("{}{}", stem, self.output_suffix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_output_name() {
        let config = Config::default();
        assert_eq!(
            config.output_path(Path::new("mods/iscript.bin")),
            PathBuf::from("mods/iscript fixed.bin")
        );
    }

    #[test]
    fn partial_config() {
        let config: Config = toml::from_str(r#"baseline = "stock/iscript.bin""#).unwrap();
        assert_eq!(config.baseline, Some(PathBuf::from("stock/iscript.bin")));
        assert_eq!(config.output_suffix, " fixed.bin");

        let config: Config = toml::from_str(r#"output_suffix = "_merged.bin""#).unwrap();
        assert_eq!(
            config.output_path(Path::new("a.bin")),
            PathBuf::from("a_merged.bin")
        );
    }
}
