//! The TOML settings file consumed by the binary. It names the kernel tree,
//! where the symbol universe comes from, the base configuration and the
//! request files to apply.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub kernel: Kernel,
    #[serde(default)]
    pub symbols: Symbols,
    #[serde(default)]
    pub base: Base,
    #[serde(default)]
    pub generate: Generate,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Kernel {
    /// The kernel source tree to operate on.
    #[serde(default = "default_kernel_dir")]
    pub dir: PathBuf,
    /// Overrides the version reported by the symbol importer, for `kver`
    /// conditions.
    pub version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Symbols {
    /// A ready-made JSON symbol dump.
    pub dump: Option<PathBuf>,
    /// Alternatively, the external Kconfig parser command that prints the
    /// dump to stdout. Run inside the kernel directory with `ARCH`,
    /// `SRCARCH`, `KERNELVERSION` and `srctree` set.
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Base {
    /// The base `.config`; defaults to `{kernel.dir}/.config` when present.
    pub config: Option<PathBuf>,
    /// Keep symbols the current symbol universe does not know.
    #[serde(default)]
    pub keep_unknown: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Generate {
    /// Request files, applied in order.
    #[serde(default)]
    pub requests: Vec<PathBuf>,
    /// Output path; defaults to `{kernel.dir}/.config`.
    pub output: Option<PathBuf>,
}

impl Default for Kernel {
    fn default() -> Self {
        Kernel {
            dir: default_kernel_dir(),
            version: None,
        }
    }
}

fn default_kernel_dir() -> PathBuf {
    PathBuf::from("/usr/src/linux")
}

pub fn load(path: impl AsRef<Path>) -> Result<Settings> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("could not read settings file {}", path.as_ref().display()))?;
    let settings: Settings = toml::from_str(&content)
        .with_context(|| format!("invalid settings file {}", path.as_ref().display()))?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_settings() {
        let settings: Settings = toml::from_str(
            r#"
            [kernel]
            dir = "/usr/src/linux-5.19.1"
            version = "5.19.1"

            [symbols]
            dump = "symbols.json"

            [base]
            config = "/boot/config-5.19.1"
            keep_unknown = true

            [generate]
            requests = ["common.conf", "laptop.conf"]
            output = ".config"
            "#,
        )
        .unwrap();

        assert_eq!(settings.kernel.dir, PathBuf::from("/usr/src/linux-5.19.1"));
        assert_eq!(settings.generate.requests.len(), 2);
        assert!(settings.base.keep_unknown);
    }

    #[test]
    fn defaults_apply() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings.kernel.dir, PathBuf::from("/usr/src/linux"));
        assert!(settings.symbols.dump.is_none());
        assert!(settings.generate.requests.is_empty());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<Settings>("[kernel]\ntypo = 1\n").is_err());
    }
}
