//! Runtime configuration: build strictness, kernel source directory, assembler.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

/// Extra diagnostics enabled for source builds in strict mode.
pub const KERNEL_WARNING_FLAGS: &[&str] = &[
    "-Wall",
    "-Wextra",
    "-Wshadow",
    "-Wconversion",
    "-Wfloat-equal",
    "-Wunused-variable",
    "-Wunreachable-code",
];

/// Configuration shared by the program loader and the kernel cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Development mode: treat kernel warnings as errors.
    pub strict_build: bool,

    /// Directory holding named kernel sources on disk.
    pub kernel_dir: Option<PathBuf>,

    /// Executable used to assemble `.s` kernel sources.
    pub assembler: String,

    /// Options appended to every source build.
    pub extra_build_options: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            strict_build: false,
            kernel_dir: None,
            assembler: "clang".to_string(),
            extra_build_options: String::new(),
        }
    }
}

impl RuntimeConfig {
    /// Read overrides from `KORE_BUILD_DEV`, `KORE_KERNEL_DIR`, `KORE_ASSEMBLER`
    /// and `KORE_BUILD_OPTIONS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(value) = env_value("KORE_BUILD_DEV") {
            config.strict_build = is_truthy(&value);
        }
        if let Some(value) = env_value("KORE_KERNEL_DIR") {
            config.kernel_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = env_value("KORE_ASSEMBLER") {
            config.assembler = value;
        }
        if let Some(value) = env_value("KORE_BUILD_OPTIONS") {
            config.extra_build_options = value;
        }
        config
    }

    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, RuntimeError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, RuntimeError> {
        serde_json::from_str(text).map_err(|e| RuntimeError::Config(e.to_string()))
    }

    /// Options appended to the caller's build parameters for source builds.
    pub fn source_build_suffix(&self) -> String {
        let mut out = String::new();
        if self.strict_build {
            out.push_str(" -Werror");
            for flag in KERNEL_WARNING_FLAGS {
                out.push(' ');
                out.push_str(flag);
            }
        }
        let extra = self.extra_build_options.trim();
        if !extra.is_empty() {
            out.push(' ');
            out.push_str(extra);
        }
        out
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_suffix_is_empty() {
        assert_eq!(RuntimeConfig::default().source_build_suffix(), "");
    }

    #[test]
    fn test_strict_suffix() {
        let config = RuntimeConfig {
            strict_build: true,
            ..Default::default()
        };
        let suffix = config.source_build_suffix();
        assert!(suffix.starts_with(" -Werror"));
        assert!(suffix.contains("-Wextra"));
    }

    #[test]
    fn test_json_partial() {
        let config = RuntimeConfig::from_json_str(r#"{ "strict_build": true }"#).unwrap();
        assert!(config.strict_build);
        assert_eq!(config.assembler, "clang");
        assert!(config.kernel_dir.is_none());
    }

    #[test]
    fn test_json_invalid() {
        let err = RuntimeConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, RuntimeError::Config(_)));
    }

    #[test]
    fn test_truthy() {
        assert!(is_truthy("1"));
        assert!(is_truthy("TRUE"));
        assert!(is_truthy("on"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("off"));
    }
}
