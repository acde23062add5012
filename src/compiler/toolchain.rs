//! Toolchain configuration for compilation

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// Default toolchain shipped with the server
const DEFAULT_TOOLCHAIN: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/toolchain.toml"));

const SOURCE_PLACEHOLDER: &str = "{source}";
const BINARY_PLACEHOLDER: &str = "{binary}";

/// Compiler and file naming used for every submission
#[derive(Debug, Clone, Deserialize)]
pub struct Toolchain {
    /// Extension of the per-session source file (e.g., "cpp")
    pub source_extension: String,
    /// Extension of the per-session binary (e.g., "exe")
    pub binary_extension: String,
    /// Compile command template, `{source}` and `{binary}` are substituted
    pub compile_command: Vec<String>,
    /// Regex patterns hinting that the source reads standard input
    #[serde(default)]
    pub input_patterns: Vec<String>,
}

impl Toolchain {
    /// Load the toolchain from a TOML file, or the built-in one when `path` is None
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let toolchain = match path {
            Some(path) => {
                let content = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read toolchain config {:?}", path))?;
                Self::parse(&content)
                    .with_context(|| format!("Invalid toolchain config {:?}", path))?
            }
            None => Self::parse(DEFAULT_TOOLCHAIN)?,
        };
        Ok(toolchain)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let toolchain: Toolchain = toml::from_str(content)?;

        if toolchain.compile_command.is_empty() {
            anyhow::bail!("compile_command must not be empty");
        }
        if toolchain.source_extension.is_empty() || toolchain.binary_extension.is_empty() {
            anyhow::bail!("source_extension and binary_extension must not be empty");
        }
        if toolchain.source_extension == toolchain.binary_extension {
            anyhow::bail!(
                "source and binary extensions must differ (both are {:?})",
                toolchain.source_extension
            );
        }

        Ok(toolchain)
    }

    /// Build the compiler argv for one source/binary pair
    pub fn compile_args(&self, source: &Path, binary: &Path) -> Vec<String> {
        let source = source.to_string_lossy();
        let binary = binary.to_string_lossy();
        self.compile_command
            .iter()
            .map(|arg| {
                arg.replace(SOURCE_PLACEHOLDER, &source)
                    .replace(BINARY_PLACEHOLDER, &binary)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    #[test]
    fn test_builtin_toolchain() {
        let toolchain = Toolchain::load(None).unwrap();
        assert_eq!(toolchain.source_extension, "cpp");
        assert_eq!(toolchain.binary_extension, "exe");
        assert_eq!(toolchain.compile_command[0], "g++");
        assert!(!toolchain.input_patterns.is_empty());
    }

    #[test]
    fn test_compile_args_substitution() {
        let toolchain = Toolchain::load(None).unwrap();
        let args = toolchain.compile_args(
            &PathBuf::from("/tmp/code_1.cpp"),
            &PathBuf::from("/tmp/code_1.exe"),
        );
        assert_eq!(args, vec!["g++", "/tmp/code_1.cpp", "-o", "/tmp/code_1.exe"]);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
source_extension = "c"
binary_extension = "bin"
compile_command = ["gcc", "-O2", "{{source}}", "-o", "{{binary}}"]
"#
        )
        .unwrap();

        let toolchain = Toolchain::load(Some(file.path())).unwrap();
        assert_eq!(toolchain.compile_command.len(), 5);
        assert!(toolchain.input_patterns.is_empty());
    }

    #[test]
    fn test_rejects_empty_command() {
        let result = Toolchain::parse(
            r#"
source_extension = "cpp"
binary_extension = "exe"
compile_command = []
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_same_extensions() {
        let result = Toolchain::parse(
            r#"
source_extension = "cpp"
binary_extension = "cpp"
compile_command = ["g++"]
"#,
        );
        assert!(result.is_err());
    }
}
