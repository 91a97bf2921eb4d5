//! External assembler pass for `.s` kernel sources.

use std::process::Command;

use crate::error::RuntimeError;

/// Turns assembly text into a loadable code object, in place.
pub trait Assembler: Send + Sync {
    /// Replace `source` (assembly text) with the assembled binary for
    /// `target_device`. `params` are the caller's build parameters.
    fn assemble(
        &self,
        source: &mut Vec<u8>,
        target_device: &str,
        params: &str,
    ) -> Result<(), RuntimeError>;
}

/// Runs an external assembler executable (clang by default) through a
/// temporary directory.
#[derive(Debug, Clone)]
pub struct ExternalAssembler {
    program: String,
    target_triple: String,
}

impl ExternalAssembler {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            target_triple: "amdgcn-amd-amdhsa".to_string(),
        }
    }

    pub fn with_target_triple(mut self, triple: impl Into<String>) -> Self {
        self.target_triple = triple.into();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command_args(&self, target_device: &str, params: &str) -> Vec<String> {
        let mut args = vec![
            "-x".to_string(),
            "assembler".to_string(),
            "-target".to_string(),
            self.target_triple.clone(),
            format!("-mcpu={target_device}"),
        ];
        args.extend(params.split_whitespace().map(str::to_string));
        args
    }
}

impl Default for ExternalAssembler {
    fn default() -> Self {
        Self::new("clang")
    }
}

impl Assembler for ExternalAssembler {
    fn assemble(
        &self,
        source: &mut Vec<u8>,
        target_device: &str,
        params: &str,
    ) -> Result<(), RuntimeError> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("kernel.s");
        let output = dir.path().join("kernel.co");
        std::fs::write(&input, source.as_slice())?;

        let result = Command::new(&self.program)
            .args(self.command_args(target_device, params))
            .arg(&input)
            .arg("-o")
            .arg(&output)
            .output()
            .map_err(|e| RuntimeError::Assembly {
                diagnostic: format!("failed to run {}: {e}", self.program),
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let stdout = String::from_utf8_lossy(&result.stdout);
            return Err(RuntimeError::Assembly {
                diagnostic: format!(
                    "{} exited with {}: stdout='{}' stderr='{}'",
                    self.program,
                    result.status,
                    stdout.trim(),
                    stderr.trim()
                ),
            });
        }

        *source = std::fs::read(&output)?;
        tracing::debug!(
            "assembled {} bytes of code object for {}",
            source.len(),
            target_device
        );
        Ok(())
    }
}

/// Assembler for runtimes that never see `.s` sources.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAssembler;

impl Assembler for NoAssembler {
    fn assemble(
        &self,
        _source: &mut Vec<u8>,
        target_device: &str,
        _params: &str,
    ) -> Result<(), RuntimeError> {
        Err(RuntimeError::Assembly {
            diagnostic: format!("no assembler configured for {target_device}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_args_carry_device_and_params() {
        let asm = ExternalAssembler::default();
        let args = asm.command_args("gfx906", "-mwavefrontsize64  -O3");
        assert!(args.contains(&"-mcpu=gfx906".to_string()));
        assert!(args.contains(&"-mwavefrontsize64".to_string()));
        assert!(args.contains(&"-O3".to_string()));
        assert!(args.contains(&"amdgcn-amd-amdhsa".to_string()));
    }

    #[test]
    fn test_missing_program_is_assembly_error() {
        let asm = ExternalAssembler::new("kore-definitely-not-an-assembler");
        let mut source = b".text".to_vec();
        let err = asm.assemble(&mut source, "gfx900", "").unwrap_err();
        assert!(matches!(err, RuntimeError::Assembly { .. }));
        assert_eq!(source, b".text");
    }

    #[test]
    fn test_no_assembler() {
        let mut source = Vec::new();
        assert!(NoAssembler.assemble(&mut source, "gfx900", "").is_err());
    }
}
