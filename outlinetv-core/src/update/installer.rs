//! Handoff of a downloaded artifact to the system installer

use crate::error::UpdateError;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::info;

/// Something that can install a downloaded artifact
pub trait Installer: Send + Sync {
    /// Start installing `artifact`
    ///
    /// Returns once the installer has been launched; installation itself
    /// proceeds outside this process.
    fn install(&self, artifact: &Path) -> Result<(), UpdateError>;
}

/// Launches an external command with the artifact path as its last argument
///
/// With no program configured the artifact itself is executed, which is the
/// normal way to run a freshly downloaded AppImage.
#[derive(Debug, Clone, Default)]
pub struct CommandInstaller {
    program: Option<String>,
    args: Vec<String>,
}

impl CommandInstaller {
    pub fn new(program: Option<String>, args: Vec<String>) -> Self {
        Self { program, args }
    }
}

impl Installer for CommandInstaller {
    fn install(&self, artifact: &Path) -> Result<(), UpdateError> {
        let mut command = match &self.program {
            Some(program) => {
                let mut command = Command::new(program);
                command.args(&self.args).arg(artifact);
                command
            }
            None => Command::new(artifact),
        };

        let child = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| UpdateError::InstallFailed(e.to_string()))?;

        info!(pid = child.id(), artifact = %artifact.display(), "Installer launched");
        Ok(())
    }
}
