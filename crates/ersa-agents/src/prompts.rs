use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use ersa_models::{AgentRole, EXECUTION_ORDER};

/// Prompt files are opaque content loaded at startup; this repo contains no
/// actual prompt text. Each billable role reads `<dir>/<role>.md`.

#[derive(Error, Debug)]
pub enum PromptError {
    #[error("prompt directory does not exist: {0}")]
    MissingDir(PathBuf),

    #[error("prompt file not found for role {role}: {path}")]
    MissingFile { role: AgentRole, path: PathBuf },

    #[error("failed to read prompt file: {0}")]
    Io(#[from] std::io::Error),
}

/// Role-keyed system prompts, loaded once and held in memory.
#[derive(Debug)]
pub struct PromptLibrary {
    prompts: HashMap<AgentRole, String>,
}

impl PromptLibrary {
    /// Load prompts for every billable role from `dir`. Fails with a typed
    /// error naming the first missing file rather than crashing later
    /// mid-run.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, PromptError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(PromptError::MissingDir(dir.to_path_buf()));
        }

        let mut prompts = HashMap::new();
        for role in EXECUTION_ORDER.iter().filter(|r| r.is_billable()) {
            let path = dir.join(format!("{}.md", role.as_str()));
            if !path.is_file() {
                return Err(PromptError::MissingFile {
                    role: *role,
                    path,
                });
            }
            let content = std::fs::read_to_string(&path)?;
            prompts.insert(*role, content.trim().to_string());
        }
        Ok(Self { prompts })
    }

    /// Build directly from strings. Used by tests and embedded deployments
    /// that inject prompts through the environment.
    pub fn from_map(prompts: HashMap<AgentRole, String>) -> Self {
        Self { prompts }
    }

    pub fn get(&self, role: AgentRole) -> Option<&str> {
        self.prompts.get(&role).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_all_prompts(dir: &Path) {
        for role in EXECUTION_ORDER.iter().filter(|r| r.is_billable()) {
            std::fs::write(
                dir.join(format!("{}.md", role.as_str())),
                format!("system prompt for {role}\n"),
            )
            .unwrap();
        }
    }

    #[test]
    fn load_reads_every_billable_role() {
        let dir = tempfile::tempdir().unwrap();
        write_all_prompts(dir.path());

        let library = PromptLibrary::load(dir.path()).unwrap();
        assert_eq!(
            library.get(AgentRole::QaReviewer),
            Some("system prompt for qa_reviewer")
        );
        assert!(library.get(AgentRole::DataEngineer).is_none());
    }

    #[test]
    fn missing_file_names_the_role() {
        let dir = tempfile::tempdir().unwrap();
        write_all_prompts(dir.path());
        std::fs::remove_file(dir.path().join("report_assembler.md")).unwrap();

        match PromptLibrary::load(dir.path()) {
            Err(PromptError::MissingFile { role, .. }) => {
                assert_eq!(role, AgentRole::ReportAssembler);
            }
            other => panic!("expected MissingFile, got {other:?}"),
        }
    }

    #[test]
    fn missing_dir_is_a_typed_error() {
        let result = PromptLibrary::load("/definitely/not/a/real/dir");
        assert!(matches!(result, Err(PromptError::MissingDir(_))));
    }
}
