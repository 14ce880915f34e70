use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{CoreError, Result};

/// Conservative chars-per-token estimate used for the startup self-check —
/// no tokenizer dependency is in the stack, so token counts elsewhere in
/// the workspace are estimated the same way.
const CHARS_PER_TOKEN_ESTIMATE: usize = 4;
const MIN_STABLE_PREFIX_TOKENS: usize = 1024;

/// Persona text blobs loaded from `PERSONA_PATH`:
/// `constitution` is the invariant stage-2 stable prefix (must stay
/// byte-identical across requests for prompt caching to pay off);
/// `traits` is the shorter stage-1 persona description.
#[derive(Debug, Clone)]
pub struct Persona {
    pub constitution: String,
    pub traits: String,
    dir: PathBuf,
}

impl Persona {
    /// Loads `CONSTITUTION.md` and `TRAITS.md` from `dir`. Both must be
    /// present and non-empty, and the constitution must meet the stable
    /// prefix size floor — otherwise this is a fatal configuration error.
    pub fn load(dir: &Path) -> Result<Self> {
        let constitution = read_required(dir, "CONSTITUTION.md")?;
        let traits = read_required(dir, "TRAITS.md")?;

        let estimated_tokens = constitution.len() / CHARS_PER_TOKEN_ESTIMATE;
        if estimated_tokens < MIN_STABLE_PREFIX_TOKENS {
            return Err(CoreError::Persona(format!(
                "CONSTITUTION.md is only ~{estimated_tokens} tokens, need >= {MIN_STABLE_PREFIX_TOKENS}"
            )));
        }

        Ok(Persona {
            constitution,
            traits,
            dir: dir.to_path_buf(),
        })
    }

    /// Re-reads both blobs from disk. Used by operators rotating persona
    /// content without a full restart; a failed reload keeps the
    /// previously loaded content rather than panicking.
    pub fn reload(&mut self) {
        match (
            read_required(&self.dir, "CONSTITUTION.md"),
            read_required(&self.dir, "TRAITS.md"),
        ) {
            (Ok(c), Ok(t)) => {
                self.constitution = c;
                self.traits = t;
            }
            (c, t) => {
                warn!(?c, ?t, "persona reload failed, keeping previous content");
            }
        }
    }
}

fn read_required(dir: &Path, name: &str) -> Result<String> {
    let path = dir.join(name);
    let content = std::fs::read_to_string(&path)
        .map_err(|e| CoreError::Persona(format!("reading {}: {e}", path.display())))?;
    if content.trim().is_empty() {
        return Err(CoreError::Persona(format!("{} is empty", path.display())));
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn rejects_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let err = Persona::load(dir.path()).unwrap_err();
        assert_eq!(err.code(), "PERSONA_ERROR");
    }

    #[test]
    fn rejects_short_constitution() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "CONSTITUTION.md", "too short");
        write(dir.path(), "TRAITS.md", "friendly, curious");
        let err = Persona::load(dir.path()).unwrap_err();
        assert_eq!(err.code(), "PERSONA_ERROR");
    }

    #[test]
    fn loads_valid_persona() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "CONSTITUTION.md",
            &"word ".repeat(1200 * CHARS_PER_TOKEN_ESTIMATE / 5),
        );
        write(dir.path(), "TRAITS.md", "friendly, curious, concise");
        let persona = Persona::load(dir.path()).unwrap();
        assert!(persona.constitution.len() / CHARS_PER_TOKEN_ESTIMATE >= MIN_STABLE_PREFIX_TOKENS);
    }
}
