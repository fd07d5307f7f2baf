//! Default file loader for `.clp` rule files and `.dat` batch lists.

use std::path::Path;

use tracing::{info, warn};

use super::{Engine, EngineError, FileLoader};

/// Loads `.clp` files through the engine's `(load ...)` expression and
/// `.dat` files as ordered lists of `.clp` files.
///
/// Each non-empty line of a `.dat` file names a `.clp` file relative to the
/// `.dat` file's directory. Loading stops at the first failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchLoader;

impl BatchLoader {
    fn load_clp<E: Engine + ?Sized>(&self, engine: &mut E, path: &Path) -> Result<(), EngineError> {
        info!(path = %path.display(), "loading rule file");
        let expression = format!("(load \"{}\")", escape(&path.to_string_lossy()));
        if engine.execute(&expression) {
            Ok(())
        } else {
            Err(load_error(path, "engine rejected the file"))
        }
    }

    fn load_dat<E: Engine + ?Sized>(&self, engine: &mut E, path: &Path) -> Result<(), EngineError> {
        let listing =
            std::fs::read_to_string(path).map_err(|e| load_error(path, &e.to_string()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        info!(path = %path.display(), "loading batch file");
        for line in listing.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let entry = base.join(line);
            if let Err(e) = self.load_clp(engine, &entry) {
                warn!(path = %entry.display(), "batch load aborted");
                return Err(e);
            }
        }
        Ok(())
    }
}

impl<E: Engine + ?Sized> FileLoader<E> for BatchLoader {
    fn load_file(&self, engine: &mut E, path: &Path) -> Result<(), EngineError> {
        if !path.is_file() {
            return Err(load_error(path, "no such file"));
        }

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("clp") => self.load_clp(engine, path),
            Some("dat") => self.load_dat(engine, path),
            _ => Err(load_error(path, "expected a .clp or .dat file")),
        }
    }
}

fn load_error(path: &Path, reason: &str) -> EngineError {
    EngineError::Load {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Escape a path for use inside an engine string literal.
fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_clp() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "blocks.clp", "(defrule move (block ?x) =>)");
        let mut engine = MemoryEngine::new();

        BatchLoader.load_file(&mut engine, &path).unwrap();

        assert_eq!(engine.rules(), ["move"]);
    }

    #[test]
    fn test_load_dat_in_order() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.clp", "(defrule first =>)");
        write(&dir, "b.clp", "(defrule second =>)");
        let dat = write(&dir, "all.dat", "a.clp\n\n  b.clp  \n");
        let mut engine = MemoryEngine::new();

        BatchLoader.load_file(&mut engine, &dat).unwrap();

        assert_eq!(engine.rules(), ["first", "second"]);
    }

    #[test]
    fn test_load_dat_stops_at_first_failure() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.clp", "(defrule first =>)");
        write(&dir, "broken.clp", "(defrule oops");
        write(&dir, "c.clp", "(defrule third =>)");
        let dat = write(&dir, "all.dat", "a.clp\nbroken.clp\nc.clp\n");
        let mut engine = MemoryEngine::new();

        let result = BatchLoader.load_file(&mut engine, &dat);

        assert!(matches!(result, Err(EngineError::Load { .. })));
        assert_eq!(engine.rules(), ["first"]);
    }

    #[test]
    fn test_rejects_unknown_extension_and_missing_file() {
        let dir = TempDir::new().unwrap();
        let txt = write(&dir, "notes.txt", "(defrule x =>)");
        let mut engine = MemoryEngine::new();

        assert!(BatchLoader.load_file(&mut engine, &txt).is_err());
        assert!(BatchLoader
            .load_file(&mut engine, &dir.path().join("missing.clp"))
            .is_err());
        assert!(engine.rules().is_empty());
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape(r#"C:\a "b""#), r#"C:\\a \"b\""#);
    }
}
