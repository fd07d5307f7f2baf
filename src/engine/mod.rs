//! Rule engine collaborator interfaces.
//!
//! The bridge drives an engine it does not implement. Everything here is
//! synchronous and non-reentrant: the server calls these methods only from
//! its dedicated engine thread, which is why [`Engine`] carries no `Send`
//! or `Sync` bound.

mod loader;
mod memory;

use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

use crate::error::BridgeError;
use crate::status::{WatchFlags, WatchItem};

pub use loader::BatchLoader;
pub use memory::MemoryEngine;

/// Failure reported by an engine or file loader.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An expression did not evaluate; `output` holds whatever it printed.
    #[error("evaluation of {expression} failed")]
    Evaluation {
        /// The expression that was sent.
        expression: String,
        /// Output captured before the failure.
        output: String,
    },

    /// A rule file could not be loaded.
    #[error("cannot load {}: {reason}", path.display())]
    Load {
        /// File that failed.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },
}

/// Listing the engine can print to its output router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintTarget {
    Facts,
    Rules,
    Agenda,
}

impl PrintTarget {
    /// Expression producing this listing.
    pub fn expression(self) -> &'static str {
        match self {
            PrintTarget::Facts => "(facts)",
            PrintTarget::Rules => "(rules)",
            PrintTarget::Agenda => "(agenda)",
        }
    }
}

impl FromStr for PrintTarget {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "facts" => Ok(PrintTarget::Facts),
            "rules" => Ok(PrintTarget::Rules),
            "agenda" => Ok(PrintTarget::Agenda),
            other => Err(BridgeError::InvalidArgument {
                command: "print".to_string(),
                argument: other.to_string(),
            }),
        }
    }
}

/// Synchronous command executor backing the bridge.
pub trait Engine {
    /// Evaluate an expression, returning whether it succeeded.
    fn execute(&mut self, expression: &str) -> bool;

    /// Fire at most `max_steps` rules (negative: until the agenda is empty).
    /// Returns the number of rules fired.
    fn run(&mut self, max_steps: i64) -> u64;

    /// Assert a fact given as text, e.g. `(block G)`.
    fn assert_fact(&mut self, fact: &str) -> bool;

    /// Reset working memory.
    fn reset(&mut self);

    /// Remove every construct and fact.
    fn clear(&mut self);

    /// Currently watched categories.
    fn watch_flags(&self) -> WatchFlags;

    /// Flip a watch category, returning whether it is now watched.
    fn toggle_watch(&mut self, item: WatchItem) -> bool;

    /// Evaluate an expression and return what it printed instead of
    /// sending it to the regular output.
    fn capture_output(&mut self, expression: &str) -> Result<String, EngineError>;

    /// Print a listing to the regular output.
    fn print(&mut self, target: PrintTarget) -> bool {
        self.execute(target.expression())
    }

    /// Force a watch category on or off.
    fn set_watch(&mut self, item: WatchItem, enabled: bool) {
        if self.watch_flags().contains(item) != enabled {
            self.toggle_watch(item);
        }
    }
}

/// Loads rule files into an engine. Invoked by the `load` command.
pub trait FileLoader<E: ?Sized> {
    /// Load `path`, which the caller has already made absolute.
    fn load_file(&self, engine: &mut E, path: &Path) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_target_parse() {
        assert_eq!("facts".parse::<PrintTarget>().unwrap(), PrintTarget::Facts);
        assert_eq!("agenda".parse::<PrintTarget>().unwrap().expression(), "(agenda)");
        assert!("instances".parse::<PrintTarget>().is_err());
    }

    #[test]
    fn test_set_watch_is_idempotent() {
        let mut engine = MemoryEngine::new();

        engine.set_watch(WatchItem::Rules, true);
        engine.set_watch(WatchItem::Rules, true);
        assert!(engine.watch_flags().contains(WatchItem::Rules));

        engine.set_watch(WatchItem::Rules, false);
        assert!(engine.watch_flags().is_empty());
    }
}
