//! Command router: turns decoded requests into engine operations.
//!
//! Commands and their arguments form a closed set. Anything outside it is
//! answered with `success=false` and an empty result; no command failure
//! ever escapes as an error.
//!
//! Unstructured messages bypass the command set and are asserted as
//! `(<fact name> <source endpoint> <text>)`.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::engine::{Engine, EngineError, FileLoader, PrintTarget};
use crate::error::{BridgeError, Result};
use crate::protocol::{Frame, Reply, Request};
use crate::server::{SessionRegistry, Work};
use crate::status::{EngineStatus, WatchItem};

/// A validated command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Assert the argument as a fact.
    Assert(String),
    Reset,
    Clear,
    /// Evaluate an expression verbatim.
    Raw(String),
    /// Change the working path.
    Path(String),
    Print(PrintTarget),
    /// Toggle a watch category; `None` only republishes the status.
    Watch(Option<WatchItem>),
    /// Load a `.clp` or `.dat` file.
    Load(String),
    /// Run at most this many steps; negative runs to quiescence.
    Run(i64),
    /// Evaluate an expression and return its output.
    Query(String),
    /// Accepted and ignored.
    Log(String),
}

impl Command {
    /// Validate a command name and its argument string.
    pub fn parse(name: &str, args: &str) -> Result<Self> {
        let invalid = || BridgeError::InvalidArgument {
            command: name.to_string(),
            argument: args.to_string(),
        };
        let required = |make: fn(String) -> Command| {
            if args.is_empty() {
                Err(invalid())
            } else {
                Ok(make(args.to_string()))
            }
        };

        match name {
            "assert" => required(Command::Assert),
            "reset" => Ok(Command::Reset),
            "clear" => Ok(Command::Clear),
            "raw" => required(Command::Raw),
            "path" => required(Command::Path),
            "print" => args.parse().map(Command::Print),
            "watch" if args.is_empty() => Ok(Command::Watch(None)),
            "watch" => args.parse().map(|item| Command::Watch(Some(item))),
            "load" => required(Command::Load),
            "run" if args.is_empty() => Ok(Command::Run(-1)),
            "run" => args.trim().parse().map(Command::Run).map_err(|_| invalid()),
            "query" => required(Command::Query),
            "log" => Ok(Command::Log(args.to_string())),
            other => Err(BridgeError::UnknownCommand(other.to_string())),
        }
    }
}

/// Result of executing one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Whether the command succeeded.
    pub success: bool,
    /// Output text; empty for commands that produce none.
    pub result: String,
}

impl Outcome {
    fn from_success(success: bool) -> Self {
        Self {
            success,
            result: String::new(),
        }
    }

    fn with_result(success: bool, result: String) -> Self {
        Self { success, result }
    }
}

/// Wrap an unstructured message as a fact.
///
/// Trailing line terminators and NUL padding are dropped from `text`.
pub fn wrap_fact(fact_name: &str, source: &str, text: &str) -> String {
    let text = text.trim_end_matches(['\r', '\n', '\0']);
    format!("({fact_name} {source} {text})")
}

/// Resolve a user-supplied path against `base`, expanding a leading `~`.
pub fn resolve_path(base: &Path, arg: &str) -> PathBuf {
    let expanded = match arg.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with(['/', '\\']) => {
            match dirs::home_dir() {
                Some(home) => home.join(rest.trim_start_matches(['/', '\\'])),
                None => PathBuf::from(arg),
            }
        }
        _ => PathBuf::from(arg),
    };
    base.join(expanded)
}

/// Routes work from the dispatch queue to the engine.
///
/// Owns the engine, so it lives on the engine thread.
pub struct Router<E, L> {
    engine: E,
    loader: L,
    registry: SessionRegistry,
    working_path: PathBuf,
}

impl<E, L> Router<E, L>
where
    E: Engine,
    L: FileLoader<E>,
{
    /// Create a router. `working_path` should be absolute.
    pub fn new(engine: E, loader: L, registry: SessionRegistry, working_path: PathBuf) -> Self {
        Self {
            engine,
            loader,
            registry,
            working_path,
        }
    }

    /// The engine this router drives.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Mutable access to the engine, for start-up configuration.
    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Directory relative file arguments resolve against.
    pub fn working_path(&self) -> &Path {
        &self.working_path
    }

    /// Current watch flags and working path.
    pub fn status(&self) -> EngineStatus {
        EngineStatus::new(
            self.engine.watch_flags(),
            self.working_path.display().to_string(),
        )
    }

    /// Broadcast the current status to every session.
    pub fn publish_status(&self) {
        self.registry.publish_status(&self.status());
    }

    /// Process one item from the dispatch queue.
    pub fn handle(&mut self, work: Work) {
        match work {
            Work::Opened { source } => {
                self.registry.send_status(&source, &self.status());
            }
            Work::Frame {
                source,
                frame: frame @ Frame::Fact(_),
            } => {
                let text = frame.fact_text().unwrap_or_default();
                self.assert_message(&source, &text);
            }
            Work::Frame { source, frame } => {
                let mut reply = match Request::from_frame(&frame) {
                    Ok(request) => {
                        match panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(&request))) {
                            Ok(reply) => reply,
                            Err(_) => {
                                error!(%source, id = request.id, "engine panicked; failing request");
                                Reply::failure(request.id)
                            }
                        }
                    }
                    Err(e) => {
                        warn!(%source, error = %e, "rejecting request");
                        Reply::failure(frame.id().unwrap_or_default())
                    }
                };
                if reply.fit_to_frame() {
                    warn!(%source, id = reply.id, "result too large for one frame; truncated");
                }
                self.registry.send_reply(&source, &reply);
            }
        }
    }

    /// Execute a request and build its reply.
    pub fn dispatch(&mut self, request: &Request) -> Reply {
        let outcome = match Command::parse(&request.command, &request.args) {
            Ok(command) => {
                debug!(id = request.id, ?command, "executing command");
                self.execute(command)
            }
            Err(e) => {
                warn!(id = request.id, error = %e, "rejected command");
                Outcome::from_success(false)
            }
        };
        Reply::new(request.id, outcome.success, outcome.result)
    }

    /// Execute a validated command.
    pub fn execute(&mut self, command: Command) -> Outcome {
        match command {
            Command::Assert(fact) => Outcome::from_success(self.engine.assert_fact(&fact)),
            Command::Reset => {
                self.engine.reset();
                info!("knowledge base reset");
                Outcome::from_success(true)
            }
            Command::Clear => {
                self.engine.clear();
                info!("knowledge base cleared");
                Outcome::from_success(true)
            }
            Command::Raw(expression) => Outcome::from_success(self.engine.execute(&expression)),
            Command::Path(path) => Outcome::from_success(self.set_path(&path)),
            Command::Print(target) => Outcome::from_success(self.engine.print(target)),
            Command::Watch(item) => {
                if let Some(item) = item {
                    let on = self.engine.toggle_watch(item);
                    info!(watch = item.engine_name(), on, "toggled watch");
                }
                self.publish_status();
                Outcome::from_success(true)
            }
            Command::Load(path) => Outcome::from_success(self.load(&path)),
            Command::Run(steps) => {
                let fired = self.engine.run(steps);
                Outcome::with_result(true, fired.to_string())
            }
            Command::Query(expression) => match self.engine.capture_output(&expression) {
                Ok(output) => Outcome::with_result(true, output),
                Err(EngineError::Evaluation { output, .. }) => Outcome::with_result(false, output),
                Err(e) => {
                    warn!(error = %e, "query failed");
                    Outcome::from_success(false)
                }
            },
            Command::Log(_) => Outcome::from_success(true),
        }
    }

    /// Assert an unstructured message received from `source`.
    pub fn assert_message(&mut self, source: &str, text: &str) -> bool {
        let fact = wrap_fact(&self.registry.fact_name(source), source, text);
        let asserted = self.engine.assert_fact(&fact);
        debug!(%source, %fact, asserted, "asserted message");
        asserted
    }

    /// Load a rule file, resolving relative paths against the working path.
    pub fn load(&mut self, arg: &str) -> bool {
        let path = resolve_path(&self.working_path, arg);
        match self.loader.load_file(&mut self.engine, &path) {
            Ok(()) => {
                info!(path = %path.display(), "file loaded");
                true
            }
            Err(e) => {
                warn!(error = %e, "load failed");
                false
            }
        }
    }

    /// Change the working path and publish the new status.
    ///
    /// The path must name an existing directory. The process working
    /// directory is left alone.
    pub fn set_path(&mut self, arg: &str) -> bool {
        let candidate = resolve_path(&self.working_path, arg);
        match candidate.canonicalize() {
            Ok(path) if path.is_dir() => {
                info!(path = %path.display(), "working path changed");
                self.working_path = path;
                self.publish_status();
                true
            }
            Ok(path) => {
                warn!(path = %path.display(), "not a directory");
                false
            }
            Err(e) => {
                warn!(path = %candidate.display(), error = %e, "cannot access path");
                false
            }
        }
    }
}
