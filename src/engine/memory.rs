//! In-memory engine used by the demos and tests.
//!
//! Understands a small subset of the rule language: `assert`, `retract`,
//! `defrule`, `load`, `run`, `reset`, `clear`, `watch`/`unwatch`, the
//! `facts`/`rules`/`agenda` listings, `printout`, and the `broadcast` and
//! `sendto` messaging functions. Rules are recorded by name only; firing
//! consumes activations queued with [`MemoryEngine::schedule`].

use std::collections::VecDeque;
use std::path::Path;

use tracing::debug;

use super::{Engine, EngineError};
use crate::server::SessionRegistry;
use crate::status::{WatchFlags, WatchItem};

/// Engine double keeping facts and rule names in memory.
#[derive(Default)]
pub struct MemoryEngine {
    facts: Vec<(u64, String)>,
    next_fact_id: u64,
    rules: Vec<String>,
    agenda: VecDeque<String>,
    watching: WatchFlags,
    transcript: Vec<String>,
    capture: Option<String>,
    registry: Option<SessionRegistry>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            next_fact_id: 1,
            ..Self::default()
        }
    }

    /// Engine whose `broadcast` and `sendto` functions reach connected clients.
    pub fn with_registry(registry: SessionRegistry) -> Self {
        Self {
            registry: Some(registry),
            ..Self::new()
        }
    }

    /// Asserted facts, oldest first.
    pub fn facts(&self) -> Vec<&str> {
        self.facts.iter().map(|(_, text)| text.as_str()).collect()
    }

    /// Names of defined rules, in definition order.
    pub fn rules(&self) -> &[String] {
        &self.rules
    }

    /// Lines printed to the regular output.
    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    /// Queue an activation of `rule` on the agenda.
    pub fn schedule(&mut self, rule: impl Into<String>) {
        self.agenda.push_back(rule.into());
    }

    fn emit(&mut self, line: String) {
        match self.capture.as_mut() {
            Some(buf) => {
                buf.push_str(&line);
                buf.push('\n');
            }
            None => {
                debug!(target: "clipswire::engine", "{line}");
                self.transcript.push(line);
            }
        }
    }

    fn retract(&mut self, target: &str) -> bool {
        let position = match target.parse::<u64>() {
            Ok(id) => self.facts.iter().position(|(fid, _)| *fid == id),
            Err(_) => self.facts.iter().position(|(_, text)| text == target),
        };
        let Some(position) = position else {
            return false;
        };

        let (id, text) = self.facts.remove(position);
        if self.watching.contains(WatchItem::Facts) {
            self.emit(format!("<== f-{id:<5} {text}"));
        }
        true
    }

    fn load(&mut self, path: &Path) -> bool {
        let source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(e) => {
                self.emit(format!("[ARGACCES2] Cannot open file {}: {e}", path.display()));
                return false;
            }
        };
        if !balanced(&source) {
            self.emit(format!("[PRNTUTIL2] Syntax error in {}", path.display()));
            return false;
        }

        top_level_groups(&source).into_iter().all(|group| self.execute(group))
    }

    fn list(&mut self, target: &str) -> bool {
        let lines: Vec<String> = match target {
            "facts" => {
                let mut lines: Vec<_> = self
                    .facts
                    .iter()
                    .map(|(id, text)| format!("f-{id:<5} {text}"))
                    .collect();
                lines.push(format!("For a total of {} facts.", self.facts.len()));
                lines
            }
            "rules" => {
                let mut lines = self.rules.clone();
                lines.push(format!("For a total of {} defrules.", self.rules.len()));
                lines
            }
            _ => {
                let mut lines: Vec<_> = self.agenda.iter().map(|r| format!("0      {r}")).collect();
                lines.push(format!("For a total of {} activations.", self.agenda.len()));
                lines
            }
        };
        for line in lines {
            self.emit(line);
        }
        true
    }

    fn set_watch_by_name(&mut self, name: &str, enabled: bool) -> bool {
        let all = [
            WatchItem::Facts,
            WatchItem::Rules,
            WatchItem::Activations,
            WatchItem::Focus,
            WatchItem::Compilations,
            WatchItem::Statistics,
            WatchItem::Globals,
            WatchItem::Deffunctions,
        ];
        match all.into_iter().find(|item| item.engine_name() == name) {
            Some(item) => {
                self.set_watch(item, enabled);
                true
            }
            None => false,
        }
    }

    fn send(&self, endpoint: Option<&str>, text: &str) -> bool {
        let Some(registry) = self.registry.as_ref() else {
            return false;
        };
        match endpoint {
            Some(endpoint) => registry.send_text(endpoint, text),
            None => {
                registry.broadcast_text(text);
                true
            }
        }
    }
}

impl Engine for MemoryEngine {
    fn execute(&mut self, expression: &str) -> bool {
        let expression = expression.trim();
        let Some((head, rest)) = split_call(expression) else {
            self.emit(format!("[EXPRNPSR1] Cannot parse {expression}"));
            return false;
        };

        match head {
            "assert" => top_level_groups(rest)
                .into_iter()
                .fold(!rest.is_empty(), |ok, fact| self.assert_fact(fact) && ok),
            "retract" => self.retract(rest),
            "defrule" => match rest.split_whitespace().next() {
                Some(name) => {
                    self.rules.retain(|r| r != name);
                    self.rules.push(name.to_string());
                    true
                }
                None => false,
            },
            "load" => match tokens(rest).first() {
                Some(path) => self.load(Path::new(path)),
                None => false,
            },
            "run" => {
                let steps = rest.trim().parse().unwrap_or(-1);
                self.run(steps);
                true
            }
            "reset" => {
                self.reset();
                true
            }
            "clear" => {
                self.clear();
                true
            }
            "watch" | "unwatch" => self.set_watch_by_name(rest.trim(), head == "watch"),
            "facts" | "rules" | "agenda" => self.list(head),
            "printout" => {
                let args = tokens(rest);
                let line = args.iter().skip(1).map(String::as_str).collect::<Vec<_>>();
                self.emit(line.join(" "));
                true
            }
            "broadcast" => match tokens(rest).first() {
                Some(text) => self.send(None, text),
                None => false,
            },
            "sendto" => match tokens(rest).as_slice() {
                [endpoint, text] => self.send(Some(endpoint.as_str()), text),
                _ => false,
            },
            other => {
                self.emit(format!("[EXPRNPSR3] Missing function declaration for {other}."));
                false
            }
        }
    }

    fn run(&mut self, max_steps: i64) -> u64 {
        let limit = usize::try_from(max_steps).unwrap_or(usize::MAX);
        let mut fired = 0u64;

        while fired < limit as u64 {
            let Some(rule) = self.agenda.pop_front() else {
                break;
            };
            fired += 1;
            if self.watching.contains(WatchItem::Rules) {
                self.emit(format!("FIRE {fired:>4} {rule}"));
            }
        }
        fired
    }

    fn assert_fact(&mut self, fact: &str) -> bool {
        let fact = fact.trim();
        if fact.is_empty() || !balanced(fact) || self.facts.iter().any(|(_, f)| f == fact) {
            return false;
        }

        let id = self.next_fact_id;
        self.next_fact_id += 1;
        self.facts.push((id, fact.to_string()));
        if self.watching.contains(WatchItem::Facts) {
            self.emit(format!("==> f-{id:<5} {fact}"));
        }
        true
    }

    fn reset(&mut self) {
        self.facts.clear();
        self.agenda.clear();
        self.next_fact_id = 1;
    }

    fn clear(&mut self) {
        self.reset();
        self.rules.clear();
    }

    fn watch_flags(&self) -> WatchFlags {
        self.watching
    }

    fn toggle_watch(&mut self, item: WatchItem) -> bool {
        self.watching.toggle(item)
    }

    fn capture_output(&mut self, expression: &str) -> Result<String, EngineError> {
        self.capture = Some(String::new());
        let ok = self.execute(expression);
        let output = self.capture.take().unwrap_or_default();

        if ok {
            Ok(output)
        } else {
            Err(EngineError::Evaluation {
                expression: expression.to_string(),
                output,
            })
        }
    }
}

/// Split `(head rest...)` into its function name and argument text.
fn split_call(expression: &str) -> Option<(&str, &str)> {
    if !balanced(expression) {
        return None;
    }
    let inner = expression.strip_prefix('(')?.strip_suffix(')')?.trim();
    let end = inner
        .find(|c: char| c.is_whitespace() || c == '(')
        .unwrap_or(inner.len());
    let (head, rest) = inner.split_at(end);
    if head.is_empty() {
        return None;
    }
    Some((head, rest.trim()))
}

/// Whether parentheses balance outside string literals.
fn balanced(text: &str) -> bool {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        match (in_string, escaped, c) {
            (true, true, _) => escaped = false,
            (true, false, '\\') => escaped = true,
            (true, false, '"') => in_string = false,
            (false, _, '"') => in_string = true,
            (false, _, '(') => depth += 1,
            (false, _, ')') => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0 && !in_string
}

/// Top-level parenthesised groups of `text`, ignoring anything between them.
fn top_level_groups(text: &str) -> Vec<&str> {
    let mut groups = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '(' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            ')' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    groups.push(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    groups
}

/// Whitespace-separated arguments, with string literals unquoted.
fn tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '"' {
            chars.next();
            let mut token = String::new();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => token.extend(chars.next()),
                    '"' => break,
                    c => token.push(c),
                }
            }
            tokens.push(token);
        } else {
            let mut token = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                token.push(c);
                chars.next();
            }
            tokens.push(token);
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assert_and_list_facts() {
        let mut engine = MemoryEngine::new();

        assert!(engine.assert_fact("(block G)"));
        assert!(!engine.assert_fact("(block G)"));
        assert!(engine.execute("(assert (block A) (block B))"));

        assert_eq!(engine.facts(), ["(block G)", "(block A)", "(block B)"]);

        let listing = engine.capture_output("(facts)").unwrap();
        assert!(listing.contains("f-1     (block G)"));
        assert!(listing.ends_with("For a total of 3 facts.\n"));
        assert!(engine.transcript().is_empty());
    }

    #[test]
    fn test_retract_by_text_and_id() {
        let mut engine = MemoryEngine::new();
        engine.assert_fact("(a)");
        engine.assert_fact("(b)");

        assert!(engine.execute("(retract (a))"));
        assert!(engine.execute("(retract 2)"));
        assert!(!engine.execute("(retract (zzz))"));
        assert!(engine.facts().is_empty());
    }

    #[test]
    fn test_run_bounds() {
        let mut engine = MemoryEngine::new();
        for rule in ["r1", "r2", "r3"] {
            engine.schedule(rule);
        }

        assert_eq!(engine.run(2), 2);
        assert_eq!(engine.run(-1), 1);
        assert_eq!(engine.run(-1), 0);
    }

    #[test]
    fn test_watch_output() {
        let mut engine = MemoryEngine::new();
        engine.toggle_watch(WatchItem::Facts);
        engine.toggle_watch(WatchItem::Rules);
        engine.schedule("stack");

        engine.assert_fact("(x)");
        engine.run(-1);

        assert_eq!(engine.transcript(), ["==> f-1     (x)", "FIRE    1 stack"]);
    }

    #[test]
    fn test_watch_expression() {
        let mut engine = MemoryEngine::new();

        assert!(engine.execute("(watch globals)"));
        assert!(engine.watch_flags().contains(WatchItem::Globals));
        assert!(engine.execute("(unwatch globals)"));
        assert!(engine.watch_flags().is_empty());
        assert!(!engine.execute("(watch nonsense)"));
    }

    #[test]
    fn test_unknown_function_fails_with_output() {
        let mut engine = MemoryEngine::new();

        match engine.capture_output("(frobnicate 1)") {
            Err(EngineError::Evaluation { output, .. }) => {
                assert!(output.contains("frobnicate"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(!engine.execute("(unbalanced"));
        assert!(!engine.execute("not a call"));
    }

    #[test]
    fn test_printout() {
        let mut engine = MemoryEngine::new();
        let out = engine
            .capture_output(r#"(printout t "hello world" 42)"#)
            .unwrap();
        assert_eq!(out, "hello world 42\n");
    }

    #[test]
    fn test_clear_drops_rules() {
        let mut engine = MemoryEngine::new();
        engine.execute("(defrule r (a) =>)");
        engine.assert_fact("(a)");

        engine.reset();
        assert!(engine.facts().is_empty());
        assert_eq!(engine.rules(), ["r"]);

        engine.clear();
        assert!(engine.rules().is_empty());
    }

    #[test]
    fn test_messaging_without_registry_fails() {
        let mut engine = MemoryEngine::new();
        assert!(!engine.execute(r#"(broadcast "hi")"#));
    }

    #[test]
    fn test_helpers() {
        assert_eq!(split_call("(assert (a b))"), Some(("assert", "(a b)")));
        assert_eq!(split_call("(reset)"), Some(("reset", "")));
        assert_eq!(split_call("()"), None);
        assert!(balanced(r#"(printout t ")(")"#));
        assert_eq!(top_level_groups("(a) junk (b (c))"), ["(a)", "(b (c))"]);
        assert_eq!(tokens(r#"t "a \"q\"" b"#), ["t", "a \"q\"", "b"]);
    }
}
