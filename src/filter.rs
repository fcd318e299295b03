//! Per-call filtering engine.
//!
//! Decides, for a fully-qualified call site `(class_name, method_name)`,
//! whether it should be traced. Human-authored rule lines in two external
//! syntaxes are normalized into `(path, method)` pairs, accumulated into
//! one ordered rule set, and evaluated through a decision cache since the
//! question is asked on every intercepted call.
//!
//! Rule file grammar, one rule per line:
//! - `# ...` comment, unless the line is an anonymous-class literal `#<...>`
//! - `+Foo::Bar#baz` allow rule
//! - `-Foo::Bar#baz` or bare `Foo::Bar#baz` deny rule
//!
//! The primary syntax separates namespaces with `::` and the method with
//! `#` or `.`; a lone initial-capital token is a path-only rule and a lone
//! lowercase token is a method-only rule (a heuristic, preserved because
//! rule files in the wild depend on it). The alternate syntax separates
//! namespaces with `.` and the method with `::`.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use tracing::{debug, warn};

/// Whether a matching rule admits or suppresses the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Allow,
    Deny,
}

/// One normalized filter rule. At least one of `path`/`method` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Namespace path, matched as a literal prefix of the class name
    /// (or of `class#method` for paths ending in `#`).
    pub path: Option<String>,
    /// Method name, matched as a prefix of the call site's method.
    pub method: Option<String>,
    pub polarity: Polarity,
}

/// Normalized `(path, method)` pair produced by rule translation.
type Translated = (Option<String>, Option<String>);

/// Split on the method separators `#` and `.`, dropping trailing empty
/// segments but keeping leading ones (`"#<A>#b"` keeps its leading blank).
fn split_method(s: &str) -> Vec<&str> {
    let mut parts: Vec<&str> = s.split(['#', '.']).collect();
    while parts.last() == Some(&"") {
        parts.pop();
    }
    parts
}

/// Split on the namespace separator `::`, dropping trailing empty
/// segments (`"Net::"` yields just `["Net"]`).
fn split_namespace(s: &str) -> Vec<&str> {
    let mut parts: Vec<&str> = s.split("::").collect();
    while parts.last() == Some(&"") {
        parts.pop();
    }
    parts
}

fn starts_uppercase(s: &str) -> bool {
    s.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

fn starts_lowercase(s: &str) -> bool {
    s.chars().next().is_some_and(|c| c.is_ascii_lowercase())
}

/// Primary syntax: `Foo::Bar#baz`, `Foo::Bar.baz`, `Foo::Bar::baz`.
///
/// Returns None to fall through to the alternate syntax: a method segment
/// that itself looks like a namespace, or an initial-capital method name,
/// belongs to the alternate grammar.
fn translate_primary(filter: &str) -> Option<Translated> {
    let is_comment = filter.starts_with('#');
    let is_anonymous = filter.starts_with("#<");

    if is_anonymous {
        // `#<Module:Foo>#bar` — the literal is preserved as an opaque path.
        let parts = split_method(filter);
        let class_literal = parts.get(1)?;
        let method = parts.get(2).map(|m| (*m).to_string());
        return Some((Some(format!("#{class_literal}")), method));
    }
    if is_comment {
        return None;
    }

    let (mut path, mut method) = if filter.ends_with('#') {
        (Some(filter.to_string()), None)
    } else {
        let parts = split_method(filter);
        (
            parts.first().map(|p| (*p).to_string()),
            parts.get(1).map(|m| (*m).to_string()),
        )
    };

    if let Some(m) = &method {
        // Uppercase-initial methods belong to the alternate grammar,
        // except the profiler's own `Rust_`-prefixed middleware hooks.
        if starts_uppercase(m) && !m.starts_with("Rust") {
            return None;
        }
    }
    if let Some(p) = &path {
        // A lowercase-only token is a method, not a namespace.
        if *p == p.to_lowercase() {
            method = path.take();
        }
    }
    if method.as_deref().is_some_and(|m| m.contains("::")) {
        return None;
    }
    if let Some(p) = &mut path {
        // `Foo::Bar::baz` — a trailing lowercase segment is the method.
        let last = split_namespace(p).last().map(|s| (*s).to_string());
        if let Some(last) = last {
            if starts_lowercase(&last) {
                let stripped = p.strip_suffix(&format!("::{last}")).map(str::to_string);
                if let Some(stripped) = stripped {
                    *p = stripped;
                }
                method = Some(last);
            }
        }
    }
    Some((path, method))
}

/// Alternate syntax: `Foo.Bar::baz` — namespaces dot-separated, method
/// separated by `::`.
fn translate_alternate(filter: &str) -> Option<Translated> {
    if filter.starts_with('#') {
        return None;
    }
    let parts = split_namespace(filter);
    let path = parts.first()?.replace('.', "::");
    let method = parts.get(1).map(|m| (*m).to_string());
    Some((Some(path), method))
}

/// Normalize one rule body (without polarity prefix) into a
/// `(path, method)` pair, or None for comments and untranslatable lines.
pub fn translate(filter: &str) -> Option<Translated> {
    translate_primary(filter).or_else(|| translate_alternate(filter))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Specificity {
    MethodOnly = 1,
    PathOnly = 2,
    Exact = 3,
}

/// Ordered rule set with a per-call-site decision cache.
///
/// Rules only accumulate (defaults, then file rules, then runtime API
/// appends); the cache is cleared on every append. Reads vastly outnumber
/// writes, so both live behind `RwLock`s.
pub struct FilterEngine {
    rules: RwLock<Vec<Rule>>,
    cache: RwLock<HashMap<(String, String), bool>>,
}

impl Default for FilterEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterEngine {
    /// Engine preloaded with the built-in deny rules for the profiler's
    /// own namespaces, so instrumented runtimes never trace the pipeline
    /// into itself.
    pub fn new() -> Self {
        let engine = Self::empty();
        engine.add_deny(Some("Rastro::"), None);
        engine
    }

    /// Engine with no rules at all. Every call site is traceable.
    pub fn empty() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Append an allow rule. A rule with neither path nor method is
    /// meaningless and is skipped with a warning.
    pub fn add_allow(&self, path: Option<&str>, method: Option<&str>) {
        self.append(path, method, Polarity::Allow);
    }

    /// Append a deny rule.
    pub fn add_deny(&self, path: Option<&str>, method: Option<&str>) {
        self.append(path, method, Polarity::Deny);
    }

    fn append(&self, path: Option<&str>, method: Option<&str>, polarity: Polarity) {
        if path.is_none() && method.is_none() {
            warn!("skipping filter rule with neither path nor method");
            return;
        }
        debug!(?path, ?method, ?polarity, "filter rule appended");
        let rule = Rule {
            path: path.map(str::to_string),
            method: method.map(str::to_string),
            polarity,
        };
        match self.rules.write() {
            Ok(mut rules) => rules.push(rule),
            Err(poisoned) => poisoned.into_inner().push(rule),
        }
        match self.cache.write() {
            Ok(mut cache) => cache.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    /// Parse a batch of raw rule lines. A translation failure for one
    /// line is logged and skipped, never aborting the batch. Returns the
    /// number of rules appended.
    pub fn add_lines<'a>(&self, lines: impl IntoIterator<Item = &'a str>) -> usize {
        let mut appended = 0;
        for raw in lines {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('#') && !line.starts_with("#<") {
                continue;
            }
            let (body, polarity) = match line.strip_prefix('+') {
                Some(rest) => (rest, Polarity::Allow),
                None => (line.strip_prefix('-').unwrap_or(line), Polarity::Deny),
            };
            match translate(body) {
                Some((path, method)) if path.is_some() || method.is_some() => {
                    self.append(path.as_deref(), method.as_deref(), polarity);
                    appended += 1;
                }
                _ => warn!(line, "failed to translate filter rule, skipping"),
            }
        }
        appended
    }

    /// Load rules from a UTF-8 rule file. A missing file is not an error;
    /// an unreadable one is. Returns the number of rules appended.
    pub fn load_rule_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no filter rule file");
            return Ok(0);
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading filter rule file {}", path.display()))?;
        Ok(self.add_lines(contents.lines()))
    }

    /// Whether any rules have been registered.
    pub fn is_empty(&self) -> bool {
        match self.rules.read() {
            Ok(rules) => rules.is_empty(),
            Err(poisoned) => poisoned.into_inner().is_empty(),
        }
    }

    /// The per-call decision: true unless a deny rule matches with no
    /// more-specific allow rule also matching.
    ///
    /// Specificity, most to least: exact (path and method) > path-only >
    /// method-only > no rule (default allow). Within equal specificity the
    /// most recently appended rule wins.
    pub fn is_traceable(&self, class_name: &str, method_name: &str) -> bool {
        let key = (class_name.to_string(), method_name.to_string());
        if let Ok(cache) = self.cache.read() {
            if let Some(&decision) = cache.get(&key) {
                return decision;
            }
        }
        let decision = self.decide(class_name, method_name);
        match self.cache.write() {
            Ok(mut cache) => {
                cache.insert(key, decision);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(key, decision);
            }
        }
        decision
    }

    fn decide(&self, class_name: &str, method_name: &str) -> bool {
        let full_name = format!("{class_name}#{method_name}");
        let rules = match self.rules.read() {
            Ok(rules) => rules,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut best: Option<(Specificity, Polarity)> = None;
        for rule in rules.iter() {
            let path_hit = match &rule.path {
                Some(p) if p.ends_with('#') => full_name.starts_with(p.as_str()),
                Some(p) => class_name.starts_with(p.as_str()),
                None => true,
            };
            let method_hit = match &rule.method {
                Some(m) => method_name.starts_with(m.as_str()),
                None => true,
            };
            if !path_hit || !method_hit {
                continue;
            }
            let specificity = match (&rule.path, &rule.method) {
                (Some(_), Some(_)) => Specificity::Exact,
                (Some(_), None) => Specificity::PathOnly,
                (None, Some(_)) => Specificity::MethodOnly,
                (None, None) => continue,
            };
            // >= keeps the later rule on equal specificity.
            if best.map_or(true, |(s, _)| specificity >= s) {
                best = Some((specificity, rule.polarity));
            }
        }
        match best {
            Some((_, Polarity::Deny)) => false,
            _ => true,
        }
    }
}
