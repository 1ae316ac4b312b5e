use std::collections::BTreeSet;

/// Modules every plugin may import.
pub const DEFAULT_ALLOWED_MODULES: &[&str] = &["math"];

/// Dynamic evaluation, dynamic import, filesystem and process control,
/// reflective attribute mutation and scope introspection.
pub const DENIED_CALLS: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "__import__",
    "open",
    "setattr",
    "delattr",
    "getattr",
    "globals",
    "locals",
    "vars",
    "input",
    "breakpoint",
    "exit",
    "quit",
    "importlib.import_module",
];

/// Introspection attributes that are not dunder-shaped.
pub const DENIED_ATTRIBUTES: &[&str] = &[
    "f_globals",
    "f_locals",
    "f_back",
    "f_builtins",
    "gi_frame",
    "gi_code",
    "cr_frame",
    "tb_frame",
    "co_code",
    "func_globals",
];

/// Allow/deny lists the analyzer enforces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyPolicy {
    allowed_modules: BTreeSet<String>,
    denied_calls: BTreeSet<String>,
    denied_attributes: BTreeSet<String>,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self {
            allowed_modules: DEFAULT_ALLOWED_MODULES.iter().map(|s| s.to_string()).collect(),
            denied_calls: DENIED_CALLS.iter().map(|s| s.to_string()).collect(),
            denied_attributes: DENIED_ATTRIBUTES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SafetyPolicy {
    /// Default policy plus extra allowed modules (from config).
    pub fn with_extra_modules<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut p = Self::default();
        p.allowed_modules.extend(extra.into_iter().map(Into::into));
        p
    }

    /// `a.b` is allowed when `a.b` or `a` is on the allow-list.
    pub fn allows_module(&self, module: &str) -> bool {
        let mut prefix = String::new();
        for (i, part) in module.split('.').enumerate() {
            if i > 0 {
                prefix.push('.');
            }
            prefix.push_str(part);
            if self.allowed_modules.contains(&prefix) {
                return true;
            }
        }
        false
    }

    pub fn denies_call(&self, callee: &str) -> bool {
        self.denied_calls.contains(callee)
    }

    /// Dunder names (`__class__`, `__builtins__`, ...) and the listed frame/code internals.
    pub fn denies_attribute(&self, attr: &str) -> bool {
        (attr.len() > 4 && attr.starts_with("__") && attr.ends_with("__"))
            || self.denied_attributes.contains(attr)
    }

    pub fn allowed_modules(&self) -> impl Iterator<Item = &str> {
        self.allowed_modules.iter().map(String::as_str)
    }
}
