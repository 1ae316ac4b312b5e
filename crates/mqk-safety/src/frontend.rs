use std::collections::BTreeSet;

use mqk_schemas::SourceLocation;
use mqk_script::{parse, Expr, ExprKind, Module, ParseError, Span, Stmt, StmtKind, Target};

use crate::node::{Binding, StructuralNode, TargetShape};

/// Source could not be lowered (it does not parse).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontendError {
    pub message: String,
    pub location: Option<SourceLocation>,
}

impl std::fmt::Display for FrontendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "source does not parse at {loc}: {}", self.message),
            None => write!(f, "source does not parse: {}", self.message),
        }
    }
}

impl std::error::Error for FrontendError {}

impl From<ParseError> for FrontendError {
    fn from(e: ParseError) -> Self {
        Self {
            message: format!("[{}] {}", e.code.as_str(), e.message),
            location: Some(location(e.span)),
        }
    }
}

/// Lowers source text of one language into [`StructuralNode`]s.
pub trait SyntaxFrontend {
    fn language(&self) -> &'static str;

    /// Nodes in source order.
    fn lower(&self, source: &str) -> Result<Vec<StructuralNode>, FrontendError>;
}

/// Frontend for `.mqs` plugin sources.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptFrontend;

impl SyntaxFrontend for ScriptFrontend {
    fn language(&self) -> &'static str {
        "mqk-script"
    }

    fn lower(&self, source: &str) -> Result<Vec<StructuralNode>, FrontendError> {
        let module = parse(source)?;
        Ok(lower_module(&module))
    }
}

fn location(span: Span) -> SourceLocation {
    SourceLocation {
        line: span.line,
        column: span.column,
    }
}

/// Names bound directly in one scope (not descending into nested `def`s).
#[derive(Debug, Default)]
struct ScopeNames {
    params: BTreeSet<String>,
    assigned: BTreeSet<String>,
    imported: BTreeSet<String>,
    declared_outer: BTreeSet<String>,
}

impl ScopeNames {
    fn collect(params: &[String], body: &[Stmt]) -> Self {
        let mut s = ScopeNames {
            params: params.iter().cloned().collect(),
            ..Default::default()
        };
        s.scan(body);
        s
    }

    fn scan(&mut self, body: &[Stmt]) {
        for stmt in body {
            match &stmt.kind {
                StmtKind::Import { names } | StmtKind::FromImport { names, .. } => {
                    for alias in names {
                        self.imported.insert(alias.bound_name().to_string());
                    }
                }
                StmtKind::FunctionDef(def) => {
                    self.assigned.insert(def.name.clone());
                }
                StmtKind::Assign { target: Target::Name(n), .. }
                | StmtKind::AugAssign { target: Target::Name(n), .. } => {
                    self.assigned.insert(n.clone());
                }
                StmtKind::For { target, body, .. } => {
                    self.assigned.insert(target.clone());
                    self.scan(body);
                }
                StmtKind::If { body, orelse, .. } => {
                    self.scan(body);
                    self.scan(orelse);
                }
                StmtKind::While { body, .. } => self.scan(body),
                StmtKind::Global(names) | StmtKind::Nonlocal(names) => {
                    self.declared_outer.extend(names.iter().cloned());
                }
                _ => {}
            }
        }
    }

    /// Binding of `name` as seen from this scope alone, if it binds it.
    fn binds(&self, name: &str) -> Option<Binding> {
        if self.declared_outer.contains(name) {
            Some(Binding::DeclaredOuter)
        } else if self.params.contains(name) {
            Some(Binding::Parameter)
        } else if self.imported.contains(name) {
            Some(Binding::Imported)
        } else if self.assigned.contains(name) {
            Some(Binding::Local)
        } else {
            None
        }
    }
}

struct Lowering {
    nodes: Vec<StructuralNode>,
    module: ScopeNames,
    /// Innermost function scope last.
    functions: Vec<ScopeNames>,
}

fn lower_module(module: &Module) -> Vec<StructuralNode> {
    let mut lw = Lowering {
        nodes: Vec::new(),
        module: ScopeNames::collect(&[], &module.body),
        functions: Vec::new(),
    };
    lw.block(&module.body);
    lw.nodes.sort_by_key(StructuralNode::location);
    lw.nodes
}

impl Lowering {
    fn in_function(&self) -> bool {
        !self.functions.is_empty()
    }

    fn resolve(&self, name: &str) -> Binding {
        let mut scopes = self.functions.iter().rev();
        if let Some(inner) = scopes.next() {
            if let Some(b) = inner.binds(name) {
                return b;
            }
            for outer in scopes {
                match outer.binds(name) {
                    Some(Binding::Imported) => return Binding::Imported,
                    Some(Binding::DeclaredOuter) => return Binding::ModuleLevel,
                    Some(_) => return Binding::Enclosing,
                    None => {}
                }
            }
        }
        if self.module.imported.contains(name) {
            Binding::Imported
        } else if self.module.assigned.contains(name) {
            Binding::ModuleLevel
        } else {
            Binding::Unbound
        }
    }

    fn block(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        let loc = location(stmt.span);
        match &stmt.kind {
            StmtKind::Import { names } => {
                for alias in names {
                    self.nodes.push(StructuralNode::Import {
                        module: alias.name.clone(),
                        location: loc,
                    });
                }
            }
            StmtKind::FromImport { module, .. } => {
                self.nodes.push(StructuralNode::Import {
                    module: module.clone(),
                    location: loc,
                });
            }
            StmtKind::FunctionDef(def) => {
                self.functions.push(ScopeNames::collect(&def.params, &def.body));
                self.block(&def.body);
                self.functions.pop();
            }
            StmtKind::Return(value) => {
                if let Some(e) = value {
                    self.expr(e);
                }
            }
            StmtKind::If { test, body, orelse } => {
                self.expr(test);
                self.block(body);
                self.block(orelse);
            }
            StmtKind::While { test, body } => {
                self.expr(test);
                self.block(body);
            }
            StmtKind::For { target, iter, body } => {
                self.expr(iter);
                self.assignment(&Target::Name(target.clone()), loc);
                self.block(body);
            }
            StmtKind::Assign { target, value } | StmtKind::AugAssign { target, value, .. } => {
                self.expr(value);
                self.target_exprs(target);
                self.assignment(target, loc);
            }
            StmtKind::Expr(e) => self.expr(e),
            StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Pass
            | StmtKind::Global(_)
            | StmtKind::Nonlocal(_) => {}
        }
    }

    /// Sub-expressions evaluated while storing into `target`.
    fn target_exprs(&mut self, target: &Target) {
        match target {
            Target::Name(_) => {}
            Target::Attribute { value, .. } => self.expr(value),
            Target::Subscript { value, index } => {
                self.expr(value);
                self.expr(index);
            }
        }
    }

    fn assignment(&mut self, target: &Target, loc: SourceLocation) {
        let (shape, rendered) = match target {
            Target::Name(n) => (TargetShape::Name, n.clone()),
            Target::Attribute { value, attr } => {
                self.nodes.push(StructuralNode::AttributeAccess {
                    attr: attr.clone(),
                    location: loc,
                });
                (TargetShape::Attribute, format!("{}.{attr}", render(value)))
            }
            Target::Subscript { value, .. } => (TargetShape::Subscript, format!("{}[...]", render(value))),
        };
        let root = target.root_name().map(str::to_string);
        let binding = match &root {
            None => Binding::Computed,
            Some(r) if shape == TargetShape::Name => {
                match self.functions.last().and_then(|f| f.binds(r)) {
                    Some(Binding::DeclaredOuter) => Binding::DeclaredOuter,
                    _ if self.in_function() => Binding::Local,
                    _ => self.resolve(r),
                }
            }
            Some(r) => self.resolve(r),
        };
        self.nodes.push(StructuralNode::Assignment {
            target: rendered,
            shape,
            root,
            binding,
            in_function: self.in_function(),
            location: loc,
        });
    }

    fn expr(&mut self, e: &Expr) {
        let nodes = &mut self.nodes;
        e.walk(&mut |sub| match &sub.kind {
            ExprKind::Call { func, .. } => nodes.push(StructuralNode::Call {
                callee: func.dotted_path(),
                location: location(sub.span),
            }),
            ExprKind::Attribute { attr, .. } => nodes.push(StructuralNode::AttributeAccess {
                attr: attr.clone(),
                location: location(sub.span),
            }),
            _ => {}
        });
    }
}

fn render(e: &Expr) -> String {
    e.dotted_path().unwrap_or_else(|| match &e.kind {
        ExprKind::Subscript { value, .. } => format!("{}[...]", render(value)),
        ExprKind::Call { func, .. } => format!("{}(...)", render(func)),
        _ => "<expr>".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignments(src: &str) -> Vec<(String, TargetShape, Binding, bool)> {
        ScriptFrontend
            .lower(src)
            .unwrap()
            .into_iter()
            .filter_map(|n| match n {
                StructuralNode::Assignment {
                    target,
                    shape,
                    binding,
                    in_function,
                    ..
                } => Some((target, shape, binding, in_function)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn bindings_are_resolved_per_scope() {
        let src = "\
import math
LIMIT = 3
cache = {}

def compute(bars, params):
    out = []
    out[0] = 1
    cache['k'] = 2
    params['p'] = 3
    math.pi = 4
    return out
";
        let a = assignments(src);
        assert_eq!(a[0], ("LIMIT".into(), TargetShape::Name, Binding::ModuleLevel, false));
        assert_eq!(a[2], ("out".into(), TargetShape::Name, Binding::Local, true));
        assert_eq!(a[3], ("out[...]".into(), TargetShape::Subscript, Binding::Local, true));
        assert_eq!(a[4], ("cache[...]".into(), TargetShape::Subscript, Binding::ModuleLevel, true));
        assert_eq!(a[5], ("params[...]".into(), TargetShape::Subscript, Binding::Parameter, true));
        assert_eq!(a[6], ("math.pi".into(), TargetShape::Attribute, Binding::Imported, true));
    }

    #[test]
    fn global_and_nonlocal_declarations() {
        let src = "\
total = 0
def outer():
    acc = []
    def inner():
        nonlocal acc
        acc = [1]
    def bump():
        global total
        total = 1
    acc[0] = 2
";
        let a = assignments(src);
        let find = |t: &str| a.iter().find(|x| x.0 == t).cloned().unwrap();
        assert_eq!(find("total").2, Binding::ModuleLevel);
        assert_eq!(
            a.iter().filter(|x| x.2 == Binding::DeclaredOuter).count(),
            2,
            "nonlocal acc and global total"
        );
        assert_eq!(find("acc[...]").2, Binding::Local);
    }

    #[test]
    fn nodes_are_source_ordered() {
        let nodes = ScriptFrontend.lower("x = eval(y.__class__)\nimport os\n").unwrap();
        let locs: Vec<_> = nodes.iter().map(|n| n.location()).collect();
        let mut sorted = locs.clone();
        sorted.sort();
        assert_eq!(locs, sorted);
        assert!(matches!(&nodes[0], StructuralNode::Assignment { .. } | StructuralNode::Call { .. }));
        assert!(matches!(nodes.last(), Some(StructuralNode::Import { module, .. }) if module == "os"));
    }

    #[test]
    fn parse_failure_is_a_frontend_error() {
        let err = ScriptFrontend.lower("def f(:\n").unwrap_err();
        assert_eq!(err.location.map(|l| l.line), Some(1));
    }
}
