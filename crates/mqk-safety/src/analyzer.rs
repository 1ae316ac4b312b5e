use mqk_schemas::{SafetyScanReport, SafetyViolation, ViolationKind};
use tracing::debug;

use crate::frontend::{FrontendError, ScriptFrontend, SyntaxFrontend};
use crate::node::{Binding, StructuralNode, TargetShape};
use crate::policy::SafetyPolicy;

/// Static safety analyzer: lowers source through a frontend and applies the
/// policy to every structural node. Never executes the source.
#[derive(Debug, Clone)]
pub struct SafetyAnalyzer<F = ScriptFrontend> {
    frontend: F,
    policy: SafetyPolicy,
}

impl SafetyAnalyzer<ScriptFrontend> {
    pub fn new(policy: SafetyPolicy) -> Self {
        Self::with_frontend(ScriptFrontend, policy)
    }
}

impl Default for SafetyAnalyzer<ScriptFrontend> {
    fn default() -> Self {
        Self::new(SafetyPolicy::default())
    }
}

impl<F: SyntaxFrontend> SafetyAnalyzer<F> {
    pub fn with_frontend(frontend: F, policy: SafetyPolicy) -> Self {
        Self { frontend, policy }
    }

    pub fn policy(&self) -> &SafetyPolicy {
        &self.policy
    }

    pub fn scan(&self, source: &str) -> Result<SafetyScanReport, FrontendError> {
        let nodes = self.frontend.lower(source)?;
        let report = self.scan_nodes(&nodes);
        debug!(
            language = self.frontend.language(),
            nodes = nodes.len(),
            violations = report.violations.len(),
            "static safety scan complete"
        );
        Ok(report)
    }

    /// Violations in node order. All are kept; the first decides the code.
    pub fn scan_nodes(&self, nodes: &[StructuralNode]) -> SafetyScanReport {
        SafetyScanReport {
            violations: nodes.iter().filter_map(|n| self.visit(n)).collect(),
        }
    }

    fn visit(&self, node: &StructuralNode) -> Option<SafetyViolation> {
        let location = node.location();
        let (kind, detail) = match node {
            StructuralNode::Import { module, .. } => {
                if self.policy.allows_module(module) {
                    return None;
                }
                (
                    ViolationKind::ForbiddenImport,
                    format!("import of '{module}' is not allowed"),
                )
            }
            StructuralNode::Call { callee, .. } => {
                let callee = callee.as_deref()?;
                if !self.policy.denies_call(callee) {
                    return None;
                }
                (
                    ViolationKind::ForbiddenCall,
                    format!("call to '{callee}' is not allowed"),
                )
            }
            StructuralNode::AttributeAccess { attr, .. } => {
                if !self.policy.denies_attribute(attr) {
                    return None;
                }
                (
                    ViolationKind::ForbiddenAttribute,
                    format!("access to attribute '{attr}' is not allowed"),
                )
            }
            StructuralNode::Assignment {
                target,
                shape,
                binding,
                in_function,
                ..
            } => assignment_rule(target, *shape, *binding, *in_function)?,
        };
        Some(SafetyViolation {
            kind,
            location,
            detail,
        })
    }
}

fn assignment_rule(
    target: &str,
    shape: TargetShape,
    binding: Binding,
    in_function: bool,
) -> Option<(ViolationKind, String)> {
    if shape == TargetShape::Name {
        return (binding == Binding::DeclaredOuter).then(|| {
            (
                ViolationKind::GlobalMutation,
                format!("assignment to '{target}' declared outside the function scope"),
            )
        });
    }
    match binding {
        Binding::Local => None,
        Binding::Imported | Binding::Parameter | Binding::Unbound | Binding::Computed => Some((
            ViolationKind::MonkeyPatch,
            format!("assignment into '{target}' mutates an externally bound object"),
        )),
        Binding::ModuleLevel | Binding::Enclosing | Binding::DeclaredOuter if in_function => Some((
            ViolationKind::GlobalMutation,
            format!("assignment into '{target}' mutates state outside the function scope"),
        )),
        // Building module-level constants at import time.
        Binding::ModuleLevel | Binding::Enclosing | Binding::DeclaredOuter => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqk_schemas::ErrorCode;

    fn kinds(src: &str) -> Vec<ViolationKind> {
        SafetyAnalyzer::default()
            .scan(src)
            .unwrap()
            .violations
            .into_iter()
            .map(|v| v.kind)
            .collect()
    }

    #[test]
    fn clean_indicator_is_safe() {
        let src = "\
import math
SCALE = [1.0, 2.0]
SCALE[0] = 0.5

def compute(bars, params):
    out = []
    for c in bars.close:
        out.append(math.sqrt(c) * SCALE[0])
    return out
";
        assert!(kinds(src).is_empty());
    }

    #[test]
    fn denylisted_calls_and_imports() {
        assert_eq!(kinds("import os\n"), vec![ViolationKind::ForbiddenImport]);
        assert_eq!(kinds("from subprocess import run\n"), vec![ViolationKind::ForbiddenImport]);
        assert_eq!(kinds("x = eval('1')\n"), vec![ViolationKind::ForbiddenCall]);
        assert_eq!(
            kinds("import importlib\nm = importlib.import_module('os')\n"),
            vec![ViolationKind::ForbiddenImport, ViolationKind::ForbiddenCall]
        );
    }

    #[test]
    fn dunder_access_maps_to_forbidden_call_code() {
        let report = SafetyAnalyzer::default()
            .scan("def f(x):\n    return x.__class__\n")
            .unwrap();
        assert_eq!(report.violations[0].kind, ViolationKind::ForbiddenAttribute);
        assert_eq!(report.primary_code(), Some(ErrorCode::ForbiddenCall));
    }

    #[test]
    fn monkey_patching_imports_and_parameters() {
        assert_eq!(kinds("import math\nmath.pi = 3\n"), vec![ViolationKind::MonkeyPatch]);
        assert_eq!(
            kinds("def compute(bars, params):\n    bars.close = []\n    return []\n"),
            vec![ViolationKind::MonkeyPatch]
        );
        assert_eq!(
            kinds("def compute(bars, params):\n    params['n'] += 1\n    return []\n"),
            vec![ViolationKind::MonkeyPatch]
        );
    }

    #[test]
    fn global_state_mutation() {
        assert_eq!(
            kinds("n = 0\ndef f():\n    global n\n    n = n + 1\n"),
            vec![ViolationKind::GlobalMutation]
        );
        assert_eq!(
            kinds("seen = []\ndef f(x):\n    seen[0] = x\n"),
            vec![ViolationKind::GlobalMutation]
        );
    }

    #[test]
    fn extra_modules_come_from_policy() {
        let analyzer = SafetyAnalyzer::new(SafetyPolicy::with_extra_modules(["stats"]));
        assert!(analyzer.scan("import stats\n").unwrap().is_safe());
    }
}
