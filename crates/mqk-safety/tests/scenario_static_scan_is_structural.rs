//! Scenario: the static scan is structural, not behavioral.
//!
//! GREEN when:
//! - a denylisted call hidden behind a branch that can never run is still
//!   reported (runtime branching cannot skip the scan).
//! - every violation is retained, in source order, and the first one decides
//!   the primary error code.
//! - a custom frontend can feed the same rules (the analyzer does not depend
//!   on any particular grammar).

use mqk_safety::{
    Binding, FrontendError, SafetyAnalyzer, SafetyPolicy, StructuralNode, SyntaxFrontend,
    TargetShape,
};
use mqk_schemas::{ErrorCode, SourceLocation, ViolationKind};

const HIDDEN: &str = r#"
import math

def compute(bars, params):
    out = []
    if False:
        exec("import os")
    for c in bars.close:
        out.append(c)
    return out

def helper(x):
    global STATE
    STATE = x
    return x.__dict__
"#;

#[test]
fn unreachable_denylisted_call_is_still_reported() {
    let report = SafetyAnalyzer::default().scan(HIDDEN).unwrap();
    let kinds: Vec<ViolationKind> = report.violations.iter().map(|v| v.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ViolationKind::ForbiddenCall,
            ViolationKind::GlobalMutation,
            ViolationKind::ForbiddenAttribute,
        ]
    );
    assert_eq!(report.violations[0].location, SourceLocation { line: 7, column: 9 });
    assert_eq!(report.primary_code(), Some(ErrorCode::ForbiddenCall));
    assert_eq!(report.reasons().len(), 3);
}

/// Frontend for a made-up line format: `import X` / `call X` / `set X.Y`.
struct LineFrontend;

impl SyntaxFrontend for LineFrontend {
    fn language(&self) -> &'static str {
        "lines"
    }

    fn lower(&self, source: &str) -> Result<Vec<StructuralNode>, FrontendError> {
        let mut nodes = Vec::new();
        for (i, line) in source.lines().enumerate() {
            let location = SourceLocation {
                line: i as u32 + 1,
                column: 1,
            };
            match line.split_once(' ') {
                Some(("import", m)) => nodes.push(StructuralNode::Import {
                    module: m.to_string(),
                    location,
                }),
                Some(("call", c)) => nodes.push(StructuralNode::Call {
                    callee: Some(c.to_string()),
                    location,
                }),
                Some(("set", t)) => nodes.push(StructuralNode::Assignment {
                    target: t.to_string(),
                    shape: TargetShape::Attribute,
                    root: t.split('.').next().map(str::to_string),
                    binding: Binding::Imported,
                    in_function: false,
                    location,
                }),
                _ => {
                    return Err(FrontendError {
                        message: format!("bad line {line:?}"),
                        location: Some(location),
                    })
                }
            }
        }
        Ok(nodes)
    }
}

#[test]
fn rules_apply_to_any_frontend() {
    let analyzer = SafetyAnalyzer::with_frontend(LineFrontend, SafetyPolicy::default());
    let report = analyzer.scan("import math\nset math.pi\ncall open\n").unwrap();
    let kinds: Vec<ViolationKind> = report.violations.iter().map(|v| v.kind).collect();
    assert_eq!(kinds, vec![ViolationKind::MonkeyPatch, ViolationKind::ForbiddenCall]);
    assert_eq!(report.primary_code(), Some(ErrorCode::GlobalStateDetected));

    assert!(analyzer.scan("??\n").is_err());
}
