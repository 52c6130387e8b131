//! Workflow lint - static checks run before anything executes
//!
//! Errors:
//! - empty `run`
//! - capture regex that does not compile
//! - cycles in `needs`
//!
//! Warnings:
//! - captured outputs no template ever reads
//! - steps nothing `needs`

use crate::core::workflow::Workflow;
use regex::{Regex, RegexBuilder};
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// One lint finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintIssue {
    /// `None` for workflow-level problems
    pub step: Option<String>,
    pub problem: String,
    pub recommendation: String,
    pub severity: Severity,
}

pub trait LintRule: Send + Sync {
    fn check(&self, workflow: &Workflow) -> Vec<LintIssue>;
}

/// Runs every built-in rule
pub struct Linter {
    rules: Vec<Box<dyn LintRule>>,
}

impl Linter {
    pub fn new() -> Self {
        let rules: Vec<Box<dyn LintRule>> = vec![
            Box::new(EmptyRunRule),
            Box::new(CaptureRegexRule),
            Box::new(UnusedOutputRule),
            Box::new(UnreferencedStepRule),
            Box::new(CycleRule),
        ];
        Self { rules }
    }

    pub fn check(&self, workflow: &Workflow) -> Vec<LintIssue> {
        self.rules
            .iter()
            .flat_map(|rule| rule.check(workflow))
            .collect()
    }
}

impl Default for Linter {
    fn default() -> Self {
        Self::new()
    }
}

pub fn lint(workflow: &Workflow) -> Vec<LintIssue> {
    Linter::new().check(workflow)
}

pub fn has_errors(issues: &[LintIssue]) -> bool {
    issues.iter().any(|i| i.severity == Severity::Error)
}

// === Built-in Rules ===

struct EmptyRunRule;
impl LintRule for EmptyRunRule {
    fn check(&self, workflow: &Workflow) -> Vec<LintIssue> {
        workflow
            .steps
            .iter()
            .filter(|s| s.run.trim().is_empty())
            .map(|s| LintIssue {
                step: Some(s.name.clone()),
                problem: "empty run".to_string(),
                recommendation: "fill in run or remove the step".to_string(),
                severity: Severity::Error,
            })
            .collect()
    }
}

struct CaptureRegexRule;
impl LintRule for CaptureRegexRule {
    fn check(&self, workflow: &Workflow) -> Vec<LintIssue> {
        let mut issues = Vec::new();
        for step in &workflow.steps {
            for (key, rule) in &step.capture {
                if let Err(e) = RegexBuilder::new(&rule.regex).multi_line(true).build() {
                    issues.push(LintIssue {
                        step: Some(step.name.clone()),
                        problem: format!("capture[{}].regex is invalid ({})", key, e),
                        recommendation: "fix the regular expression syntax".to_string(),
                        severity: Severity::Error,
                    });
                }
            }
        }
        issues
    }
}

fn output_ref_regex() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| {
        Regex::new(r"\$\{\{\s*steps\.([A-Za-z0-9_\-]+)\.outputs\.([A-Za-z0-9_\-]+)\s*\}\}")
            .expect("output reference pattern")
    })
}

/// `(step, key)` pairs read by any run, if, cwd or env template
fn output_refs(workflow: &Workflow) -> HashSet<(String, String)> {
    let mut used = HashSet::new();
    for step in &workflow.steps {
        let texts = std::iter::once(&step.run)
            .chain(step.if_expr.as_ref())
            .chain(step.cwd.as_ref())
            .chain(step.env.values());
        for text in texts {
            for caps in output_ref_regex().captures_iter(text) {
                used.insert((caps[1].to_string(), caps[2].to_string()));
            }
        }
    }
    used
}

struct UnusedOutputRule;
impl LintRule for UnusedOutputRule {
    fn check(&self, workflow: &Workflow) -> Vec<LintIssue> {
        let used = output_refs(workflow);
        let mut issues = Vec::new();
        for step in &workflow.steps {
            for key in step.capture.keys() {
                if !used.contains(&(step.name.clone(), key.clone())) {
                    issues.push(LintIssue {
                        step: Some(step.name.clone()),
                        problem: format!("unused output '{}'", key),
                        recommendation: format!(
                            "remove the capture or use ${{{{ steps.{}.outputs.{} }}}}",
                            step.name, key
                        ),
                        severity: Severity::Warning,
                    });
                }
            }
        }
        issues
    }
}

struct UnreferencedStepRule;
impl LintRule for UnreferencedStepRule {
    fn check(&self, workflow: &Workflow) -> Vec<LintIssue> {
        let referenced: HashSet<&str> = workflow
            .steps
            .iter()
            .flat_map(|s| s.needs.iter().map(String::as_str))
            .collect();
        workflow
            .steps
            .iter()
            .filter(|s| !referenced.contains(s.name.as_str()))
            .map(|s| LintIssue {
                step: Some(s.name.clone()),
                problem: "no other step needs this one (unreferenced)".to_string(),
                recommendation: "if it should be linked, add it to the dependents' needs".to_string(),
                severity: Severity::Warning,
            })
            .collect()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    Gray,
    Black,
}

/// Every cycle found by a DFS over `needs`, as step names
pub fn find_cycles(workflow: &Workflow) -> Vec<Vec<String>> {
    let graph: HashMap<&str, Vec<&str>> = workflow
        .steps
        .iter()
        .map(|s| (s.name.as_str(), s.needs.iter().map(String::as_str).collect()))
        .collect();

    fn visit<'a>(
        node: &'a str,
        graph: &HashMap<&'a str, Vec<&'a str>>,
        colors: &mut HashMap<&'a str, Color>,
        stack: &mut Vec<&'a str>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        colors.insert(node, Color::Gray);
        stack.push(node);
        for &next in graph.get(node).into_iter().flatten() {
            if !graph.contains_key(next) {
                continue;
            }
            match colors.get(next) {
                None => visit(next, graph, colors, stack, cycles),
                Some(Color::Gray) => {
                    if let Some(k) = stack.iter().position(|n| *n == next) {
                        cycles.push(stack[k..].iter().map(|n| n.to_string()).collect());
                    }
                }
                Some(Color::Black) => {}
            }
        }
        stack.pop();
        colors.insert(node, Color::Black);
    }

    let mut colors = HashMap::new();
    let mut stack = Vec::new();
    let mut cycles = Vec::new();
    for step in &workflow.steps {
        if !colors.contains_key(step.name.as_str()) {
            visit(&step.name, &graph, &mut colors, &mut stack, &mut cycles);
        }
    }
    cycles
}

struct CycleRule;
impl LintRule for CycleRule {
    fn check(&self, workflow: &Workflow) -> Vec<LintIssue> {
        find_cycles(workflow)
            .into_iter()
            .map(|cycle| LintIssue {
                step: None,
                problem: format!("dependency cycle: {}", cycle.join(" -> ")),
                recommendation: "break the cycle in needs; the graph must be acyclic".to_string(),
                severity: Severity::Error,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::workflow::{CaptureRule, Step};
    use std::collections::BTreeMap;

    fn workflow(steps: Vec<Step>) -> Workflow {
        Workflow {
            name: "lint".to_string(),
            steps,
            env: BTreeMap::new(),
            secrets_from: None,
            source: None,
        }
    }

    #[test]
    fn test_clean_chain_only_warns_on_leaf() {
        let yaml = r#"
steps:
  - name: build
    run: echo "version: 1"
    capture:
      version: { regex: 'version: (\d+)' }
  - name: ship
    needs: [build]
    env:
      VERSION: ${{ steps.build.outputs.version }}
    run: echo "$VERSION"
"#;
        let wf = Workflow::from_yaml_str(yaml).unwrap();
        let issues = lint(&wf);
        assert!(!has_errors(&issues));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].step.as_deref(), Some("ship"));
        assert_eq!(issues[0].severity, Severity::Warning);
    }

    #[test]
    fn test_unused_output_and_bad_regex() {
        let mut step = Step::new("build", "echo hi");
        step.capture.insert("version".to_string(), CaptureRule { regex: "(unclosed".to_string() });
        let issues = lint(&workflow(vec![step]));

        assert!(has_errors(&issues));
        assert!(issues.iter().any(|i| i.problem.starts_with("capture[version].regex")));
        assert!(issues.iter().any(|i| i.problem == "unused output 'version'"
            && i.recommendation.contains("${{ steps.build.outputs.version }}")));
    }

    #[test]
    fn test_empty_run() {
        let issues = lint(&workflow(vec![Step::new("blank", "   ")]));
        assert!(issues.iter().any(|i| i.problem == "empty run" && i.severity == Severity::Error));
    }

    #[test]
    fn test_cycles() {
        let mut a = Step::new("a", "true");
        a.needs = vec!["c".to_string()];
        let mut b = Step::new("b", "true");
        b.needs = vec!["a".to_string()];
        let mut c = Step::new("c", "true");
        c.needs = vec!["b".to_string()];
        let wf = workflow(vec![a, b, c, Step::new("d", "true")]);

        let cycles = find_cycles(&wf);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0], vec!["a", "c", "b"]);
        assert!(has_errors(&lint(&wf)));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let mut a = Step::new("a", "true");
        a.needs = vec!["a".to_string()];
        assert_eq!(find_cycles(&workflow(vec![a])), vec![vec!["a".to_string()]]);
    }
}
