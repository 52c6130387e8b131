//! Workflow parser - parses a workflow YAML document into validated steps
//!
//! ```yaml
//! name: release
//! env:
//!   PROFILE: release
//! secrets_from: ~/.ghostflow/secrets.yml
//! steps:
//!   - name: build
//!     run: cargo build --profile ${{ env.PROFILE }}
//!     capture:
//!       version: { regex: 'version: (\S+)' }
//!   - name: publish
//!     needs: [build]
//!     target: remote:prod
//!     run: ./publish.sh ${{ steps.build.outputs.version }}
//!     retries: { max: 2, delay: 1s, backoff: 2 }
//! ```

use crate::error::WorkflowError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

/// Where a step should run
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// Chosen from the script's risk tier
    Auto,
    Host,
    Container,
    /// Remote host alias from the user config
    Remote(String),
}

impl Default for Target {
    fn default() -> Self {
        Self::Auto
    }
}

impl FromStr for Target {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let lower = trimmed.to_ascii_lowercase();
        match lower.as_str() {
            "auto" => Ok(Self::Auto),
            "host" => Ok(Self::Host),
            "container" => Ok(Self::Container),
            _ if lower.starts_with("remote:") => {
                let alias = trimmed["remote:".len()..].trim();
                if alias.is_empty() {
                    Err(())
                } else {
                    Ok(Self::Remote(alias.to_string()))
                }
            }
            _ => Err(()),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Host => write!(f, "host"),
            Self::Container => write!(f, "container"),
            Self::Remote(alias) => write!(f, "remote:{}", alias),
        }
    }
}

/// Longest sleep between two attempts, whatever the backoff says
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Retry policy: `max` extra attempts, `delay * backoff^(attempt-1)` between them
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryPolicy {
    pub max: u32,
    pub delay: Duration,
    pub backoff: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max: 0,
            delay: Duration::ZERO,
            backoff: 1.0,
        }
    }
}

impl RetryPolicy {
    pub fn total_attempts(&self) -> u32 {
        self.max + 1
    }

    /// Sleep before the attempt following `attempt` (1-based), capped at
    /// [`MAX_RETRY_DELAY`]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if self.delay.is_zero() {
            return Duration::ZERO;
        }
        let exp = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.delay.as_secs_f64() * self.backoff.powi(exp);
        if secs.is_nan() {
            return self.delay.min(MAX_RETRY_DELAY);
        }
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_RETRY_DELAY)
            .min(MAX_RETRY_DELAY)
    }
}

/// Named regex extraction over a step's stdout; group 1 becomes the value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRule {
    pub regex: String,
}

/// One unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub name: String,
    pub run: String,
    pub target: Target,
    pub timeout: Option<Duration>,
    pub env: BTreeMap<String, String>,
    pub needs: Vec<String>,
    pub if_expr: Option<String>,
    pub retries: RetryPolicy,
    pub continue_on_error: bool,
    pub capture: BTreeMap<String, CaptureRule>,
    pub cwd: Option<String>,
    pub mask: Vec<String>,
}

impl Step {
    /// Minimal step, mostly for tests and programmatic workflows
    pub fn new(name: impl Into<String>, run: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run: run.into(),
            target: Target::Auto,
            timeout: None,
            env: BTreeMap::new(),
            needs: Vec::new(),
            if_expr: None,
            retries: RetryPolicy::default(),
            continue_on_error: false,
            capture: BTreeMap::new(),
            cwd: None,
            mask: Vec::new(),
        }
    }

    pub fn remote_alias(&self) -> Option<&str> {
        match &self.target {
            Target::Remote(alias) => Some(alias),
            _ => None,
        }
    }

    /// Stable hash over the normalized step fields
    pub fn fingerprint(&self) -> String {
        let capture: BTreeMap<&str, &str> = self
            .capture
            .iter()
            .map(|(k, rule)| (k.as_str(), rule.regex.as_str()))
            .collect();
        let normalized = serde_json::json!({
            "name": self.name,
            "run": self.run,
            "target": self.target.to_string(),
            "timeout_ms": self.timeout.map(|t| t.as_millis() as u64),
            "env": self.env,
            "needs": self.needs,
            "if": self.if_expr,
            "retries": {
                "max": self.retries.max,
                "delay_ms": self.retries.delay.as_millis() as u64,
                "backoff": self.retries.backoff,
            },
            "continue_on_error": self.continue_on_error,
            "capture": capture,
            "cwd": self.cwd,
            "mask": self.mask,
        });
        hex::encode(Sha256::digest(normalized.to_string().as_bytes()))
    }
}

/// Where a workflow came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub path: PathBuf,
    pub sha256: String,
}

/// A validated workflow; list order is execution order
#[derive(Debug, Clone, PartialEq)]
pub struct Workflow {
    pub name: String,
    pub steps: Vec<Step>,
    pub env: BTreeMap<String, String>,
    pub secrets_from: Option<PathBuf>,
    pub source: Option<Provenance>,
}

/// Reference to a step, by name or by 1-based position
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepRef {
    ByName(String),
    ByIndex(usize),
}

impl FromStr for StepRef {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(match s.parse::<usize>() {
            Ok(index) => Self::ByIndex(index),
            Err(_) => Self::ByName(s.to_string()),
        })
    }
}

impl fmt::Display for StepRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByName(name) => write!(f, "{}", name),
            Self::ByIndex(index) => write!(f, "#{}", index),
        }
    }
}

// --- raw document shapes ---

#[derive(Debug, Deserialize)]
struct RawWorkflow {
    name: Option<Value>,
    env: Option<BTreeMap<String, Value>>,
    secrets_from: Option<String>,
    steps: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct RawRetries {
    max: Option<u32>,
    delay: Option<Value>,
    backoff: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    name: Option<Value>,
    run: Option<String>,
    target: Option<String>,
    timeout: Option<Value>,
    env: Option<BTreeMap<String, Value>>,
    needs: Option<Vec<Value>>,
    #[serde(rename = "if")]
    if_expr: Option<String>,
    retries: Option<RawRetries>,
    continue_on_error: Option<bool>,
    capture: Option<BTreeMap<String, CaptureRule>>,
    cwd: Option<String>,
    mask: Option<Vec<Value>>,
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn string_map(
    raw: Option<BTreeMap<String, Value>>,
    what: &str,
) -> Result<BTreeMap<String, String>, WorkflowError> {
    raw.unwrap_or_default()
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| match scalar_string(&v) {
            Some(s) => Ok((k, s)),
            None => Err(WorkflowError::Invalid(format!(
                "{}: value of '{}' must be a scalar",
                what, k
            ))),
        })
        .collect()
}

fn duration_regex() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r"^(\d+(?:\.\d+)?)(ms|s|m)?$").expect("duration pattern"))
}

/// Seconds spelled by `s`; zero when it is not a duration
fn duration_secs(s: &str) -> f64 {
    let s = s.trim().to_ascii_lowercase();
    let secs = match duration_regex().captures(&s) {
        Some(caps) => {
            let value: f64 = caps[1].parse().unwrap_or(0.0);
            match caps.get(2).map(|m| m.as_str()) {
                Some("ms") => value / 1000.0,
                Some("m") => value * 60.0,
                _ => value,
            }
        }
        None => s.parse::<f64>().unwrap_or(0.0),
    };
    if secs.is_finite() && secs > 0.0 {
        secs
    } else {
        0.0
    }
}

/// `"250ms"`, `"2s"`, `"1m"`, bare number = seconds; `None` when the value
/// does not fit in a `Duration`, zero for anything that is not a duration
pub fn parse_duration_checked(s: &str) -> Option<Duration> {
    Duration::try_from_secs_f64(duration_secs(s)).ok()
}

/// Lenient form of [`parse_duration_checked`]: out-of-range values are zero
pub fn parse_duration(s: &str) -> Duration {
    parse_duration_checked(s).unwrap_or(Duration::ZERO)
}

fn parse_seconds(value: &Value, step: &str, field: &str) -> Result<Duration, WorkflowError> {
    let too_large = || {
        WorkflowError::Invalid(format!("{} of step '{}' is out of range", field, step))
    };
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(secs) if secs.is_finite() && secs >= 0.0 => {
                Duration::try_from_secs_f64(secs).map_err(|_| too_large())
            }
            _ => Err(WorkflowError::Invalid(format!(
                "{} of step '{}' must be a non-negative number of seconds",
                field, step
            ))),
        },
        Value::String(s) => parse_duration_checked(s).ok_or_else(too_large),
        Value::Null => Ok(Duration::ZERO),
        _ => Err(WorkflowError::Invalid(format!(
            "{} of step '{}' must be seconds or a duration string like '10s', '250ms', '1m'",
            field, step
        ))),
    }
}

impl Step {
    fn from_raw(raw: RawStep, position: usize) -> Result<Self, WorkflowError> {
        let name = raw
            .name
            .as_ref()
            .and_then(scalar_string)
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("step_{}", position));

        let run = raw.run.unwrap_or_default();
        if run.trim().is_empty() {
            return Err(WorkflowError::Invalid(format!(
                "step '{}' requires a non-empty 'run'",
                name
            )));
        }

        let target = match raw.target {
            None => Target::Auto,
            Some(t) => t.parse().map_err(|_| WorkflowError::InvalidTarget {
                step: name.clone(),
                target: t.clone(),
            })?,
        };

        let timeout = match &raw.timeout {
            None => None,
            Some(Value::Number(n)) if n.as_f64().map_or(true, |v| v <= 0.0) => {
                return Err(WorkflowError::Invalid(format!(
                    "timeout of step '{}' must be positive",
                    name
                )))
            }
            Some(v) => Some(parse_seconds(v, &name, "timeout")?).filter(|d| !d.is_zero()),
        };

        let mut needs = Vec::new();
        for dep in raw.needs.unwrap_or_default() {
            let dep = scalar_string(&dep).ok_or_else(|| {
                WorkflowError::Invalid(format!("needs of step '{}' must be step names", name))
            })?;
            if !needs.contains(&dep) {
                needs.push(dep);
            }
        }

        let retries = match raw.retries {
            None => RetryPolicy::default(),
            Some(r) => RetryPolicy {
                max: r.max.unwrap_or(0),
                delay: match &r.delay {
                    Some(v) => parse_seconds(v, &name, "retries.delay")?,
                    None => Duration::ZERO,
                },
                backoff: r
                    .backoff
                    .filter(|b| b.is_finite() && *b > 0.0)
                    .unwrap_or(1.0),
            },
        };

        let mask = raw
            .mask
            .unwrap_or_default()
            .iter()
            .filter_map(scalar_string)
            .collect();

        Ok(Self {
            env: string_map(raw.env, &format!("env of step '{}'", name))?,
            name,
            run,
            target,
            timeout,
            needs,
            if_expr: raw.if_expr.filter(|e| !e.trim().is_empty()),
            retries,
            continue_on_error: raw.continue_on_error.unwrap_or(false),
            capture: raw.capture.unwrap_or_default(),
            cwd: raw.cwd,
            mask,
        })
    }
}

impl Workflow {
    /// Load workflow from YAML file
    pub fn from_file(path: &Path) -> Result<Self, WorkflowError> {
        let content = std::fs::read_to_string(path).map_err(|source| WorkflowError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut workflow = Self::from_yaml_str(&content)?;
        workflow.source = Some(Provenance {
            path: path.to_path_buf(),
            sha256: hex::encode(Sha256::digest(content.as_bytes())),
        });
        Ok(workflow)
    }

    /// Parse and validate a workflow document
    pub fn from_yaml_str(content: &str) -> Result<Self, WorkflowError> {
        let doc: Value = serde_yaml::from_str(content)?;
        if !doc.is_mapping() {
            return Err(WorkflowError::Invalid(
                "workflow document must be a mapping at the top level".to_string(),
            ));
        }
        let raw: RawWorkflow = serde_yaml::from_value(doc)?;

        let raw_steps = raw.steps.unwrap_or_default();
        if raw_steps.is_empty() {
            return Err(WorkflowError::Invalid(
                "workflow must have a non-empty 'steps' list".to_string(),
            ));
        }

        let mut steps = Vec::with_capacity(raw_steps.len());
        let mut seen = HashSet::new();
        for (i, item) in raw_steps.into_iter().enumerate() {
            let position = i + 1;
            if !item.is_mapping() {
                return Err(WorkflowError::Invalid(format!(
                    "step #{} must be a mapping",
                    position
                )));
            }
            let step = Step::from_raw(serde_yaml::from_value(item)?, position)?;
            if !seen.insert(step.name.clone()) {
                return Err(WorkflowError::DuplicateStep(step.name));
            }
            steps.push(step);
        }

        for step in &steps {
            for dep in &step.needs {
                if !seen.contains(dep) {
                    return Err(WorkflowError::UnknownDependency {
                        step: step.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        Ok(Self {
            name: raw
                .name
                .as_ref()
                .and_then(scalar_string)
                .unwrap_or_else(|| "unnamed".to_string()),
            steps,
            env: string_map(raw.env, "root env")?,
            secrets_from: raw.secrets_from.map(PathBuf::from),
            source: None,
        })
    }

    /// Get step by name
    pub fn get_step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Resolve a step reference to a 0-based position
    pub fn resolve(&self, step: &StepRef) -> Result<usize, WorkflowError> {
        match step {
            StepRef::ByName(name) => self.steps.iter().position(|s| &s.name == name),
            StepRef::ByIndex(index) => index
                .checked_sub(1)
                .filter(|i| *i < self.steps.len()),
        }
        .ok_or_else(|| WorkflowError::UnknownStep(step.to_string()))
    }

    /// Same workflow restricted to the steps `keep` accepts, order preserved
    pub fn subset(&self, label: &str, keep: impl Fn(&Step) -> bool) -> Self {
        Self {
            name: format!("{} ({})", self.name, label),
            steps: self.steps.iter().filter(|s| keep(s)).cloned().collect(),
            env: self.env.clone(),
            secrets_from: self.secrets_from.clone(),
            source: self.source.clone(),
        }
    }

    /// Same workflow starting at `from`
    pub fn starting_at(&self, from: &StepRef) -> Result<Self, WorkflowError> {
        let start = self.resolve(from)?;
        let label = format!("from {}", from);
        Ok(self.subset(&label, |s| {
            self.steps
                .iter()
                .position(|x| x.name == s.name)
                .is_some_and(|i| i >= start)
        }))
    }

    /// Expand secrets_from, `~` included
    pub fn secrets_path(&self) -> Option<PathBuf> {
        self.secrets_from.as_deref().map(expand_tilde)
    }
}

/// `~/x` to `$HOME/x`
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name: sample
env:
  FOO: bar
  PORT: 8080
steps:
  - name: build
    run: echo "version: 1.2.3"
    timeout: 2m
    capture:
      version: { regex: 'version: (\S+)' }
  - run: echo second
    target: container
    needs: [build]
    retries: { max: 2, delay: 1s, backoff: 2 }
    continue_on_error: true
    mask: [hunter2]
  - name: deploy
    target: remote:prod
    if: test -n "$FOO"
    timeout: 30
    run: |
      echo one
      echo two
"#;

    #[test]
    fn test_parse_workflow() {
        let wf = Workflow::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(wf.name, "sample");
        assert_eq!(wf.env["PORT"], "8080");
        assert_eq!(wf.steps.len(), 3);

        let build = &wf.steps[0];
        assert_eq!(build.timeout, Some(Duration::from_secs(120)));
        assert_eq!(build.capture["version"].regex, r"version: (\S+)");

        let second = &wf.steps[1];
        assert_eq!(second.name, "step_2");
        assert_eq!(second.target, Target::Container);
        assert_eq!(second.needs, vec!["build"]);
        assert_eq!(second.retries.max, 2);
        assert_eq!(second.retries.delay, Duration::from_secs(1));
        assert!(second.continue_on_error);

        let deploy = &wf.steps[2];
        assert_eq!(deploy.remote_alias(), Some("prod"));
        assert_eq!(deploy.timeout, Some(Duration::from_secs(30)));
        assert!(deploy.if_expr.is_some());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("250ms"), Duration::from_millis(250));
        assert_eq!(parse_duration("2s"), Duration::from_secs(2));
        assert_eq!(parse_duration("1m"), Duration::from_secs(60));
        assert_eq!(parse_duration("5"), Duration::from_secs(5));
        assert_eq!(parse_duration("soon"), Duration::ZERO);
    }

    #[test]
    fn test_invalid_timeout_string_is_lenient() {
        let yaml = "steps:\n  - run: echo hi\n    timeout: forever\n";
        let wf = Workflow::from_yaml_str(yaml).unwrap();
        assert_eq!(wf.steps[0].timeout, None);
    }

    #[test]
    fn test_out_of_range_durations() {
        assert_eq!(parse_duration_checked("99999999999999999999m"), None);
        assert_eq!(parse_duration("99999999999999999999m"), Duration::ZERO);

        for yaml in [
            "steps:\n  - run: echo hi\n    timeout: '99999999999999999999m'\n",
            "steps:\n  - run: echo hi\n    timeout: 1e30\n",
            "steps:\n  - run: echo hi\n    retries: { max: 1, delay: 1e30 }\n",
            "steps:\n  - run: echo hi\n    retries: { max: 1, delay: '99999999999999999999m' }\n",
        ] {
            assert!(
                matches!(Workflow::from_yaml_str(yaml), Err(WorkflowError::Invalid(_))),
                "{}",
                yaml
            );
        }
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let policy = RetryPolicy {
            max: 100,
            delay: Duration::from_secs(1),
            backoff: 1e10,
        };
        assert_eq!(policy.delay_after(3), MAX_RETRY_DELAY);
        assert_eq!(policy.delay_after(u32::MAX), MAX_RETRY_DELAY);

        let idle = RetryPolicy {
            delay: Duration::ZERO,
            backoff: f64::INFINITY,
            ..policy
        };
        assert_eq!(idle.delay_after(2), Duration::ZERO);
    }

    #[test]
    fn test_retry_delays() {
        let policy = RetryPolicy {
            max: 2,
            delay: Duration::from_secs(1),
            backoff: 2.0,
        };
        assert_eq!(policy.total_attempts(), 3);
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
    }

    #[test]
    fn test_rejects_bad_documents() {
        assert!(matches!(
            Workflow::from_yaml_str("- run: ls"),
            Err(WorkflowError::Invalid(_))
        ));
        assert!(matches!(
            Workflow::from_yaml_str("name: x\nsteps: []"),
            Err(WorkflowError::Invalid(_))
        ));
        assert!(matches!(
            Workflow::from_yaml_str("steps:\n  - name: a\n    run: ''"),
            Err(WorkflowError::Invalid(_))
        ));
        assert!(matches!(
            Workflow::from_yaml_str("steps:\n  - run: ls\n    target: docker"),
            Err(WorkflowError::InvalidTarget { .. })
        ));
        assert!(matches!(
            Workflow::from_yaml_str("steps:\n  - run: ls\n    target: 'remote:'"),
            Err(WorkflowError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn test_duplicate_names_after_defaulting() {
        let yaml = "steps:\n  - name: step_2\n    run: ls\n  - run: pwd\n";
        assert!(matches!(
            Workflow::from_yaml_str(yaml),
            Err(WorkflowError::DuplicateStep(name)) if name == "step_2"
        ));
    }

    #[test]
    fn test_unknown_dependency() {
        let yaml = "steps:\n  - name: a\n    run: ls\n    needs: [b]\n";
        assert!(matches!(
            Workflow::from_yaml_str(yaml),
            Err(WorkflowError::UnknownDependency { dependency, .. }) if dependency == "b"
        ));
    }

    #[test]
    fn test_forward_dependency_is_allowed() {
        let yaml = "steps:\n  - name: a\n    run: ls\n    needs: [b]\n  - name: b\n    run: ls\n";
        assert!(Workflow::from_yaml_str(yaml).is_ok());
    }

    #[test]
    fn test_step_ref_resolution() {
        let wf = Workflow::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(wf.resolve(&"deploy".parse().unwrap()).unwrap(), 2);
        assert_eq!(wf.resolve(&StepRef::ByIndex(1)).unwrap(), 0);
        assert!(wf.resolve(&StepRef::ByIndex(0)).is_err());
        assert!(wf.resolve(&StepRef::ByName("nope".into())).is_err());

        let tail = wf.starting_at(&StepRef::ByIndex(2)).unwrap();
        assert_eq!(tail.steps.len(), 2);
        assert_eq!(tail.steps[0].name, "step_2");
    }

    #[test]
    fn test_fingerprint_tracks_changes() {
        let wf = Workflow::from_yaml_str(SAMPLE).unwrap();
        let before = wf.steps[0].fingerprint();
        assert_eq!(before, wf.steps[0].clone().fingerprint());

        let mut changed = wf.steps[0].clone();
        changed.run.push_str(" && true");
        assert_ne!(before, changed.fingerprint());
    }

    #[test]
    fn test_from_file_records_provenance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow.yml");
        std::fs::write(&path, SAMPLE).unwrap();
        let wf = Workflow::from_file(&path).unwrap();
        let source = wf.source.unwrap();
        assert_eq!(source.path, path);
        assert_eq!(source.sha256.len(), 64);
    }
}
