//! Runtime context - `${{ a.b.c }}` templating, env merge, output capture, masking

use super::result::StepStatus;
use super::workflow::{CaptureRule, Step};
use regex::{Regex, RegexBuilder};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

/// Replacement for masked literals
pub const MASK: &str = "***";

/// Literals shorter than this are never masked
const MIN_MASK_LEN: usize = 3;

fn template_regex() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| {
        Regex::new(r"\$\{\{\s*([a-zA-Z0-9_.\-]+)\s*\}\}").expect("template pattern")
    })
}

/// `{workflow:{name}, env, secrets, steps:{name:{status, outputs}}}`
///
/// Lives for one run; only the scheduler registers steps into it.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    tree: Value,
    secrets: BTreeMap<String, String>,
}

impl RuntimeContext {
    pub fn new(
        workflow: &str,
        env: &BTreeMap<String, String>,
        secrets: BTreeMap<String, String>,
    ) -> Self {
        Self {
            tree: json!({
                "workflow": { "name": workflow },
                "env": env,
                "secrets": secrets,
                "steps": {},
            }),
            secrets,
        }
    }

    pub fn secrets(&self) -> &BTreeMap<String, String> {
        &self.secrets
    }

    /// Record a finished step so later templates can see it
    pub fn register_step(
        &mut self,
        name: &str,
        status: StepStatus,
        outputs: &BTreeMap<String, String>,
    ) {
        if let Some(steps) = self.tree.get_mut("steps").and_then(Value::as_object_mut) {
            steps.insert(
                name.to_string(),
                json!({ "status": status.to_string(), "outputs": outputs }),
            );
        }
    }

    /// Dotted lookup; anything missing renders as an empty string
    pub fn lookup(&self, path: &str) -> String {
        let mut cur = &self.tree;
        for part in path.split('.') {
            match cur.get(part) {
                Some(next) => cur = next,
                None => return String::new(),
            }
        }
        match cur {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    pub fn render(&self, text: &str) -> String {
        template_regex()
            .replace_all(text, |caps: &regex::Captures| self.lookup(&caps[1]))
            .into_owned()
    }

    pub fn render_map(&self, map: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        map.iter()
            .map(|(k, v)| (k.clone(), self.render(v)))
            .collect()
    }

    /// Root env under step env, rendered; secrets fill keys not set explicitly
    pub fn merged_env(
        &self,
        root: &BTreeMap<String, String>,
        step: &Step,
    ) -> BTreeMap<String, String> {
        let mut merged = root.clone();
        merged.extend(step.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        let mut merged = self.render_map(&merged);
        for (k, v) in &self.secrets {
            merged.entry(k.clone()).or_insert_with(|| v.clone());
        }
        merged
    }

    /// Execution copy of `step` with every template rendered
    pub fn render_step(&self, step: &Step, env: BTreeMap<String, String>) -> Step {
        let mut rendered = step.clone();
        rendered.run = self.render(&step.run);
        rendered.if_expr = step.if_expr.as_deref().map(|e| self.render(e));
        rendered.cwd = step.cwd.as_deref().map(|c| self.render(c));
        rendered.mask = step.mask.iter().map(|m| self.render(m)).collect();
        rendered.env = env;
        rendered
    }

    /// Secrets plus the step's own mask list, longest first
    pub fn masks_for(&self, step_mask: &[String]) -> Vec<String> {
        collect_masks(self.secrets.values().chain(step_mask.iter()))
    }
}

/// Dedupe, drop short literals, order longest first
pub fn collect_masks<'a>(values: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    let mut masks: Vec<String> = values
        .into_iter()
        .filter(|v| v.chars().count() >= MIN_MASK_LEN)
        .cloned()
        .collect();
    masks.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    masks.dedup();
    masks
}

/// Replace every mask literal; `masks` must be longest first
pub fn mask_text(text: &str, masks: &[String]) -> String {
    masks
        .iter()
        .fold(text.to_string(), |acc, m| acc.replace(m.as_str(), MASK))
}

/// Search each capture regex over stdout; group 1 of the first match is kept
pub fn capture_outputs(
    rules: &BTreeMap<String, CaptureRule>,
    stdout: &str,
) -> BTreeMap<String, String> {
    let mut outputs = BTreeMap::new();
    if stdout.is_empty() {
        return outputs;
    }
    for (key, rule) in rules {
        let regex = match RegexBuilder::new(&rule.regex).multi_line(true).build() {
            Ok(regex) => regex,
            Err(e) => {
                log::warn!("capture '{}' has an invalid regex: {}", key, e);
                continue;
            }
        };
        if let Some(value) = regex
            .captures(stdout)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
        {
            outputs.insert(key.clone(), value);
        }
    }
    outputs
}

/// Read a secrets mapping; missing or malformed files give an empty map
pub fn load_secrets(path: &Path) -> BTreeMap<String, String> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            log::warn!("secrets file {} not readable: {}", path.display(), e);
            return BTreeMap::new();
        }
    };
    match serde_yaml::from_str::<Option<BTreeMap<String, serde_yaml::Value>>>(&content) {
        Ok(map) => map
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(k, v)| match v {
                serde_yaml::Value::String(s) => Some((k, s)),
                serde_yaml::Value::Number(n) => Some((k, n.to_string())),
                serde_yaml::Value::Bool(b) => Some((k, b.to_string())),
                _ => None,
            })
            .collect(),
        Err(e) => {
            log::warn!("secrets file {} is not a mapping: {}", path.display(), e);
            BTreeMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> RuntimeContext {
        let mut env = BTreeMap::new();
        env.insert("FOO".to_string(), "bar".to_string());
        let mut secrets = BTreeMap::new();
        secrets.insert("TOKEN".to_string(), "s3cr3t-token".to_string());
        RuntimeContext::new("demo", &env, secrets)
    }

    #[test]
    fn test_render_known_and_unknown_paths() {
        let ctx = context();
        assert_eq!(ctx.render("echo ${{ env.FOO }}"), "echo bar");
        assert_eq!(ctx.render("${{workflow.name}}"), "demo");
        assert_eq!(ctx.render("[${{ steps.nope.outputs.x }}]"), "[]");
        assert_eq!(ctx.render("no templates"), "no templates");
    }

    #[test]
    fn test_capture_then_render() {
        let mut ctx = context();
        let mut rules = BTreeMap::new();
        rules.insert(
            "version".to_string(),
            CaptureRule {
                regex: r"^version: (\S+)$".to_string(),
            },
        );
        let outputs = capture_outputs(&rules, "building\nversion: 1.2.3\ndone\n");
        ctx.register_step("build", StepStatus::Ok, &outputs);

        assert_eq!(ctx.render("${{ steps.build.outputs.version }}"), "1.2.3");
        assert_eq!(ctx.render("${{ steps.build.status }}"), "OK");
    }

    #[test]
    fn test_capture_skips_bad_and_missing() {
        let mut rules = BTreeMap::new();
        rules.insert("bad".to_string(), CaptureRule { regex: "(".to_string() });
        rules.insert("absent".to_string(), CaptureRule { regex: "zzz (\\d+)".to_string() });
        assert!(capture_outputs(&rules, "hello").is_empty());
    }

    #[test]
    fn test_merged_env_precedence() {
        let ctx = context();
        let mut root = BTreeMap::new();
        root.insert("A".to_string(), "root".to_string());
        root.insert("B".to_string(), "${{ env.FOO }}".to_string());
        let mut step = Step::new("s", "true");
        step.env.insert("A".to_string(), "step".to_string());
        step.env.insert("TOKEN".to_string(), "explicit".to_string());

        let env = ctx.merged_env(&root, &step);
        assert_eq!(env["A"], "step");
        assert_eq!(env["B"], "bar");
        assert_eq!(env["TOKEN"], "explicit");
    }

    #[test]
    fn test_secrets_fill_missing_env_keys() {
        let ctx = context();
        let env = ctx.merged_env(&BTreeMap::new(), &Step::new("s", "true"));
        assert_eq!(env["TOKEN"], "s3cr3t-token");
    }

    #[test]
    fn test_render_step_leaves_original_untouched() {
        let ctx = context();
        let mut step = Step::new("s", "echo ${{ env.FOO }}");
        step.cwd = Some("/tmp/${{ env.FOO }}".to_string());
        let rendered = ctx.render_step(&step, BTreeMap::new());
        assert_eq!(rendered.run, "echo bar");
        assert_eq!(rendered.cwd.as_deref(), Some("/tmp/bar"));
        assert_eq!(step.run, "echo ${{ env.FOO }}");
    }

    #[test]
    fn test_mask_unchanged_without_secrets() {
        let masks = collect_masks(&["hunter2".to_string()]);
        assert_eq!(mask_text("nothing to hide", &masks), "nothing to hide");
    }

    #[test]
    fn test_mask_longest_first() {
        let values = vec!["abc".to_string(), "abcdef".to_string(), "ab".to_string()];
        let masks = collect_masks(&values);
        assert_eq!(masks, vec!["abcdef".to_string(), "abc".to_string()]);
        assert_eq!(mask_text("token=abcdef;", &masks), "token=***;");
        assert_eq!(mask_text("x abc y", &masks), "x *** y");
    }

    #[test]
    fn test_masks_for_includes_secrets() {
        let ctx = context();
        let masks = ctx.masks_for(&["pw1234".to_string()]);
        assert_eq!(
            mask_text("s3cr3t-token and pw1234", &masks),
            "*** and ***"
        );
    }

    #[test]
    fn test_load_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.yml");
        std::fs::write(&path, "API_KEY: abc123\nPORT: 5432\n").unwrap();
        let secrets = load_secrets(&path);
        assert_eq!(secrets["API_KEY"], "abc123");
        assert_eq!(secrets["PORT"], "5432");

        assert!(load_secrets(&dir.path().join("missing.yml")).is_empty());
    }
}
