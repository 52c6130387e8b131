//! Risk classifier - ordered heuristics over a step's script text

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Potential impact of a script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    ReadOnly,
    Mutating,
    Dangerous,
}

impl RiskTier {
    pub const ALL: [RiskTier; 3] = [RiskTier::ReadOnly, RiskTier::Mutating, RiskTier::Dangerous];

    /// Key used in the limits configuration
    pub fn key(&self) -> &'static str {
        match self {
            Self::ReadOnly => "read_only",
            Self::Mutating => "mutating",
            Self::Dangerous => "dangerous",
        }
    }

    /// Human label for previews and status lines
    pub fn label(&self) -> &'static str {
        match self {
            Self::ReadOnly => "read-only",
            Self::Mutating => "mutating",
            Self::Dangerous => "dangerous",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

const DANGEROUS_MARKERS: &[&str] = &[
    r"\brm\s+-rf\s+/(\s|\*|$)",
    r"\breboot\b",
    r"\bshutdown\b",
    r"\bmkfs\b",
    r"\bsoftwareupdate\b",
    r"(?m)^\s*sudo\b",
];

// `regex` has no lookahead; `>` targets are checked separately in `redirects_to_file`.
const WRITE_LIKE: &[&str] = &[
    r"\btee\b",
    r"\btouch\b",
    r"\btruncate\b",
    r"\bmkdir\b",
    r"\brmdir\b",
    r"\bmv\b",
    r"\bcp\b",
    r"\bsed\b.*\s-i\b",
    r"\bchmod\b",
    r"\bchown\b",
    r"\bln\b",
    r"\bwget\b.*\s-(O|-output-document)\b",
    r"\bcurl\b.*\s-(o|O|-output)\b",
    r"\bapt(-get)?\b",
    r"\bdpkg\b",
    r"\byum\b",
    r"\bdnf\b",
    r"\bpip3?\b",
    r"\bdd\b",
    r"\bmkfs\b",
    r"\bu?mount\b",
    r"\brm\b",
    r"(?m)^\s*sudo\b",
    r"\bsoftwareupdate\b",
    r"\breboot\b",
];

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){}", p)).expect("built-in risk pattern"))
        .collect()
}

fn dangerous_patterns() -> &'static [Regex] {
    static CELL: OnceLock<Vec<Regex>> = OnceLock::new();
    CELL.get_or_init(|| compile(DANGEROUS_MARKERS))
}

fn write_like_patterns() -> &'static [Regex] {
    static CELL: OnceLock<Vec<Regex>> = OnceLock::new();
    CELL.get_or_init(|| compile(WRITE_LIKE))
}

fn redirect_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r"(\d?)>>?\s*(&?\S*)").expect("built-in redirect pattern"))
}

/// Output redirection into anything other than /dev/null or a descriptor
fn redirects_to_file(script: &str) -> bool {
    redirect_pattern().captures_iter(script).any(|caps| {
        let target = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let fd = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        if target.starts_with('&') || target.trim_start_matches('/').starts_with("dev/null") {
            return false;
        }
        // `2>` alone is stderr plumbing, `2>file` still writes
        !(fd == "2" && target.is_empty())
    })
}

/// Whether the script looks like it writes to the filesystem or system state
pub fn is_write_like(script: &str) -> bool {
    let script = script.trim();
    redirects_to_file(script) || write_like_patterns().iter().any(|re| re.is_match(script))
}

/// Whether any line starts with a `sudo` invocation
pub fn needs_sudo(script: &str) -> bool {
    script
        .lines()
        .any(|line| line.trim_start().to_ascii_lowercase().starts_with("sudo") && {
            let rest = &line.trim_start()[4..];
            rest.is_empty() || rest.starts_with(char::is_whitespace)
        })
}

/// Classify a script; first match wins
pub fn classify(script: &str) -> RiskTier {
    let body = script.trim();
    if dangerous_patterns().iter().any(|re| re.is_match(body)) {
        return RiskTier::Dangerous;
    }
    if is_write_like(body) {
        return RiskTier::Mutating;
    }
    RiskTier::ReadOnly
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dangerous_markers() {
        assert_eq!(classify("rm -rf /"), RiskTier::Dangerous);
        assert_eq!(classify("echo hi\nsudo apt-get update"), RiskTier::Dangerous);
        assert_eq!(classify("shutdown -h now"), RiskTier::Dangerous);
        assert_eq!(classify("mkfs.ext4 /dev/sdb1"), RiskTier::Dangerous);
    }

    #[test]
    fn test_mutating() {
        assert_eq!(classify("echo hi > out.txt"), RiskTier::Mutating);
        assert_eq!(classify("echo hi >> out.txt"), RiskTier::Mutating);
        assert_eq!(classify("mkdir -p build"), RiskTier::Mutating);
        assert_eq!(classify("sed -i 's/a/b/' file"), RiskTier::Mutating);
        assert_eq!(classify("curl -o x.tar.gz https://example.com/x"), RiskTier::Mutating);
        assert_eq!(classify("pip install requests"), RiskTier::Mutating);
        assert_eq!(classify("rm build.log"), RiskTier::Mutating);
    }

    #[test]
    fn test_read_only() {
        assert_eq!(classify("ls -la"), RiskTier::ReadOnly);
        assert_eq!(classify("cat /etc/hosts > /dev/null"), RiskTier::ReadOnly);
        assert_eq!(classify("make check 2>&1"), RiskTier::ReadOnly);
        assert_eq!(classify("echo ${{ env.FOO }}"), RiskTier::ReadOnly);
    }

    #[test]
    fn test_sudo_detection() {
        assert!(needs_sudo("  sudo systemctl restart nginx"));
        assert!(!needs_sudo("echo sudo"));
        assert!(!needs_sudo("sudoku --solve"));
    }
}
