//! Check installed Python packages against a requirements file.

use super::{split_command, CommandRunner, ToolError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

static VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)^\s*v?
        (?:(\d+)!)?
        (\d+(?:\.\d+)*)
        (?:[-_.]?(a|alpha|b|beta|c|rc|pre|preview)[-_.]?(\d*))?
        (?:-(\d+)|[-_.]?(?:post|rev|r)[-_.]?(\d*))?
        (?:[-_.]?dev[-_.]?(\d*))?
        (?:\+[a-z0-9.]+)?
        \s*$",
    )
    .expect("static regex")
});

static REQUIREMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9][A-Za-z0-9._-]*)\s*(?:\[[^\]]*\])?\s*(.*)$").expect("static regex")
});

static SPECIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(~=|===|==|!=|<=|>=|<|>)\s*([A-Za-z0-9._+!*-]+)$").expect("static regex")
});

/// A release version, compared the way pip compares them.
#[derive(Debug, Clone)]
pub struct Version {
    epoch: u64,
    release: Vec<u64>,
    /// (0 = a, 1 = b, 2 = rc, number)
    pre: Option<(u8, u64)>,
    post: Option<u64>,
    dev: Option<u64>,
}

impl Version {
    pub fn release(&self) -> &[u64] {
        &self.release
    }

    fn trimmed_release(&self) -> &[u64] {
        let end = self.release.iter().rposition(|&n| n != 0).map_or(0, |i| i + 1);
        &self.release[..end]
    }

    /// dev < a < b < rc < final < post
    fn sort_key(&self) -> (u64, &[u64], (u8, u64), Option<u64>, (bool, u64)) {
        let pre = match (self.pre, self.post, self.dev) {
            (Some((kind, n)), _, _) => (kind + 1, n),
            (None, None, Some(_)) => (0, 0),
            _ => (4, 0),
        };
        (
            self.epoch,
            self.trimmed_release(),
            pre,
            self.post,
            (self.dev.is_none(), self.dev.unwrap_or(0)),
        )
    }

    /// Whether the release starts with `prefix`, zero-padded.
    fn has_prefix(&self, prefix: &[u64]) -> bool {
        prefix
            .iter()
            .enumerate()
            .all(|(i, &n)| self.release.get(i).copied().unwrap_or(0) == n)
    }
}

impl FromStr for Version {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = VERSION
            .captures(s)
            .ok_or_else(|| ToolError::parse("version", s))?;
        let number = |i: usize| -> Option<u64> { caps.get(i).map(|m| m.as_str().parse().unwrap_or(0)) };
        let release = caps[2]
            .split('.')
            .map(|n| n.parse().map_err(|_| ToolError::parse("version", s)))
            .collect::<Result<Vec<u64>, _>>()?;
        let pre = caps.get(3).map(|kind| {
            let kind = match kind.as_str().to_lowercase().as_str() {
                "a" | "alpha" => 0,
                "b" | "beta" => 1,
                _ => 2,
            };
            (kind, number(4).unwrap_or(0))
        });
        Ok(Self {
            epoch: number(1).unwrap_or(0),
            release,
            pre,
            post: number(5).or_else(|| number(6)),
            dev: number(7),
        })
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Compatible,
    Arbitrary,
    Equal,
    NotEqual,
    LessEqual,
    GreaterEqual,
    Less,
    Greater,
}

#[derive(Debug, Clone)]
struct Specifier {
    op: Operator,
    version: String,
}

impl Specifier {
    fn parse(text: &str) -> Option<Self> {
        let caps = SPECIFIER.captures(text.trim())?;
        let op = match &caps[1] {
            "~=" => Operator::Compatible,
            "===" => Operator::Arbitrary,
            "==" => Operator::Equal,
            "!=" => Operator::NotEqual,
            "<=" => Operator::LessEqual,
            ">=" => Operator::GreaterEqual,
            "<" => Operator::Less,
            _ => Operator::Greater,
        };
        let version = caps[2].to_string();
        // Only == and != take a trailing wildcard
        let wildcard = version.ends_with(".*");
        if wildcard && !matches!(op, Operator::Equal | Operator::NotEqual) {
            return None;
        }
        if op != Operator::Arbitrary && version.trim_end_matches(".*").parse::<Version>().is_err() {
            return None;
        }
        if op == Operator::Compatible && !version.contains('.') {
            return None;
        }
        Some(Self { op, version })
    }

    fn contains(&self, raw: &str, installed: &Version) -> bool {
        if self.op == Operator::Arbitrary {
            return raw.trim().eq_ignore_ascii_case(&self.version);
        }
        if let Some(prefix) = self.version.strip_suffix(".*") {
            let Ok(prefix) = prefix.parse::<Version>() else {
                return false;
            };
            let matched = installed.epoch == prefix.epoch && installed.has_prefix(prefix.release());
            return matched == (self.op == Operator::Equal);
        }
        let Ok(spec) = self.version.parse::<Version>() else {
            return false;
        };
        match self.op {
            Operator::Equal => *installed == spec,
            Operator::NotEqual => *installed != spec,
            Operator::LessEqual => *installed <= spec,
            Operator::GreaterEqual => *installed >= spec,
            Operator::Less => *installed < spec,
            Operator::Greater => *installed > spec,
            Operator::Compatible => {
                let prefix = &spec.release()[..spec.release().len() - 1];
                *installed >= spec && installed.has_prefix(prefix)
            }
            Operator::Arbitrary => false,
        }
    }
}

/// One package requirement line.
#[derive(Debug, Clone)]
pub struct Requirement {
    pub name: String,
    specifiers: Vec<Specifier>,
}

impl Requirement {
    /// Parse `name[extras] spec, spec ; marker`. Markers are ignored.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.split(';').next().unwrap_or("").trim();
        let caps = REQUIREMENT.captures(line)?;
        let specs = caps[2].trim();
        let specifiers = if specs.is_empty() {
            Vec::new()
        } else {
            specs
                .trim_start_matches('(')
                .trim_end_matches(')')
                .split(',')
                .map(Specifier::parse)
                .collect::<Option<Vec<_>>>()?
        };
        Some(Self {
            name: caps[1].to_string(),
            specifiers,
        })
    }

    /// Whether `raw` satisfies every specifier. Unparseable versions only
    /// satisfy `===`.
    pub fn is_satisfied_by(&self, raw: &str) -> Result<bool, ToolError> {
        let installed = match raw.parse::<Version>() {
            Ok(v) => v,
            Err(e) if self.specifiers.iter().all(|s| s.op == Operator::Arbitrary) => {
                debug!("{e}");
                return Ok(self.specifiers.iter().all(|s| s.version == raw.trim()));
            }
            Err(e) => return Err(e),
        };
        Ok(self.specifiers.iter().all(|s| s.contains(raw, &installed)))
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for (i, spec) in self.specifiers.iter().enumerate() {
            let op = match spec.op {
                Operator::Compatible => "~=",
                Operator::Arbitrary => "===",
                Operator::Equal => "==",
                Operator::NotEqual => "!=",
                Operator::LessEqual => "<=",
                Operator::GreaterEqual => ">=",
                Operator::Less => "<",
                Operator::Greater => ">",
            };
            write!(f, "{}{op}{}", if i == 0 { "" } else { "," }, spec.version)?;
        }
        Ok(())
    }
}

/// Normalized project name: lowercase, runs of `-_.` folded to `-`.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut separator = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            separator = true;
            continue;
        }
        if separator && !out.is_empty() {
            out.push('-');
        }
        separator = false;
        out.push(c.to_ascii_lowercase());
    }
    out
}

#[derive(Debug, Deserialize)]
struct PipPackage {
    name: String,
    version: String,
}

/// Installed packages by normalized name, from
/// `<python> -m pip list --format=json`.
pub fn pip_list(runner: &dyn CommandRunner, python: &str) -> Result<HashMap<String, String>, ToolError> {
    let mut argv = split_command(python);
    argv.extend(["-m", "pip", "list", "--format=json"].map(String::from));
    let output = runner.run(&argv)?;
    if !output.success() {
        return Err(ToolError::CommandFailed {
            command: argv.join(" "),
            code: output.code.unwrap_or(-1),
            output: output.combined(),
        });
    }
    let packages: Vec<PipPackage> = serde_json::from_str(output.stdout.trim())
        .map_err(|e| ToolError::parse("pip list output", e.to_string()))?;
    Ok(packages
        .into_iter()
        .map(|p| (normalize_name(&p.name), p.version))
        .collect())
}

fn include_path(parent: &Path, include: &str) -> PathBuf {
    let include = PathBuf::from(include);
    if include.is_relative() {
        if let Some(dir) = parent.parent() {
            let sibling = dir.join(&include);
            if sibling.exists() {
                return sibling;
            }
        }
    }
    include
}

fn check_file(
    path: &Path,
    installed: &HashMap<String, String>,
    problems: &mut Vec<String>,
) -> Result<(), ToolError> {
    let content = std::fs::read_to_string(path).map_err(|e| ToolError::io(path, e))?;
    for line in content.lines() {
        let requirement = line.trim();
        if requirement.is_empty() || requirement.starts_with('#') || requirement.contains("//") {
            continue;
        }
        if requirement.starts_with('-') {
            if let Some((flag, arg)) = requirement.split_once(char::is_whitespace) {
                if matches!(flag, "-r" | "--requirement") {
                    check_file(&include_path(path, arg.trim()), installed, problems)?;
                }
            }
            continue;
        }

        let Some(req) = Requirement::parse(requirement) else {
            problems.push(format!("Invalid requirement format '{requirement}'"));
            continue;
        };
        let Some(version) = installed.get(&normalize_name(&req.name)) else {
            problems.push(format!("Package '{requirement}' is not installed"));
            continue;
        };
        match req.is_satisfied_by(version) {
            Ok(true) => {}
            Ok(false) => problems.push(format!(
                "Package '{}' version '{version}' does not meet the requirement: {requirement}",
                req.name
            )),
            Err(_) => problems.push(format!("Invalid version for package '{}'", req.name)),
        }
    }
    Ok(())
}

/// Check `requirements_file` (and its `-r` includes) against `installed`.
/// Returns one message per unmet requirement; empty means all met.
/// URL requirements are not checked.
pub fn check_requirements(
    requirements_file: &Path,
    installed: &HashMap<String, String>,
) -> Result<Vec<String>, ToolError> {
    let mut problems = Vec::new();
    check_file(requirements_file, installed, &mut problems)?;
    Ok(problems)
}
