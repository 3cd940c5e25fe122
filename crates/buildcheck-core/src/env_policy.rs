//! Child-process environment policy
//!
//! The environment of every build invocation is derived in three fixed
//! layers:
//!
//! 1. the inherited environment, minus variables matching a deny rule
//!    (unless allow-listed);
//! 2. forced variables, which keep the build byproducts legible;
//! 3. caller overrides, applied last so explicit test intent always wins.
//!
//! Name matching is ASCII case-insensitive on every platform.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Which generation of redaction rules to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionMode {
    /// Remove only `CI` and `GITHUB_ACTIONS`.
    Exact,
    /// Remove the documented set of CI/automation names and prefixes.
    #[default]
    Prefix,
}

/// A single deny rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DenyRule {
    /// Matches one variable name.
    Exact(String),
    /// Matches every variable whose name starts with the prefix.
    Prefix(String),
}

impl DenyRule {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            DenyRule::Exact(exact) => name.eq_ignore_ascii_case(exact),
            DenyRule::Prefix(prefix) => name
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix)),
        }
    }
}

const LEGACY_DENY: &[&str] = &["CI", "GITHUB_ACTIONS"];

/// Names that identify a CI host on their own.
const DEFAULT_DENY_NAMES: &[&str] = &[
    "CI",
    "CONTINUOUS_INTEGRATION",
    "TF_BUILD",
    "BUILDKITE",
    "CIRCLECI",
    "TRAVIS",
    "APPVEYOR",
    "JENKINS_URL",
    "TEAMCITY_VERSION",
    "GITLAB_CI",
    "CODEBUILD_BUILD_ID",
];

/// Prefixes owned by CI hosts.
const DEFAULT_DENY_PREFIXES: &[&str] = &[
    "GITHUB_",
    "RUNNER_",
    "ACTIONS_",
    "CI_",
    "GITLAB_",
    "BUILD_",
    "SYSTEM_",
    "AGENT_",
    "RELEASE_",
    "BUILDKITE_",
    "CIRCLE_",
    "TRAVIS_",
    "APPVEYOR_",
    "TEAMCITY_",
    "JENKINS_",
    "BITBUCKET_",
    "CODEBUILD_",
];

/// Variables forced onto every invocation before overrides.
const DEFAULT_FORCED: &[(&str, &str)] = &[
    ("MSBUILDLOGALLENVIRONMENTVARIABLES", "true"),
    ("MSBUILDDISABLENODEREUSE", "1"),
    ("DOTNET_CLI_TELEMETRY_OPTOUT", "1"),
    ("DOTNET_NOLOGO", "1"),
];

/// Environment policy for child processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvPolicy {
    pub mode: RedactionMode,
    pub deny: Vec<DenyRule>,
    /// Names kept even when a deny rule matches them.
    pub allow: BTreeSet<String>,
    pub forced: BTreeMap<String, String>,
}

impl Default for EnvPolicy {
    fn default() -> Self {
        Self::for_mode(RedactionMode::default())
    }
}

impl EnvPolicy {
    /// The documented default rule set for `mode`.
    pub fn for_mode(mode: RedactionMode) -> Self {
        let deny = match mode {
            RedactionMode::Exact => LEGACY_DENY
                .iter()
                .map(|name| DenyRule::Exact(name.to_string()))
                .collect(),
            RedactionMode::Prefix => DEFAULT_DENY_NAMES
                .iter()
                .map(|name| DenyRule::Exact(name.to_string()))
                .chain(
                    DEFAULT_DENY_PREFIXES
                        .iter()
                        .map(|prefix| DenyRule::Prefix(prefix.to_string())),
                )
                .collect(),
        };
        EnvPolicy {
            mode,
            deny,
            allow: BTreeSet::new(),
            forced: DEFAULT_FORCED
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// The single-list rules used before prefix matching existed.
    pub fn legacy() -> Self {
        Self::for_mode(RedactionMode::Exact)
    }

    pub fn with_deny(mut self, rule: DenyRule) -> Self {
        self.deny.push(rule);
        self
    }

    pub fn with_allow(mut self, name: impl Into<String>) -> Self {
        self.allow.insert(name.into());
        self
    }

    pub fn with_forced(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.forced.insert(name.into(), value.into());
        self
    }

    /// Whether an inherited variable is dropped.
    pub fn is_denied(&self, name: &str) -> bool {
        let allowed = self
            .allow
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(name));
        !allowed && self.deny.iter().any(|rule| rule.matches(name))
    }

    /// Compute the child environment.
    ///
    /// `defaults` are per-invocation forced values (toolchain root, side
    /// channel) layered on top of the policy's own forced set; `overrides`
    /// are applied last.
    pub fn resolve<A, D, O, K, V>(&self, ambient: A, defaults: D, overrides: O) -> BTreeMap<String, String>
    where
        A: IntoIterator<Item = (String, String)>,
        D: IntoIterator<Item = (String, String)>,
        O: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut env: BTreeMap<String, String> = ambient
            .into_iter()
            .filter(|(name, _)| !self.is_denied(name))
            .collect();

        for (name, value) in self.forced.iter().map(|(k, v)| (k.clone(), v.clone())).chain(defaults) {
            set_var(&mut env, name, value);
        }
        for (name, value) in overrides {
            set_var(&mut env, name.into(), value.into());
        }
        env
    }
}

/// The current process environment, skipping entries that are not valid UTF-8.
pub fn ambient_environment() -> Vec<(String, String)> {
    std::env::vars_os()
        .filter_map(|(name, value)| Some((name.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

// Replaces a differently-cased existing entry so the child never sees both
// `Path` and `PATH`.
fn set_var(env: &mut BTreeMap<String, String>, name: String, value: String) {
    let existing = env
        .keys()
        .find(|key| key.eq_ignore_ascii_case(&name) && **key != name)
        .cloned();
    if let Some(existing) = existing {
        env.remove(&existing);
    }
    env.insert(name, value);
}
