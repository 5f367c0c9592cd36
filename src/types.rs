use std::fmt;

use serde::Deserialize;

/// Image pull policy passed through to the cluster.
///
/// Spelled the way the cluster API spells it (`"Always"`, `"IfNotPresent"`,
/// `"Never"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum PullPolicy {
    Always,
    #[default]
    IfNotPresent,
    Never,
}

impl fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PullPolicy::Always => "Always",
            PullPolicy::IfNotPresent => "IfNotPresent",
            PullPolicy::Never => "Never",
        };
        f.write_str(s)
    }
}

/// Where a secret is exposed inside the pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployType {
    /// Expose a single key as an environment variable.
    Env,
    /// Mount the secret (or one key of it) as a file.
    Volume,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_policy_default_is_if_not_present() {
        assert_eq!(PullPolicy::default(), PullPolicy::IfNotPresent);
        assert_eq!(PullPolicy::Always.to_string(), "Always");
    }
}
