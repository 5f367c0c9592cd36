// src/secrets.rs

//! Secret reference resolution.
//!
//! A [`SecretRef`] names a cluster secret and says where it should appear in
//! the pod. Resolving it produces an [`InjectionInstruction`] for the launch
//! adapter. Neither type ever holds secret material: the adapter fetches the
//! value when it creates the pod.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::errors::{PoddagError, Result};

static ENV_VAR_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("env var pattern is valid")
});

/// Declared binding of a cluster secret into a pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretRef {
    /// Expose `key` of `secret_name` as environment variable `target_var`.
    Env {
        target_var: String,
        secret_name: String,
        key: String,
    },
    /// Mount `secret_name` at `mount_path`.
    ///
    /// With `key = None` every key of the secret is projected as a file.
    Volume {
        mount_path: String,
        secret_name: String,
        key: Option<String>,
    },
}

impl SecretRef {
    pub fn env(
        target_var: impl Into<String>,
        secret_name: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        SecretRef::Env {
            target_var: target_var.into(),
            secret_name: secret_name.into(),
            key: key.into(),
        }
    }

    pub fn volume(
        mount_path: impl Into<String>,
        secret_name: impl Into<String>,
        key: Option<String>,
    ) -> Self {
        SecretRef::Volume {
            mount_path: mount_path.into(),
            secret_name: secret_name.into(),
            key,
        }
    }

    pub fn secret_name(&self) -> &str {
        match self {
            SecretRef::Env { secret_name, .. } | SecretRef::Volume { secret_name, .. } => {
                secret_name
            }
        }
    }
}

/// Concrete instruction for the launch adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionInstruction {
    /// Set `var` from `key` of `secret_name` when the container starts.
    EnvFromSecret {
        var: String,
        secret_name: String,
        key: String,
    },
    /// Mount a secret-backed volume named `volume_name` at `mount_path`.
    MountSecret {
        volume_name: String,
        mount_path: String,
        secret_name: String,
        items: Option<String>,
    },
}

/// Resolve a single secret reference.
///
/// Pure function of the reference's fields; fails only when a required
/// field is missing or malformed.
pub fn resolve(secret: &SecretRef) -> Result<InjectionInstruction> {
    match secret {
        SecretRef::Env {
            target_var,
            secret_name,
            key,
        } => {
            require_non_empty("secret name", secret_name, secret)?;
            require_non_empty("key", key, secret)?;
            if !ENV_VAR_NAME.is_match(target_var) {
                return Err(PoddagError::UnresolvedSecret(format!(
                    "'{target_var}' is not a valid environment variable name (secret '{secret_name}')"
                )));
            }

            Ok(InjectionInstruction::EnvFromSecret {
                var: target_var.clone(),
                secret_name: secret_name.clone(),
                key: key.clone(),
            })
        }
        SecretRef::Volume {
            mount_path,
            secret_name,
            key,
        } => {
            require_non_empty("secret name", secret_name, secret)?;
            if !mount_path.starts_with('/') {
                return Err(PoddagError::UnresolvedSecret(format!(
                    "mount path '{mount_path}' for secret '{secret_name}' must be absolute"
                )));
            }
            if let Some(k) = key {
                require_non_empty("key", k, secret)?;
            }

            Ok(InjectionInstruction::MountSecret {
                volume_name: format!("secret-vol-{secret_name}"),
                mount_path: mount_path.clone(),
                secret_name: secret_name.clone(),
                items: key.clone(),
            })
        }
    }
}

/// Resolve every reference of a node, preserving declaration order.
///
/// Volume names are unique within the result: a repeated name gets the
/// binding's position appended (`secret-vol-<secret>-<index>`).
pub fn resolve_all(secrets: &[SecretRef]) -> Result<Vec<InjectionInstruction>> {
    let mut volume_names = HashSet::new();

    secrets
        .iter()
        .enumerate()
        .map(|(index, secret)| {
            let mut instruction = resolve(secret)?;
            if let InjectionInstruction::MountSecret { volume_name, .. } = &mut instruction {
                let base = volume_name.clone();
                let mut suffix = index;
                while !volume_names.insert(volume_name.clone()) {
                    *volume_name = format!("{base}-{suffix}");
                    suffix += 1;
                }
            }
            Ok(instruction)
        })
        .collect()
}

fn require_non_empty(field: &str, value: &str, secret: &SecretRef) -> Result<()> {
    if value.trim().is_empty() {
        return Err(PoddagError::UnresolvedSecret(format!(
            "missing {field} in {secret:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_binding_resolves_to_variable_without_value() {
        let secret = SecretRef::env("SQL_CONN", "airflow-secrets", "sql_alchemy_conn");
        let instruction = resolve(&secret).unwrap();

        assert_eq!(
            instruction,
            InjectionInstruction::EnvFromSecret {
                var: "SQL_CONN".to_string(),
                secret_name: "airflow-secrets".to_string(),
                key: "sql_alchemy_conn".to_string(),
            }
        );
    }

    #[test]
    fn volume_binding_gets_deterministic_volume_name() {
        let secret = SecretRef::volume(
            "/var/secrets/google",
            "service-account",
            Some("service-account.json".to_string()),
        );

        match resolve(&secret).unwrap() {
            InjectionInstruction::MountSecret {
                volume_name,
                mount_path,
                items,
                ..
            } => {
                assert_eq!(volume_name, "secret-vol-service-account");
                assert_eq!(mount_path, "/var/secrets/google");
                assert_eq!(items.as_deref(), Some("service-account.json"));
            }
            other => panic!("expected MountSecret, got {other:?}"),
        }
    }

    #[test]
    fn missing_key_is_unresolved() {
        let secret = SecretRef::env("SQL_CONN", "airflow-secrets", "");
        assert!(matches!(
            resolve(&secret),
            Err(PoddagError::UnresolvedSecret(_))
        ));
    }

    #[test]
    fn bad_variable_name_and_relative_mount_are_unresolved() {
        let bad_var = SecretRef::env("1SQL", "airflow-secrets", "k");
        let relative = SecretRef::volume("var/secrets", "service-account", None);

        assert!(resolve(&bad_var).is_err());
        assert!(resolve(&relative).is_err());
    }

    #[test]
    fn two_mounts_of_one_secret_get_distinct_volume_names() {
        let secrets = vec![
            SecretRef::volume("/var/secrets/a", "service-account", None),
            SecretRef::env("SQL_CONN", "airflow-secrets", "sql_alchemy_conn"),
            SecretRef::volume("/var/secrets/b", "service-account", None),
        ];

        let names: Vec<String> = resolve_all(&secrets)
            .unwrap()
            .into_iter()
            .filter_map(|i| match i {
                InjectionInstruction::MountSecret { volume_name, .. } => Some(volume_name),
                InjectionInstruction::EnvFromSecret { .. } => None,
            })
            .collect();

        assert_eq!(
            names,
            vec!["secret-vol-service-account", "secret-vol-service-account-2"]
        );
    }

    #[test]
    fn resolve_all_keeps_declaration_order() {
        let secrets = vec![
            SecretRef::volume("/var/secrets/google", "service-account", None),
            SecretRef::env("SQL_CONN", "airflow-secrets", "sql_alchemy_conn"),
        ];

        let resolved = resolve_all(&secrets).unwrap();
        assert!(matches!(resolved[0], InjectionInstruction::MountSecret { .. }));
        assert!(matches!(resolved[1], InjectionInstruction::EnvFromSecret { .. }));
    }
}
