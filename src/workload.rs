// CLASSIFICATION: COMMUNITY
// Filename: workload.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Workload launch from the verified container list.

use thiserror::Error;

use crate::diag::Diagnostics;
use crate::error::NodeError;
use crate::runtime::ContainerRuntime;
use crate::trusted::{ContainerSpec, EnvEntry, ExternalSecrets, TrustedConfig};

const STEP: &str = "containers";

/// Containers that failed to start; every container was attempted.
#[derive(Debug, Error)]
#[error("failed to start {} container(s): {}", .0.len(), summary(.0))]
pub struct LaunchFailures(pub Vec<(String, NodeError)>);

fn summary(failures: &[(String, NodeError)]) -> String {
    failures
        .iter()
        .map(|(name, e)| format!("{name}: {e}"))
        .collect::<Vec<_>>()
        .join("; ")
}

fn render(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::Null => String::new(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_owned())
            .unwrap_or_default(),
    }
}

fn usable_key(key: &str) -> bool {
    !key.is_empty() && !key.contains('=') && !key.contains('\0')
}

/// Resolve the environment of `spec`. Inline values come first in
/// declaration order, then bare keys from `env`, then `secrets`. Keys
/// missing from the external secrets are warned about and left out.
pub fn build_env(
    spec: &ContainerSpec,
    external: &ExternalSecrets,
    diag: &Diagnostics,
) -> Vec<(String, String)> {
    let mut env = Vec::new();
    for entry in &spec.env {
        match entry {
            EnvEntry::Key(key) => match external.env_value(key) {
                Some(v) => env.push((key.clone(), v.to_owned())),
                None => diag.warn(STEP, format!("env key {key} not found in external config")),
            },
            EnvEntry::Inline(map) => {
                for (k, v) in map {
                    env.push((k.clone(), render(v)));
                }
            }
        }
    }
    for key in &spec.secrets {
        match external.secret(key) {
            Some(v) => env.push((key.clone(), v.to_owned())),
            None => diag.warn(STEP, format!("secret key {key} not found in external config")),
        }
    }
    env.retain(|(k, _)| {
        let ok = usable_key(k);
        if !ok {
            diag.warn(STEP, format!("dropping unusable env key {k:?}"));
        }
        ok
    });
    env
}

/// Start every container in `config`, in order.
pub fn launch_workloads(
    runtime: &dyn ContainerRuntime,
    config: &TrustedConfig,
    external: &ExternalSecrets,
    diag: &Diagnostics,
) -> Result<Vec<String>, LaunchFailures> {
    let specs = config.containers();
    if specs.is_empty() {
        diag.info(STEP, "no containers to launch");
        return Ok(Vec::new());
    }
    diag.info(STEP, format!("launching {} containers", specs.len()));

    let mut started = Vec::new();
    let mut failures = Vec::new();
    for spec in specs {
        if spec.image.is_empty() {
            let e = NodeError::invalid("container image", "<missing>");
            diag.error(STEP, format!("no image specified for container {}", spec.name));
            failures.push((spec.name.clone(), e));
            continue;
        }
        let env = build_env(spec, external, diag);
        match runtime.create_and_start(spec, &env) {
            Ok(id) => {
                diag.info(STEP, format!("started container {} ({id})", spec.name));
                started.push(id);
            }
            Err(e) => {
                diag.error(STEP, format!("error starting container {}: {e}", spec.name));
                failures.push((spec.name.clone(), e));
            }
        }
    }
    if failures.is_empty() {
        Ok(started)
    } else {
        Err(LaunchFailures(failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeRuntime, RuntimeCall};
    use crate::hash::{digest, verify_bytes};

    fn trusted(text: &str) -> TrustedConfig {
        let bytes = text.as_bytes().to_vec();
        let v = verify_bytes("config", &digest(&bytes), bytes).unwrap();
        TrustedConfig::from_verified(&v).unwrap()
    }

    fn external() -> ExternalSecrets {
        ExternalSecrets::parse(
            b"env:\n  MODEL: llama\nsecrets:\n  HF_TOKEN: hf_abc\n  EMPTY: \"\"\n",
        )
        .unwrap()
    }

    #[test]
    fn env_merges_inline_keys_and_secrets() {
        let config = trusted(
            "containers:\n  - name: web\n    image: ghcr.io/x/web:1\n    env:\n      - PORT: 8080\n      - MODEL\n      - MISSING\n    secrets: [HF_TOKEN, EMPTY]\n",
        );
        let (diag, transcript) = Diagnostics::transcript(false);
        let env = build_env(&config.containers()[0], &external(), &diag);
        assert_eq!(
            env,
            vec![
                ("PORT".to_owned(), "8080".to_owned()),
                ("MODEL".to_owned(), "llama".to_owned()),
                ("HF_TOKEN".to_owned(), "hf_abc".to_owned()),
            ]
        );
        assert!(transcript.contains(STEP, "MISSING"));
        assert!(transcript.contains(STEP, "EMPTY"));
    }

    #[test]
    fn all_containers_attempted_before_failing() {
        let config = trusted(
            "containers:\n  - name: a\n    image: img/a\n  - name: b\n    image: img/b\n  - name: c\n    image: \"\"\n  - name: d\n    image: img/d\n",
        );
        let runtime = FakeRuntime::new().failing("b");
        let err = launch_workloads(
            &runtime,
            &config,
            &ExternalSecrets::default(),
            &Diagnostics::transcript(false).0,
        )
        .unwrap_err();
        assert_eq!(err.0.len(), 2);
        assert!(err.to_string().starts_with("failed to start 2 container(s): b: "));
        assert!(runtime.calls().contains(&RuntimeCall::Create("d".into())));
        assert_eq!(runtime.running().len(), 2);
    }

    #[test]
    fn secrets_reach_the_runtime_env() {
        let config = trusted("containers:\n  - name: api\n    image: img/api\n    secrets: [HF_TOKEN]\n");
        let runtime = FakeRuntime::new();
        let diag = Diagnostics::transcript(false).0;
        launch_workloads(&runtime, &config, &external(), &diag).unwrap();
        assert_eq!(
            runtime.launched_env("api").unwrap(),
            vec![("HF_TOKEN".to_owned(), "hf_abc".to_owned())]
        );
    }

    #[test]
    fn empty_list_is_a_no_op() {
        let runtime = FakeRuntime::new();
        let ids = launch_workloads(
            &runtime,
            &trusted("containers: []\n"),
            &ExternalSecrets::default(),
            &Diagnostics::transcript(false).0,
        )
        .unwrap();
        assert!(ids.is_empty());
        assert!(runtime.calls().is_empty());
    }
}
