//! OpenTofu subprocess apply engine
//!
//! Every apply runs `init` then `apply` in the target's working directory;
//! outputs are read with `output -json`. Credentials from the
//! [`CredentialContext`] are added to the subprocess environment only.

use async_trait::async_trait;
use crossorg_core::{ApplyEngine, ApplyMode, ApplyRequest, CredentialContext, EngineError, OutputValues};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Default executable
pub const DEFAULT_BINARY: &str = "tofu";

/// Apply engine driving the `tofu` CLI
#[derive(Debug, Clone)]
pub struct TofuEngine {
    binary: PathBuf,
    timeout: Option<Duration>,
    extra_init_args: Vec<String>,
}

impl Default for TofuEngine {
    fn default() -> Self {
        Self::new(DEFAULT_BINARY)
    }
}

#[derive(Debug, Deserialize)]
struct OutputEntry {
    value: serde_json::Value,
}

impl TofuEngine {
    /// Create engine for the given executable
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: None,
            extra_init_args: Vec::new(),
        }
    }

    /// Kill any invocation running longer than `timeout`
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Extra arguments for `init` (backend config, plugin dirs)
    #[inline]
    #[must_use]
    pub fn with_init_args(mut self, args: Vec<String>) -> Self {
        self.extra_init_args = args;
        self
    }

    /// Arguments for the apply step
    fn apply_args(mode: &ApplyMode) -> Vec<String> {
        let mut args = vec![
            "apply".to_string(),
            "-auto-approve".to_string(),
            "-input=false".to_string(),
        ];
        if let ApplyMode::Targeted(path) = mode {
            args.push(format!("-target={path}"));
        }
        args
    }

    fn init_args(&self) -> Vec<String> {
        let mut args = vec!["init".to_string(), "-input=false".to_string()];
        args.extend(self.extra_init_args.iter().cloned());
        args
    }

    /// Run one subcommand, returning stdout
    async fn run(
        &self,
        working_dir: &Path,
        args: &[String],
        credentials: &CredentialContext,
    ) -> Result<String, EngineError> {
        let command = format!("{} {}", self.binary.display(), args.join(" "));
        tracing::info!(command = %command, dir = %working_dir.display(), "running apply engine");

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .current_dir(working_dir)
            .env("TF_IN_AUTOMATION", "1")
            .envs(credentials.env().iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let pending = cmd.output();
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, pending)
                .await
                .map_err(|_| EngineError::TimedOut {
                    command: command.clone(),
                    secs: limit.as_secs(),
                })?,
            None => pending.await,
        }
        .map_err(|source| EngineError::Spawn {
            command: command.clone(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !stdout.trim().is_empty() {
            tracing::debug!(command = %command, "{}", stdout.trim_end());
        }

        if output.status.success() {
            Ok(stdout)
        } else {
            Err(EngineError::Failed {
                command,
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl ApplyEngine for TofuEngine {
    async fn apply(&self, request: ApplyRequest<'_>) -> Result<(), EngineError> {
        self.run(request.working_dir, &self.init_args(), request.credentials)
            .await?;
        self.run(request.working_dir, &Self::apply_args(request.mode), request.credentials)
            .await?;
        Ok(())
    }

    async fn outputs(&self, working_dir: &Path, credentials: &CredentialContext) -> Result<OutputValues, EngineError> {
        let args = ["output".to_string(), "-json".to_string()];
        let stdout = self.run(working_dir, &args, credentials).await?;
        parse_outputs(&stdout)
    }
}

/// Decode `output -json`: `{ name: { value, sensitive, type } }`
fn parse_outputs(stdout: &str) -> Result<OutputValues, EngineError> {
    if stdout.trim().is_empty() {
        return Ok(OutputValues::new());
    }
    let entries: BTreeMap<String, OutputEntry> =
        serde_json::from_str(stdout).map_err(EngineError::MalformedOutput)?;
    Ok(entries.into_iter().map(|(k, e)| (k, e.value)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossorg_core::ResourcePath;
    use pretty_assertions::assert_eq;

    #[test]
    fn targeted_apply_args() {
        let args = TofuEngine::apply_args(&ApplyMode::Targeted(ResourcePath::new("routing_queue", "support")));
        assert_eq!(
            args,
            vec!["apply", "-auto-approve", "-input=false", "-target=routing_queue.support"]
        );
        assert_eq!(TofuEngine::apply_args(&ApplyMode::Reconcile).len(), 3);
    }

    #[test]
    fn parses_output_document() {
        let outputs = parse_outputs(
            r#"{"migrated_S":{"sensitive":false,"type":"string","value":"T-1"},"n":{"value":3}}"#,
        )
        .unwrap();
        assert_eq!(outputs["migrated_S"], "T-1");
        assert_eq!(outputs["n"], 3);
        assert!(parse_outputs("  \n").unwrap().is_empty());
        assert!(matches!(parse_outputs("nope"), Err(EngineError::MalformedOutput(_))));
    }

    #[cfg(unix)]
    mod subprocess {
        use super::*;
        use pretty_assertions::assert_eq;
        use std::os::unix::fs::PermissionsExt;

        fn script(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("fake-tofu");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        async fn credentials() -> CredentialContext {
            let switcher = crossorg_core::CredentialSwitcher::new(
                crossorg_core::CredentialMode::PerCall,
                crossorg_core::CredentialEnvVars::default(),
            );
            let target = crossorg_core::TargetOrg::new(
                "orgA",
                "A",
                crossorg_core::Credentials::new("cid", "secret", "eu"),
            );
            let guard = switcher.acquire(&target).await.unwrap();
            guard.context().clone()
        }

        #[tokio::test]
        async fn runs_init_then_targeted_apply_with_credentials() {
            let dir = tempfile::tempdir().unwrap();
            let log = dir.path().join("calls.log");
            let bin = script(
                dir.path(),
                &format!(
                    "echo \"$* client=$GENESYSCLOUD_OAUTHCLIENT_ID\" >> {}",
                    log.display()
                ),
            );
            let engine = TofuEngine::new(bin);
            let ctx = credentials().await;

            engine
                .apply(ApplyRequest {
                    working_dir: dir.path(),
                    mode: &ApplyMode::Targeted(ResourcePath::new("routing_queue", "support")),
                    credentials: &ctx,
                })
                .await
                .unwrap();

            let calls = std::fs::read_to_string(&log).unwrap();
            let lines: Vec<&str> = calls.lines().collect();
            assert_eq!(
                lines,
                vec![
                    "init -input=false client=cid",
                    "apply -auto-approve -input=false -target=routing_queue.support client=cid",
                ]
            );
        }

        #[tokio::test]
        async fn failure_carries_stderr_and_status() {
            let dir = tempfile::tempdir().unwrap();
            let bin = script(dir.path(), "echo 'Error: invalid provider' >&2\nexit 3");
            let engine = TofuEngine::new(bin);

            let err = engine
                .apply(ApplyRequest {
                    working_dir: dir.path(),
                    mode: &ApplyMode::Reconcile,
                    credentials: &CredentialContext::inherited(),
                })
                .await
                .unwrap_err();

            match err {
                EngineError::Failed { exit_code, stderr, .. } => {
                    assert_eq!(exit_code, Some(3));
                    assert_eq!(stderr, "Error: invalid provider");
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[tokio::test]
        async fn slow_engine_times_out() {
            let dir = tempfile::tempdir().unwrap();
            let bin = script(dir.path(), "sleep 5");
            let engine = TofuEngine::new(bin).with_timeout(Some(Duration::from_millis(200)));

            let err = engine
                .apply(ApplyRequest {
                    working_dir: dir.path(),
                    mode: &ApplyMode::Reconcile,
                    credentials: &CredentialContext::inherited(),
                })
                .await
                .unwrap_err();
            assert!(matches!(err, EngineError::TimedOut { .. }));
        }

        #[tokio::test]
        async fn reads_outputs() {
            let dir = tempfile::tempdir().unwrap();
            let bin = script(dir.path(), r#"echo '{"migrated_S":{"value":"T-9"}}'"#);
            let engine = TofuEngine::new(bin);

            let outputs = engine
                .outputs(dir.path(), &CredentialContext::inherited())
                .await
                .unwrap();
            assert_eq!(outputs["migrated_S"], "T-9");
        }

        #[tokio::test]
        async fn missing_binary_is_a_spawn_error() {
            let dir = tempfile::tempdir().unwrap();
            let engine = TofuEngine::new(dir.path().join("does-not-exist"));

            let err = engine
                .outputs(dir.path(), &CredentialContext::inherited())
                .await
                .unwrap_err();
            assert!(matches!(err, EngineError::Spawn { .. }));
        }
    }
}
