use tracing::{debug, warn};

/// Run hook commands through `sh -c`, one after another, with extra
/// environment variables. Errors are logged, not propagated.
pub async fn run_hooks(commands: &[String], env_vars: &[(String, String)]) {
    for cmd in commands {
        let mut command = tokio::process::Command::new("sh");
        command.args(["-c", cmd]);
        for (key, val) in env_vars {
            command.env(key, val);
        }
        command.stdout(std::process::Stdio::null());
        command.stderr(std::process::Stdio::null());
        match command.status().await {
            Ok(s) if !s.success() => warn!(hook = %cmd, code = s.code(), "Hook exited non-zero"),
            Err(e) => warn!(hook = %cmd, error = %e, "Hook failed to execute"),
            _ => {}
        }
    }
}

/// Fire-and-forget variant of [`run_hooks`] for synchronous callers.
///
/// Needs an ambient tokio runtime; without one the commands are skipped.
pub fn spawn_hooks(commands: Vec<String>, env_vars: Vec<(String, String)>) {
    if commands.is_empty() {
        return;
    }
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { run_hooks(&commands, &env_vars).await });
        }
        Err(_) => debug!(count = commands.len(), "No tokio runtime, skipping hooks"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_hooks_passes_env() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("hook.txt");
        let cmd = format!("printf '%s' \"$PARASEL_STEP\" > {}", out.display());

        run_hooks(&[cmd], &[("PARASEL_STEP".into(), "fetch".into())]).await;

        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written, "fetch");
    }

    #[tokio::test]
    async fn test_failing_hook_is_not_fatal() {
        run_hooks(&["exit 3".to_string()], &[]).await;
    }

    #[test]
    fn test_spawn_without_runtime_is_noop() {
        spawn_hooks(vec!["true".into()], vec![]);
    }
}
