use crate::ops::config::ServerDescriptor;
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Result of one remote invocation. A non-zero exit is data, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Exit code plus the tail of stderr (or stdout when stderr is empty).
    pub fn describe(&self) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let lines: Vec<&str> = source.trim().lines().collect();
        let tail = lines[lines.len().saturating_sub(5)..].join(" | ");
        match self.code {
            Some(code) => format!("exit {}: {}", code, tail),
            None => format!("killed by signal: {}", tail),
        }
    }
}

/// The only way the provisioner talks to a host.
#[allow(async_fn_in_trait)]
pub trait RemoteChannel {
    fn target(&self) -> String;

    /// Run a bash script on the host.
    async fn exec(&self, script: &str) -> Result<CommandOutput>;

    /// Like `exec`, for scripts whose output carries secrets and must not be logged.
    async fn exec_sensitive(&self, script: &str) -> Result<CommandOutput> {
        self.exec(script).await
    }

    /// Write `content` to `remote_path`, through `sudo tee` when `sudo` is set.
    async fn upload(&self, content: &[u8], remote_path: &str, sudo: bool)
        -> Result<CommandOutput>;

    async fn close(&self) {}
}

/// Single-quote for POSIX shells.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// `ssh` (or `sshpass -e ssh`) with a ControlMaster socket so every step reuses
/// one authenticated connection.
pub struct SshChannel {
    user: String,
    host: String,
    port: u16,
    key_path: Option<String>,
    password: Option<SecretString>,
    connect_timeout: Duration,
    control_path: PathBuf,
    dry_run: bool,
}

impl SshChannel {
    pub fn new(server: &ServerDescriptor, connect_timeout: Duration, dry_run: bool) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let control_path = std::env::temp_dir().join(format!("supaship-{}", &id[..12]));
        Self {
            user: server.user.clone(),
            host: server.host.clone(),
            port: server.port,
            key_path: server.key_path.clone(),
            password: server
                .password
                .as_ref()
                .map(|p| SecretString::from(p.expose_secret().to_owned())),
            connect_timeout,
            control_path,
            dry_run,
        }
    }

    pub fn ssh_args(&self) -> Vec<String> {
        let mut args = vec!["-p".to_string(), self.port.to_string()];
        if let Some(key) = &self.key_path {
            args.push("-i".to_string());
            args.push(key.clone());
        }
        let mut options = vec![
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            // Hosts are often freshly created, so their keys are unknown
            "StrictHostKeyChecking=no".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "LogLevel=ERROR".to_string(),
            "ControlMaster=auto".to_string(),
            format!("ControlPath={}", self.control_path.display()),
            "ControlPersist=120".to_string(),
        ];
        if self.password.is_none() {
            options.push("BatchMode=yes".to_string());
        }
        for opt in options {
            args.push("-o".to_string());
            args.push(opt);
        }
        args
    }

    fn command(&self) -> Command {
        let mut cmd = match &self.password {
            Some(password) => {
                let mut c = Command::new("sshpass");
                c.arg("-e").arg("ssh");
                c.env("SSHPASS", password.expose_secret());
                c
            }
            None => Command::new("ssh"),
        };
        cmd.args(self.ssh_args());
        cmd.arg(self.target());
        cmd
    }

    async fn run(&self, remote_cmd: &str, input: &[u8]) -> Result<CommandOutput> {
        let mut cmd = self.command();
        cmd.arg(remote_cmd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn ssh for {}", self.target()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input)
                .await
                .context("Failed to write to ssh stdin")?;
        }

        let output = child
            .wait_with_output()
            .await
            .context("Failed to wait on ssh")?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

impl SshChannel {
    async fn run_script(&self, script: &str, log_output: bool) -> Result<CommandOutput> {
        if self.dry_run {
            info!("[DRY RUN] {} would run:\n{}", self.target(), script.trim_end());
            return Ok(CommandOutput::ok(""));
        }
        debug!("{} $ {}", self.target(), script.trim_end());
        let output = self.run("bash -s", script.as_bytes()).await?;
        if log_output {
            debug!(
                code = ?output.code,
                stdout = %output.stdout.trim_end(),
                stderr = %output.stderr.trim_end(),
                "remote command finished"
            );
        } else {
            debug!(code = ?output.code, "remote command finished (output withheld)");
        }
        Ok(output)
    }
}

impl RemoteChannel for SshChannel {
    fn target(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    async fn exec(&self, script: &str) -> Result<CommandOutput> {
        self.run_script(script, true).await
    }

    async fn exec_sensitive(&self, script: &str) -> Result<CommandOutput> {
        self.run_script(script, false).await
    }

    async fn upload(
        &self,
        content: &[u8],
        remote_path: &str,
        sudo: bool,
    ) -> Result<CommandOutput> {
        let remote_cmd = if sudo {
            format!("sudo tee {} > /dev/null", shell_quote(remote_path))
        } else {
            format!("cat > {}", shell_quote(remote_path))
        };
        if self.dry_run {
            info!(
                "[DRY RUN] {} would write {} bytes to {}",
                self.target(),
                content.len(),
                remote_path
            );
            return Ok(CommandOutput::ok(""));
        }
        debug!("{} uploading {} bytes to {}", self.target(), content.len(), remote_path);
        self.run(&remote_cmd, content).await
    }

    async fn close(&self) {
        if self.dry_run {
            return;
        }
        let mut cmd = Command::new("ssh");
        cmd.arg("-O")
            .arg("exit")
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg(self.target())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let _ = cmd.status().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::config::Inventory;
    use std::path::Path;

    fn descriptor(extra: &str) -> Inventory {
        Inventory::parse(
            Path::new("s.json"),
            &format!(
                r#"[{{"host": "198.51.100.7", "user": "deploy", "domain_or_ip": "x"{}}}]"#,
                extra
            ),
        )
        .unwrap()
    }

    #[test]
    fn quote_handles_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn key_auth_uses_batch_mode() {
        let inv = descriptor(r#", "port": 2200, "key_path": "/k/id_ed25519""#);
        let channel = SshChannel::new(&inv.servers[0], Duration::from_secs(10), false);
        let args = channel.ssh_args();
        assert_eq!(&args[..4], &["-p", "2200", "-i", "/k/id_ed25519"]);
        assert!(args.contains(&"ConnectTimeout=10".to_string()));
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert_eq!(channel.target(), "deploy@198.51.100.7");
    }

    #[test]
    fn password_auth_skips_batch_mode() {
        let inv = descriptor(r#", "password": "hunter2""#);
        let channel = SshChannel::new(&inv.servers[0], Duration::from_secs(10), false);
        let args = channel.ssh_args();
        assert!(!args.contains(&"BatchMode=yes".to_string()));
        assert!(!args.iter().any(|a| a.contains("hunter2")));
    }

    #[test]
    fn describe_keeps_tail() {
        let out = CommandOutput::failed(100, "a\nb\nc\nd\ne\nf\n");
        assert_eq!(out.describe(), "exit 100: b | c | d | e | f");
    }

    #[tokio::test]
    async fn dry_run_never_spawns() {
        let inv = descriptor("");
        let channel = SshChannel::new(&inv.servers[0], Duration::from_secs(1), true);
        let out = channel.exec("rm -rf /definitely-not").await.unwrap();
        assert!(out.success());
        let up = channel.upload(b"x", "/etc/x", true).await.unwrap();
        assert!(up.success());
    }
}
