use std::process::Stdio;

use anyhow::{Context, Error};
use async_trait::async_trait;
use log::debug;
use tokio::{io::AsyncWriteExt, process::Command};

use crate::domain::{
    error::KlusterError,
    port::{CommandOutput, CommandRunner, Invocation},
};

#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, Error> {
        debug!("Running: {}", invocation.command_line());

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(invocation.env.iter().cloned())
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .with_context(|| format!("spawn {}", invocation.program))?;
        // Stdin is written from its own task while output is collected.
        let writer = child
            .stdin
            .take()
            .zip(invocation.stdin.clone())
            .map(|(mut stdin, data)| tokio::spawn(async move { stdin.write_all(&data).await }));
        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("wait for {}", invocation.program))?;

        if !output.status.success() {
            return Err(KlusterError::CommandFailed {
                program: invocation.program.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }
        if let Some(writer) = writer {
            writer
                .await
                .context("join stdin writer")?
                .with_context(|| format!("write stdin of {}", invocation.program))?;
        }

        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
