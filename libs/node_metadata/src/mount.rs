//! Host capabilities the config drive reader needs: mounting filesystems and
//! running helper commands. Both are traits so the reader can be driven by
//! fakes in tests.

use anyhow::{Context, bail};
use async_trait::async_trait;
use camino::Utf8Path;
use tokio::process::Command;
use tracing::debug;

#[async_trait]
pub trait Mounter: Send + Sync {
    async fn mount(
        &self,
        source: &str,
        target: &Utf8Path,
        fs_type: &str,
        options: &[&str],
    ) -> anyhow::Result<()>;

    async fn unmount(&self, target: &Utf8Path) -> anyhow::Result<()>;
}

/// Runs a program to completion and returns its stdout.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[&str]) -> anyhow::Result<String>;
}

/// [`Mounter`] backed by the host's `mount(8)` and `umount(8)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMounter;

#[async_trait]
impl Mounter for SystemMounter {
    async fn mount(
        &self,
        source: &str,
        target: &Utf8Path,
        fs_type: &str,
        options: &[&str],
    ) -> anyhow::Result<()> {
        let mut command = Command::new("mount");
        command.args(["-t", fs_type]);
        if !options.is_empty() {
            command.arg("-o").arg(options.join(","));
        }
        command.arg(source).arg(target.as_str());

        debug!("running mount -t {fs_type} -o {} {source} {target}", options.join(","));
        run_to_success(&mut command)
            .await
            .with_context(|| format!("could not mount {source} on {target} as {fs_type}"))?;
        Ok(())
    }

    async fn unmount(&self, target: &Utf8Path) -> anyhow::Result<()> {
        let mut command = Command::new("umount");
        command.arg(target.as_str());
        run_to_success(&mut command)
            .await
            .with_context(|| format!("could not unmount {target}"))?;
        Ok(())
    }
}

/// [`CommandRunner`] that spawns real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[&str]) -> anyhow::Result<String> {
        let mut command = Command::new(program);
        command.args(args);
        run_to_success(&mut command)
            .await
            .with_context(|| format!("could not run `{program} {}`", args.join(" ")))
    }
}

async fn run_to_success(command: &mut Command) -> anyhow::Result<String> {
    let output = command.output().await.context("spawn() failed")?;
    if !output.status.success() {
        bail!(
            "process exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
