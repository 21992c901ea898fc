use super::{InstalledLoader, LaunchTarget, LoaderContext};
use crate::error::{Result, SetupError};
use crate::server::installer::core::traits::LoaderInstaller;
use crate::server::installer::types::ProgressReporter;
use crate::utils::process::PistonCommandExt;
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

pub struct ForgeInstaller;

impl LoaderInstaller for ForgeInstaller {
    fn install<'a>(
        &'a self,
        ctx: &'a LoaderContext,
        reporter: Arc<dyn ProgressReporter>,
    ) -> BoxFuture<'a, Result<InstalledLoader>> {
        Box::pin(async move {
            let full = format!(
                "{}-{}",
                ctx.plan.game_version,
                ctx.plan.loader_version.as_deref().unwrap_or_default()
            );
            run_installer_jar(ctx, &*reporter, "Forge").await?;
            locate_launch(
                ctx.root(),
                &Path::new("libraries/net/minecraftforge/forge").join(&full),
                &format!("forge-{}", full),
            )
        })
    }
}

/// Download the plan's installer jar and run it with `--installServer` in the
/// server root. The jar is removed afterwards whatever the outcome.
pub(crate) async fn run_installer_jar(
    ctx: &LoaderContext,
    reporter: &dyn ProgressReporter,
    loader_name: &str,
) -> Result<()> {
    let installer = ctx
        .plan
        .loader_artifact
        .as_ref()
        .ok_or_else(|| SetupError::loader(format!("{} plan has no installer", loader_name)))?;
    let java = ctx.java.as_ref().ok_or_else(|| {
        SetupError::loader(format!("{} installer needs Java but none was provided", loader_name))
    })?;

    reporter.set_percent(10);
    reporter.set_message(&format!("Downloading {} installer...", loader_name));
    ctx.downloader
        .download(&installer.to_task(ctx.root()), reporter)
        .await?;

    if reporter.is_cancelled() {
        return Err(SetupError::Cancelled);
    }

    let installer_path = ctx.root().join(&installer.file_name);
    reporter.set_percent(40);
    reporter.set_message(&format!("Running {} installer...", loader_name));

    let result = run_java_installer(java, &installer_path, ctx.root(), ctx.install_timeout).await;

    if let Err(e) = tokio::fs::remove_file(&installer_path).await {
        log::warn!("[{}] Could not remove installer {:?}: {}", loader_name, installer_path, e);
    }
    // The installer leaves a log next to itself
    let _ = tokio::fs::remove_file(installer_path.with_extension("jar.log")).await;

    result?;
    reporter.set_percent(90);
    Ok(())
}

async fn run_java_installer(
    java: &Path,
    installer: &Path,
    working_dir: &Path,
    timeout: std::time::Duration,
) -> Result<()> {
    let mut command = Command::new(java);
    command
        .arg("-Djava.awt.headless=true")
        .arg("-jar")
        .arg(installer)
        .arg("--installServer")
        .current_dir(working_dir)
        .suppress_console()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    log::debug!("Executing: {:?}", command);

    let output = match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(SetupError::loader(format!(
                "Failed to spawn {:?}: {}",
                java, e
            )))
        }
        Err(_) => {
            return Err(SetupError::loader(format!(
                "Installer timed out after {}s",
                timeout.as_secs()
            )))
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        log::error!("Installer failed:");
        log::error!("  stdout: {}", stdout);
        log::error!("  stderr: {}", stderr);
        let tail = stderr
            .lines()
            .chain(stdout.lines())
            .filter(|l| !l.trim().is_empty())
            .last()
            .unwrap_or("")
            .to_string();
        return Err(SetupError::loader(format!(
            "Installer exited with code {:?}{}",
            output.status.code(),
            if tail.is_empty() {
                String::new()
            } else {
                format!(": {}", tail)
            }
        )));
    }

    Ok(())
}

/// Work out how the installer expects the server to be launched.
///
/// Modern installers write `unix_args.txt`/`win_args.txt` under the library
/// directory; older ones drop a runnable jar into the root.
pub(crate) fn locate_launch(
    root: &Path,
    args_dir: &Path,
    jar_prefix: &str,
) -> Result<InstalledLoader> {
    let args_files: Vec<PathBuf> = ["unix_args.txt", "win_args.txt"]
        .iter()
        .map(|name| args_dir.join(name))
        .filter(|rel| root.join(rel).is_file())
        .collect();

    if !args_files.is_empty() {
        log::info!("[loader] Launch via argument files in {:?}", args_dir);
        return Ok(InstalledLoader {
            launch: LaunchTarget::ArgFiles {
                args_dir: args_dir.to_path_buf(),
            },
            artifacts: args_files,
        });
    }

    let mut jars: Vec<String> = std::fs::read_dir(root)?
        .flatten()
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|name| {
            name.starts_with(jar_prefix) && name.ends_with(".jar") && !name.contains("installer")
        })
        .collect();
    jars.sort();
    // Prefer the plain jar over -universal/-shim variants
    jars.sort_by_key(|name| name.len());

    match jars.into_iter().next() {
        Some(jar) => {
            log::info!("[loader] Launch via {}", jar);
            Ok(InstalledLoader {
                launch: LaunchTarget::Jar {
                    path: PathBuf::from(&jar),
                },
                artifacts: vec![PathBuf::from(jar)],
            })
        }
        None => Err(SetupError::loader(format!(
            "Installer finished but produced neither {:?} argument files nor a {}*.jar",
            args_dir, jar_prefix
        ))),
    }
}
