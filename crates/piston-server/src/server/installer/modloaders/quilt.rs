use super::vanilla::download_server_jar;
use super::{write_start_scripts, InstalledLoader, LaunchTarget, LoaderContext};
use crate::error::{Result, SetupError};
use crate::server::installer::core::batch::BatchDownloader;
use crate::server::installer::core::traits::LoaderInstaller;
use crate::server::installer::types::ProgressReporter;
use futures::future::BoxFuture;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zip::write::SimpleFileOptions;

pub const LAUNCH_JAR: &str = "quilt-server-launch.jar";

pub struct QuiltInstaller;

impl LoaderInstaller for QuiltInstaller {
    fn install<'a>(
        &'a self,
        ctx: &'a LoaderContext,
        reporter: Arc<dyn ProgressReporter>,
    ) -> BoxFuture<'a, Result<InstalledLoader>> {
        Box::pin(install_quilt(ctx, reporter))
    }
}

/// Install Quilt the way its own installer does for servers: download the
/// profile's libraries and write a launch jar whose manifest points at them.
pub async fn install_quilt(
    ctx: &LoaderContext,
    reporter: Arc<dyn ProgressReporter>,
) -> Result<InstalledLoader> {
    log::info!(
        "[quilt] Installing Quilt {} for Minecraft {}",
        ctx.plan.loader_version.as_deref().unwrap_or("latest"),
        ctx.plan.game_version
    );

    let main_class = ctx
        .plan
        .main_class
        .clone()
        .ok_or_else(|| SetupError::loader("Quilt server profile has no main class"))?;

    reporter.set_percent(5);
    let server = download_server_jar(ctx, &*reporter).await?;

    reporter.set_message("Downloading Quilt libraries...");
    let tasks = ctx
        .plan
        .libraries
        .iter()
        .map(|lib| lib.to_task(ctx.root()))
        .collect();
    let batch = BatchDownloader::new(ctx.downloader.clone(), ctx.concurrency);
    let summary = batch.download_all(tasks, reporter.clone(), 20, 70.0).await?;
    log::debug!(
        "[quilt] Libraries: {} downloaded, {} already present",
        summary.downloaded,
        summary.already_present
    );

    let mut class_path: Vec<String> = ctx
        .plan
        .libraries
        .iter()
        .map(|lib| lib.file_name.clone())
        .collect();
    class_path.push(server.to_string_lossy().replace('\\', "/"));

    let jar_path = ctx.root().join(LAUNCH_JAR);
    let manifest = launch_manifest(&main_class, &class_path);
    tokio::task::spawn_blocking(move || write_launch_jar(&jar_path, &manifest)).await??;

    let mut artifacts = vec![server, PathBuf::from(LAUNCH_JAR)];
    artifacts.extend(ctx.plan.libraries.iter().map(|lib| PathBuf::from(&lib.file_name)));
    artifacts.extend(write_start_scripts(ctx.root(), LAUNCH_JAR)?);
    reporter.set_percent(100);

    Ok(InstalledLoader {
        launch: LaunchTarget::Jar {
            path: PathBuf::from(LAUNCH_JAR),
        },
        artifacts,
    })
}

/// JAR manifest with `Main-Class` and a space-separated `Class-Path`.
/// Lines are folded at 72 bytes as the manifest format requires.
fn launch_manifest(main_class: &str, class_path: &[String]) -> String {
    let mut out = String::from("Manifest-Version: 1.0\r\n");
    out.push_str(&fold_manifest_line(&format!("Main-Class: {}", main_class)));
    out.push_str(&fold_manifest_line(&format!(
        "Class-Path: {}",
        class_path.join(" ")
    )));
    out.push_str("\r\n");
    out
}

fn fold_manifest_line(line: &str) -> String {
    let mut out = String::new();
    let mut width = 0;
    let limit = |first: bool| if first { 72 } else { 71 };
    let mut first = true;

    for ch in line.chars() {
        let len = ch.len_utf8();
        if width + len > limit(first) {
            out.push_str("\r\n ");
            width = 0;
            first = false;
        }
        out.push(ch);
        width += len;
    }
    out.push_str("\r\n");
    out
}

fn write_launch_jar(path: &Path, manifest: &str) -> Result<()> {
    let file = std::fs::File::create(path)?;
    let mut jar = zip::ZipWriter::new(file);
    jar.start_file("META-INF/MANIFEST.MF", SimpleFileOptions::default())?;
    jar.write_all(manifest.as_bytes())?;
    jar.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::installer::core::archive::read_entry;

    #[test]
    fn manifest_lines_are_folded() {
        let libs: Vec<String> = (0..5)
            .map(|i| format!("libraries/org/quiltmc/some-long-artifact-name/{i}.0/x-{i}.0.jar"))
            .collect();
        let manifest = launch_manifest("org.quiltmc.loader.impl.launch.knot.KnotServer", &libs);

        for line in manifest.split("\r\n") {
            assert!(line.len() <= 72, "line too long: {}", line);
        }
        let unfolded = manifest.replace("\r\n ", "");
        assert!(unfolded.contains(&format!("Class-Path: {}", libs.join(" "))));
    }

    #[test]
    fn launch_jar_contains_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let jar = tmp.path().join(LAUNCH_JAR);
        write_launch_jar(&jar, "Manifest-Version: 1.0\r\n\r\n").unwrap();

        let content = read_entry(&jar, "META-INF/MANIFEST.MF").unwrap().unwrap();
        assert!(String::from_utf8(content).unwrap().starts_with("Manifest-Version"));
    }
}
