#[cfg(windows)]
use std::os::windows::process::CommandExt;
use std::process::Stdio;

/// Extension trait for spawning the Java processes the server tooling runs.
pub trait PistonCommandExt {
    /// Hides the console window on Windows. No-op on other platforms.
    fn suppress_console(&mut self) -> &mut Self;

    /// Pipe stdin, stdout and stderr so the caller can drive the console.
    fn piped_console(&mut self) -> &mut Self;
}

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

impl PistonCommandExt for tokio::process::Command {
    fn suppress_console(&mut self) -> &mut Self {
        #[cfg(windows)]
        {
            self.creation_flags(CREATE_NO_WINDOW);
        }
        self
    }

    fn piped_console(&mut self) -> &mut Self {
        self.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
    }
}
