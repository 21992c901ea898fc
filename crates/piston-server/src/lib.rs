//! Set up and run Minecraft servers: resolve versions, install vanilla or a
//! mod loader, unpack modpacks, recognise existing server directories and
//! supervise the server process.

pub mod error;
pub mod server;
pub mod utils;

pub use error::{Result, SetupError};
pub use server::detect::{detect, Detection, ServerKind};
pub use server::installation::ServerInstallation;
pub use server::installer::config::SetupConfig;
pub use server::installer::resolver::{GameVersionSelector, VersionResolver};
pub use server::installer::types::{
    CancelToken, ChannelProgressReporter, InstallEvent, ModloaderType, ProgressReporter,
    SilentProgressReporter,
};
pub use server::installer::{ServerRequest, ServerSetup};
pub use server::modpack::{PackExtractor, PackInstallReport};
pub use server::supervisor::{ProcessSupervisor, ServerState, SupervisorConfig, SupervisorEvent};
