pub mod hardware;
pub mod maven;
pub mod process;
pub mod version;
