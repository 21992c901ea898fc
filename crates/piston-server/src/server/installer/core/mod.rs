pub mod archive;
pub mod batch;
pub mod downloader;
pub mod traits;
