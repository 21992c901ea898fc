pub mod extractor;
pub mod parser;
pub mod types;

pub use extractor::{CurseForgeResolver, PackExtractor, PackInstallReport, ResolvedPackFile};
pub use parser::read_manifest;
pub use types::*;
