use crate::patch::BuildVariant;
use snafu::Snafu;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility = "pub(crate)")]
pub enum Error {
    #[snafu(display("Unable to read patch document {}: {}", path.display(), source))]
    ReadDocument {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "Duplicate write to address {:08X} in patch {:?} for {} (line {})",
        address,
        name,
        variant,
        line
    ))]
    DuplicateAddress {
        name: String,
        variant: BuildVariant,
        address: u32,
        line: usize,
    },
    #[snafu(display("Unable to create output directory {}: {}", path.display(), source))]
    CreateOutputDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Unable to write {}: {}", path.display(), source))]
    WriteArtifact {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Unable to serialize patch model: {}", source))]
    SerializeModel { source: serde_json::Error },
    #[snafu(display("Unable to write patch model to {}: {}", path.display(), source))]
    WriteModel {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("An emitter worker panicked"))]
    WorkerPanicked,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
