use dossier_bootable::BootableError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The NLP pool failed to start or stop.
    #[error("nlp pool: {0}")]
    Bootable(BootableError),

    /// Logging could not be installed.
    #[error(transparent)]
    Logging(#[from] tracing::subscriber::SetGlobalDefaultError),

    /// The configured stages do not include NLP.
    #[error(transparent)]
    Pipeline(#[from] dossier_pipeline::Error),

    /// The bus or a queue could not be built.
    #[error(transparent)]
    Transport(#[from] dossier_transport::Error),
}

impl From<BootableError> for Error {
    fn from(error: BootableError) -> Self {
        Self::Bootable(error)
    }
}
