use crate::Stage;

use thiserror::Error;

/// Invalid-argument conditions of the pipeline layer. These are
/// configuration bugs and are not worth retrying.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// A stage name outside the stage domain.
    #[error("unknown stage: {0}")]
    UnknownStage(String),

    /// A stage that is not part of the configured pipeline.
    #[error("stage {stage} is not configured (configured: {configured:?})")]
    NotConfigured {
        /// The stage asked about.
        stage: Stage,

        /// The configured pipeline.
        configured: Vec<Stage>,
    },
}
