use crate::{Error, Stage, Stages};

use serde::{Deserialize, Serialize};

/// Base queue name used when none is configured.
pub const DEFAULT_QUEUE_NAME: &str = "extract:queue";

/// Downstream stage assumed after the last configured one, or when nothing is configured.
pub const DEFAULT_TARGET: Stage = Stage::Nlp;

/// Computes queue names from a configured stage list and a base name.
///
/// Stage `s` reads from `<base>:<s>` unless it is the first configured stage,
/// and writes into the queue of the next configured stage. The configured list
/// is kept in pipeline order without duplicates, whatever order it was given in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineNamer {
    stages: Vec<Stage>,
    base: String,
}

impl PipelineNamer {
    /// Creates a namer for `stages` under `base`.
    pub fn new(stages: impl IntoIterator<Item = Stage>, base: impl Into<String>) -> Self {
        let mut stages: Vec<Stage> = stages.into_iter().collect();
        stages.sort_unstable();
        stages.dedup();

        Self {
            stages,
            base: base.into(),
        }
    }

    /// Creates a namer from a parsed stage list.
    pub fn from_stages(stages: &Stages, base: impl Into<String>) -> Self {
        Self::new(stages.as_slice().iter().copied(), base)
    }

    /// The configured stages in pipeline order.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// The base queue name.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// The first configured stage.
    #[must_use]
    pub fn first(&self) -> Option<Stage> {
        self.stages.first().copied()
    }

    /// Whether `stage` is configured.
    #[must_use]
    pub fn contains(&self, stage: Stage) -> bool {
        self.stages.binary_search(&stage).is_ok()
    }

    /// The configured stage following `stage`, if any.
    ///
    /// # Errors
    ///
    /// Fails if `stage` is not configured.
    pub fn next_after(&self, stage: Stage) -> Result<Option<Stage>, Error> {
        let position = self.position(stage)?;

        Ok(self.stages.get(position + 1).copied())
    }

    /// The queue `stage` writes its output into.
    ///
    /// Falls back to the [`DEFAULT_TARGET`] queue when `stage` is the last
    /// configured stage or when no stage is configured at all.
    ///
    /// # Errors
    ///
    /// Fails if stages are configured and `stage` is not one of them.
    pub fn output_queue_name(&self, stage: Stage) -> Result<String, Error> {
        if self.stages.is_empty() {
            return Ok(self.name_for(DEFAULT_TARGET));
        }

        let next = self.next_after(stage)?.unwrap_or(DEFAULT_TARGET);

        Ok(self.name_for(next))
    }

    /// The queue `stage` reads its input from, `None` for the first configured stage.
    ///
    /// With no configured stage every stage reads from its own queue.
    ///
    /// # Errors
    ///
    /// Fails if stages are configured and `stage` is not one of them.
    pub fn queue_name(&self, stage: Stage) -> Result<Option<String>, Error> {
        if self.stages.is_empty() {
            return Ok(Some(self.name_for(stage)));
        }

        match self.position(stage)? {
            0 => Ok(None),
            _ => Ok(Some(self.name_for(stage))),
        }
    }

    fn position(&self, stage: Stage) -> Result<usize, Error> {
        self.stages
            .binary_search(&stage)
            .map_err(|_| Error::NotConfigured {
                stage,
                configured: self.stages.clone(),
            })
    }

    fn name_for(&self, stage: Stage) -> String {
        format!("{}:{}", self.base, stage.lowercase())
    }
}

impl Default for PipelineNamer {
    fn default() -> Self {
        Self::new([], DEFAULT_QUEUE_NAME)
    }
}
