use crate::Error;

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A phase of the document pipeline. Declaration order is the pipeline order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    /// Walks a file tree and enqueues paths.
    Scan,
    /// Enqueues paths already present in the index.
    #[serde(rename = "SCANIDX")]
    ScanIdx,
    /// Drops paths already seen.
    Deduplicate,
    /// Extracts and indexes documents.
    Index,
    /// Enqueues indexed documents for NLP.
    #[serde(rename = "ENQUEUEIDX")]
    EnqueueIdx,
    /// Runs named-entity extraction.
    Nlp,
}

impl Stage {
    /// Every stage in pipeline order.
    pub const ALL: [Self; 6] = [
        Self::Scan,
        Self::ScanIdx,
        Self::Deduplicate,
        Self::Index,
        Self::EnqueueIdx,
        Self::Nlp,
    ];

    /// Configuration name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scan => "SCAN",
            Self::ScanIdx => "SCANIDX",
            Self::Deduplicate => "DEDUPLICATE",
            Self::Index => "INDEX",
            Self::EnqueueIdx => "ENQUEUEIDX",
            Self::Nlp => "NLP",
        }
    }

    /// Name used as a queue suffix.
    #[must_use]
    pub fn lowercase(self) -> String {
        self.as_str().to_lowercase()
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == upper)
            .ok_or_else(|| Error::UnknownStage(s.to_string()))
    }
}

/// A configured stage list, as given by the comma separated `stages` setting.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Stages(Vec<Stage>);

impl Stages {
    /// The stages as configured.
    #[must_use]
    pub fn as_slice(&self) -> &[Stage] {
        &self.0
    }

    /// Whether no stage is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Stage>> for Stages {
    fn from(stages: Vec<Stage>) -> Self {
        Self(stages)
    }
}

impl FromStr for Stages {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::parse::<Stage>)
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl TryFrom<String> for Stages {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Stages> for String {
    fn from(stages: Stages) -> Self {
        stages.to_string()
    }
}

impl Display for Stages {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(|stage| stage.as_str()).collect();
        f.write_str(&names.join(","))
    }
}
