use std::path::PathBuf;

/// Which of the three pipeline stages this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StageKind {
    Gatekeeper,
    AgeScreener,
    RegionClassifier,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Gatekeeper => "gatekeeper",
            StageKind::AgeScreener => "age_screener",
            StageKind::RegionClassifier => "region_classifier",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            StageKind::Gatekeeper => "Human Face Detection Gateway",
            StageKind::AgeScreener => "Age Screening Gateway",
            StageKind::RegionClassifier => "Facial Region Classifier",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StageConfig {
    pub kind: StageKind,
    pub host: String,
    pub port: u16,
    /// Base URL of the next stage; `None` for the terminal stage.
    pub downstream_url: Option<String>,
    pub data_dir: PathBuf,
}

impl StageConfig {
    /// `PORT` env var, default 8000.
    pub fn port_from_env() -> u16 {
        std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(StageKind::Gatekeeper.as_str(), "gatekeeper");
        assert_eq!(StageKind::RegionClassifier.as_str(), "region_classifier");
    }
}
