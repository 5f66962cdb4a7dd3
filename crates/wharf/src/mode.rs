//! Classifies a deployment as container-only or hybrid-local-frontend.
//! Probes run in priority order and fail soft; detection never errors,
//! it returns a best-effort classification.

use std::fmt;
use std::path::Path;

use crate::compose::{ComposeRunner, FRONTEND_SERVICE};
use crate::frontend::FRONTEND_DIR;

pub const MODE_HINT_FILE: &str = ".wharf-mode";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentMode {
    ContainerOnly,
    HybridLocalFrontend,
}

impl DeploymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentMode::ContainerOnly => "container-only",
            DeploymentMode::HybridLocalFrontend => "hybrid-local-frontend",
        }
    }

    pub fn parse(s: &str) -> Option<DeploymentMode> {
        match s {
            "container-only" => Some(DeploymentMode::ContainerOnly),
            "hybrid-local-frontend" => Some(DeploymentMode::HybridLocalFrontend),
            _ => None,
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full detection: live container set first, then the local probes.
pub fn detect(project_dir: &Path, compose: &dyn ComposeRunner) -> DeploymentMode {
    if let Ok(services) = compose.running_services() {
        if services.iter().any(|s| s == FRONTEND_SERVICE) {
            return DeploymentMode::ContainerOnly;
        }
    }
    assume(project_dir)
}

/// Local probes only: the scaffolding hint file, then the frontend's
/// dependency-install directory. Used for plan rendering so a dry run never
/// touches the container runtime.
pub fn assume(project_dir: &Path) -> DeploymentMode {
    if let Ok(text) = std::fs::read_to_string(project_dir.join(MODE_HINT_FILE)) {
        if let Some(mode) = DeploymentMode::parse(text.trim()) {
            return mode;
        }
    }
    if project_dir.join(FRONTEND_DIR).join("node_modules").is_dir() {
        return DeploymentMode::HybridLocalFrontend;
    }
    DeploymentMode::ContainerOnly
}
