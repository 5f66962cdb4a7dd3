//! The upgrade orchestrator: validate -> resolve versions -> evaluate ->
//! render -> confirm -> detect mode -> dispatch -> report.

use std::path::Path;

use anyhow::{Context, Result};
use wharf_compat::evaluate::{CompatibilityReport, Evaluator};
use wharf_compat::fetch::ManifestFetcher;
use wharf_compat::semver::Version;

use crate::compose::ComposeRunner;
use crate::envfile::{self, BACKEND_VERSION_KEY, ENV_FILE_NAME};
use crate::mode::{self, DeploymentMode};
use crate::procedure::{self, ProcedureContext};
use crate::Reporter;

pub const COMPOSE_FILE_NAMES: [&str; 2] = ["docker-compose.yml", "compose.yaml"];

#[derive(Debug, Clone, Default)]
pub struct UpgradeOptions {
    pub target: Option<String>,
    pub dry_run: bool,
    pub force: bool,
}

/// Ephemeral; exists for one invocation and is only ever rendered.
#[derive(Debug, Clone)]
pub struct UpgradePlan {
    pub from: Version,
    pub to: Version,
    pub mode: DeploymentMode,
    pub report: CompatibilityReport,
    pub steps: Vec<String>,
}

#[derive(Debug)]
pub enum UpgradeOutcome {
    /// Validation failed before any network or service access.
    Invalid { message: String },
    AlreadyCurrent { version: Version },
    DryRunComplete { plan: UpgradePlan },
    Declined { plan: UpgradePlan },
    Completed { plan: UpgradePlan, followup: Vec<String> },
    DispatchFailed {
        plan: UpgradePlan,
        message: String,
        rollback: Vec<String>,
    },
}

impl UpgradeOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            UpgradeOutcome::Invalid { .. } | UpgradeOutcome::Declined { .. } => 1,
            UpgradeOutcome::DispatchFailed { .. } => 2,
            UpgradeOutcome::AlreadyCurrent { .. }
            | UpgradeOutcome::DryRunComplete { .. }
            | UpgradeOutcome::Completed { .. } => 0,
        }
    }
}

#[derive(Debug)]
pub enum Resolution {
    Invalid { message: String },
    UpToDate { version: Version },
    Hop {
        from: Version,
        to: Version,
        /// Released versions strictly between `from` and `to`, ascending.
        /// `None` means the release index was unreachable and the hop
        /// degrades to single-hop semantics against the explicit target.
        intermediates: Option<Vec<Version>>,
    },
}

/// Validate + ResolveVersions. Marker checks run before anything touches
/// the network.
pub fn resolve(
    project_dir: &Path,
    fetcher: &ManifestFetcher,
    target: Option<&str>,
    reporter: &Reporter,
) -> Result<Resolution> {
    if !project_dir.is_dir() {
        return Ok(Resolution::Invalid {
            message: format!("project directory not found: {}", project_dir.display()),
        });
    }
    if !COMPOSE_FILE_NAMES
        .iter()
        .any(|name| project_dir.join(name).is_file())
    {
        return Ok(Resolution::Invalid {
            message: format!(
                "not a wharf project: {} has no {}",
                project_dir.display(),
                COMPOSE_FILE_NAMES[0]
            ),
        });
    }
    let env_path = project_dir.join(ENV_FILE_NAME);
    if !env_path.is_file() {
        return Ok(Resolution::Invalid {
            message: format!("not a wharf project: missing {}", env_path.display()),
        });
    }
    let Some(current_raw) = envfile::read_value(&env_path, BACKEND_VERSION_KEY)? else {
        return Ok(Resolution::Invalid {
            message: format!("{} has no {BACKEND_VERSION_KEY}", env_path.display()),
        });
    };
    let Some(from) = Version::parse(&current_raw) else {
        return Ok(Resolution::Invalid {
            message: format!("invalid {BACKEND_VERSION_KEY} in {ENV_FILE_NAME}: {current_raw:?}"),
        });
    };

    match target {
        Some(raw) => {
            let Some(to) = Version::parse(raw) else {
                return Ok(Resolution::Invalid {
                    message: format!("invalid target version: {raw:?}"),
                });
            };
            if to == from {
                return Ok(Resolution::UpToDate { version: from });
            }
            if to < from {
                return Ok(Resolution::Invalid {
                    message: format!("downgrade {from} -> {to} is not supported"),
                });
            }
            let intermediates = match fetcher.release_versions() {
                Ok(versions) => Some(
                    versions
                        .into_iter()
                        .filter(|v| *v > from && *v < to)
                        .collect(),
                ),
                Err(err) => {
                    reporter.progress(&format!(
                        "release index unreachable ({err}); checking the target manifest only"
                    ));
                    None
                }
            };
            Ok(Resolution::Hop {
                from,
                to,
                intermediates,
            })
        }
        None => {
            let versions = fetcher
                .release_versions()
                .map_err(anyhow::Error::from)
                .context("resolve latest released version")?;
            let Some(to) = versions.last().copied() else {
                return Ok(Resolution::Invalid {
                    message: "release index lists no versions".to_string(),
                });
            };
            if to <= from {
                return Ok(Resolution::UpToDate { version: from });
            }
            let intermediates = versions
                .into_iter()
                .filter(|v| *v > from && *v < to)
                .collect();
            Ok(Resolution::Hop {
                from,
                to,
                intermediates: Some(intermediates),
            })
        }
    }
}

pub fn evaluate_hop(
    fetcher: &ManifestFetcher,
    from: Version,
    to: Version,
    intermediates: Option<&[Version]>,
) -> Result<CompatibilityReport> {
    let evaluator = Evaluator::new(fetcher);
    let report = match intermediates {
        Some(list) if !list.is_empty() => {
            let mut hops = list.to_vec();
            hops.push(to);
            evaluator.check_multi_hop(from, to, &hops)?
        }
        _ => evaluator.check_single_hop(from, to)?,
    };
    Ok(report)
}

fn render_plan(plan: &UpgradePlan, reporter: &Reporter) {
    reporter.progress(&format!("upgrade: {} -> {}", plan.from, plan.to));
    reporter.progress(&format!("mode: {} (assumed)", plan.mode));
    reporter.progress("steps:");
    for (idx, step) in plan.steps.iter().enumerate() {
        reporter.progress(&format!("  {}. {step}", idx + 1));
    }
    if !plan.report.warnings.is_empty() {
        reporter.progress("warnings:");
        for warning in &plan.report.warnings {
            reporter.progress(&format!("  {warning}"));
        }
    }
    if !plan.report.required_actions.is_empty() {
        reporter.progress("required actions:");
        for action in &plan.report.required_actions {
            reporter.progress(&format!("  - {action}"));
        }
    }
}

pub fn run_upgrade(
    project_dir: &Path,
    fetcher: &ManifestFetcher,
    compose: &dyn ComposeRunner,
    options: &UpgradeOptions,
    reporter: &Reporter,
    confirm: &mut dyn FnMut() -> Result<bool>,
) -> Result<UpgradeOutcome> {
    let resolution = resolve(project_dir, fetcher, options.target.as_deref(), reporter)?;
    let (from, to, intermediates) = match resolution {
        Resolution::Invalid { message } => return Ok(UpgradeOutcome::Invalid { message }),
        Resolution::UpToDate { version } => {
            reporter.progress(&format!("already on {version}; nothing to do"));
            return Ok(UpgradeOutcome::AlreadyCurrent { version });
        }
        Resolution::Hop {
            from,
            to,
            intermediates,
        } => (from, to, intermediates),
    };

    let report = evaluate_hop(fetcher, from, to, intermediates.as_deref())?;

    // The plan is rendered against the local signals only; a dry run never
    // touches the container runtime.
    let assumed = mode::assume(project_dir);
    let mut plan = UpgradePlan {
        from,
        to,
        mode: assumed,
        report,
        steps: procedure::steps_for(assumed, to),
    };
    render_plan(&plan, reporter);

    if options.dry_run {
        reporter.progress("dry run; nothing was changed");
        return Ok(UpgradeOutcome::DryRunComplete { plan });
    }

    if plan.report.breaking && !options.force && !confirm()? {
        reporter.progress("upgrade aborted; nothing was changed");
        return Ok(UpgradeOutcome::Declined { plan });
    }

    let mode = mode::detect(project_dir, compose);
    if mode != plan.mode {
        reporter.progress(&format!("detected mode: {mode}"));
        plan.mode = mode;
        plan.steps = procedure::steps_for(mode, to);
    }

    let ctx = ProcedureContext {
        project_dir,
        from,
        to,
        compose,
        reporter,
    };
    match procedure::run(mode, &ctx) {
        Ok(followup) => Ok(UpgradeOutcome::Completed { plan, followup }),
        Err(err) => Ok(UpgradeOutcome::DispatchFailed {
            plan,
            message: format!("{err:#}"),
            rollback: procedure::rollback_instructions(mode, from),
        }),
    }
}
