//! The two upgrade procedures. Dispatch is an explicit match on the
//! deployment mode; each procedure is a linear stop -> pull -> reconfigure
//! -> (rebuild) -> restart -> health-verify sequence against the compose
//! collaborator. Interrupting mid-step may leave services stopped; the
//! rollback instructions are the recovery path.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use wharf_compat::semver::Version;

use crate::compose::{ComposeRunner, ALL_SERVICES, BACKEND_SERVICES, FRONTEND_SERVICE};
use crate::envfile::{self, BACKEND_VERSION_KEY, ENV_FILE_NAME};
use crate::frontend::{self, PackageManager, FRONTEND_DIR, RELEASE_NOTES_URL, UI_PACKAGE};
use crate::mode::DeploymentMode;
use crate::Reporter;

const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(2);
const HEALTH_POLL_ATTEMPTS: u32 = 30;

pub struct ProcedureContext<'a> {
    pub project_dir: &'a Path,
    pub from: Version,
    pub to: Version,
    pub compose: &'a dyn ComposeRunner,
    pub reporter: &'a Reporter,
}

pub fn run(mode: DeploymentMode, ctx: &ProcedureContext<'_>) -> Result<Vec<String>> {
    ctx.reporter.progress(&format!(
        "{mode} upgrade {} -> {}",
        ctx.from, ctx.to
    ));
    match mode {
        DeploymentMode::ContainerOnly => run_container_only(ctx),
        DeploymentMode::HybridLocalFrontend => run_hybrid_local_frontend(ctx),
    }
}

pub fn steps_for(mode: DeploymentMode, to: Version) -> Vec<String> {
    match mode {
        DeploymentMode::ContainerOnly => vec![
            "stop all services".to_string(),
            format!("pull backend images ({})", BACKEND_SERVICES.join(", ")),
            format!("pin {UI_PACKAGE} {to} in {FRONTEND_DIR}/package.json"),
            format!("set {BACKEND_VERSION_KEY}={to} in {ENV_FILE_NAME}"),
            format!("rebuild the {FRONTEND_SERVICE} image"),
            "start all services".to_string(),
            "wait for all services to report healthy".to_string(),
        ],
        DeploymentMode::HybridLocalFrontend => vec![
            "stop managed services".to_string(),
            format!("pull backend images ({})", BACKEND_SERVICES.join(", ")),
            format!("set {BACKEND_VERSION_KEY}={to} in {ENV_FILE_NAME}"),
            format!("start backend services ({FRONTEND_SERVICE} stays yours)"),
            "wait for backend services to report healthy".to_string(),
            "print manual frontend upgrade instructions".to_string(),
        ],
    }
}

/// Rollback always starts from the pinned-version file; it is the single
/// source of truth for which version a project runs.
pub fn rollback_instructions(mode: DeploymentMode, from: Version) -> Vec<String> {
    let mut out = vec![format!(
        "set {BACKEND_VERSION_KEY}={from} in {ENV_FILE_NAME}"
    )];
    match mode {
        DeploymentMode::ContainerOnly => {
            out.push(format!(
                "restore \"{UI_PACKAGE}\": \"{from}\" in {FRONTEND_DIR}/package.json"
            ));
            out.push(format!("docker compose pull {}", BACKEND_SERVICES.join(" ")));
            out.push(format!("docker compose build {FRONTEND_SERVICE}"));
            out.push("docker compose up -d".to_string());
        }
        DeploymentMode::HybridLocalFrontend => {
            out.push(format!("docker compose pull {}", BACKEND_SERVICES.join(" ")));
            out.push(format!("docker compose up -d {}", BACKEND_SERVICES.join(" ")));
        }
    }
    out
}

fn run_container_only(ctx: &ProcedureContext<'_>) -> Result<Vec<String>> {
    ctx.reporter.progress("stop services");
    ctx.compose.stop_all().context("stop services")?;

    for service in BACKEND_SERVICES {
        ctx.reporter.progress(&format!("pull {service}"));
        ctx.compose
            .pull(service)
            .with_context(|| format!("pull {service}"))?;
    }

    ctx.reporter
        .progress(&format!("pin {UI_PACKAGE} {}", ctx.to));
    frontend::set_ui_dependency(&ctx.project_dir.join(FRONTEND_DIR), ctx.to)
        .context("update frontend dependency")?;

    write_pinned_version(ctx)?;

    ctx.reporter.progress(&format!("build {FRONTEND_SERVICE}"));
    ctx.compose
        .build(FRONTEND_SERVICE)
        .with_context(|| format!("build {FRONTEND_SERVICE}"))?;

    ctx.reporter.progress("start services");
    ctx.compose.start(&ALL_SERVICES).context("start services")?;
    wait_healthy(ctx, &ALL_SERVICES)?;

    Ok(vec![format!(
        "all services are back up on {}; run `docker compose logs -f` to watch them settle",
        ctx.to
    )])
}

/// Never touches the frontend's sources or its dependency manifest; the
/// user upgrades those themselves.
fn run_hybrid_local_frontend(ctx: &ProcedureContext<'_>) -> Result<Vec<String>> {
    ctx.reporter.progress("stop services");
    ctx.compose.stop_all().context("stop services")?;

    for service in BACKEND_SERVICES {
        ctx.reporter.progress(&format!("pull {service}"));
        ctx.compose
            .pull(service)
            .with_context(|| format!("pull {service}"))?;
    }

    write_pinned_version(ctx)?;

    ctx.reporter.progress("start backend services");
    ctx.compose
        .start(&BACKEND_SERVICES)
        .context("start backend services")?;
    wait_healthy(ctx, &BACKEND_SERVICES)?;

    let frontend_dir = ctx.project_dir.join(FRONTEND_DIR);
    let manager = PackageManager::detect(&frontend_dir);
    let mut followup = vec![
        "backend services are up; finish the frontend upgrade yourself:".to_string(),
        format!("  {}", manager.upgrade_command(UI_PACKAGE, ctx.to)),
        format!("  release notes: {RELEASE_NOTES_URL}"),
    ];
    if frontend::worktree_dirty(ctx.project_dir) == Some(true) {
        followup.push(format!(
            "  note: {FRONTEND_DIR}/ has uncommitted changes; commit or stash them first"
        ));
    }
    Ok(followup)
}

fn write_pinned_version(ctx: &ProcedureContext<'_>) -> Result<()> {
    ctx.reporter
        .progress(&format!("set {BACKEND_VERSION_KEY}={}", ctx.to));
    envfile::write_value(
        &ctx.project_dir.join(ENV_FILE_NAME),
        BACKEND_VERSION_KEY,
        &ctx.to.to_string(),
    )
    .context("update pinned version")
}

/// Bounded poll: a fixed interval for a fixed number of attempts. A query
/// failure counts as not-yet-healthy and the loop keeps going.
fn wait_healthy(ctx: &ProcedureContext<'_>, services: &[&str]) -> Result<()> {
    ctx.reporter.progress("wait for services to report healthy");
    let mut pending: Vec<&str> = services.to_vec();
    for attempt in 1..=HEALTH_POLL_ATTEMPTS {
        pending.retain(|service| !matches!(ctx.compose.service_healthy(service), Ok(true)));
        if pending.is_empty() {
            return Ok(());
        }
        if attempt < HEALTH_POLL_ATTEMPTS {
            std::thread::sleep(HEALTH_POLL_INTERVAL);
        }
    }
    bail!(
        "services did not report healthy within {}s: {}",
        HEALTH_POLL_INTERVAL.as_secs() * u64::from(HEALTH_POLL_ATTEMPTS),
        pending.join(", ")
    )
}
