use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use wharf_compat::fetch::{ManifestFetcher, DEFAULT_REGISTRY_URL};
use wharf_compat::store::ManifestStore;

mod compose;
mod envfile;
mod frontend;
mod mode;
mod procedure;
mod upgrade;

use upgrade::{Resolution, UpgradeOptions, UpgradeOutcome};

const UPGRADE_SCHEMA_VERSION: &str = "wharf.upgrade.report@0.1.0";
const CHECK_SCHEMA_VERSION: &str = "wharf.check.report@0.1.0";
const CACHE_LIST_SCHEMA_VERSION: &str = "wharf.cache.list@0.1.0";

#[derive(Debug, Parser)]
#[command(name = "wharf")]
#[command(about = "Wharf deployment manager.", long_about = None)]
struct Cli {
    #[arg(long, global = true, default_value = DEFAULT_REGISTRY_URL)]
    registry: String,

    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upgrade a project's deployment to a newer backend version.
    Upgrade(UpgradeArgs),
    /// Evaluate compatibility without changing anything.
    Check(CheckArgs),
    /// Manage the local compatibility-manifest cache.
    Cache(CacheArgs),
}

#[derive(Debug, Args)]
struct UpgradeArgs {
    #[arg(default_value = ".")]
    project_dir: PathBuf,

    /// Target version (default: latest published release).
    #[arg(long)]
    version: Option<String>,

    #[arg(long)]
    dry_run: bool,

    /// Skip the breaking-change confirmation prompt.
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Args)]
struct CheckArgs {
    #[arg(default_value = ".")]
    project_dir: PathBuf,

    #[arg(long)]
    version: Option<String>,
}

#[derive(Debug, Args)]
struct CacheArgs {
    #[command(subcommand)]
    cmd: CacheCmd,
}

#[derive(Debug, Subcommand)]
enum CacheCmd {
    List,
    Clear,
}

#[derive(Debug)]
pub struct Reporter {
    pub json: bool,
    pub quiet: bool,
}

impl Reporter {
    pub fn progress(&self, msg: &str) {
        if self.json || self.quiet {
            return;
        }
        eprintln!("{msg}");
    }
}

fn main() -> std::process::ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            std::process::ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<std::process::ExitCode> {
    let cli = Cli::parse();
    let home = effective_home(cli.home)?;
    let reporter = Reporter {
        json: cli.json,
        quiet: cli.quiet,
    };

    match cli.cmd {
        Command::Upgrade(args) => cmd_upgrade(&home, &cli.registry, args, &reporter),
        Command::Check(args) => cmd_check(&home, &cli.registry, args, &reporter),
        Command::Cache(args) => cmd_cache(&home, args, &reporter),
    }
}

fn effective_home(home: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(home) = home {
        return Ok(home);
    }
    if let Some(v) = std::env::var_os("WHARF_HOME") {
        if !v.is_empty() {
            return Ok(PathBuf::from(v));
        }
    }
    Ok(home_dir()?.join(".wharf"))
}

fn home_dir() -> Result<PathBuf> {
    if let Some(v) = std::env::var_os("HOME") {
        if !v.is_empty() {
            return Ok(PathBuf::from(v));
        }
    }
    if let Some(v) = std::env::var_os("USERPROFILE") {
        if !v.is_empty() {
            return Ok(PathBuf::from(v));
        }
    }
    bail!("could not determine home directory (HOME/USERPROFILE); pass --home")
}

fn manifests_dir(home: &Path) -> PathBuf {
    home.join("cache").join("manifests")
}

fn new_fetcher(home: &Path, registry: &str) -> Result<ManifestFetcher> {
    let store = ManifestStore::new(manifests_dir(home));
    ManifestFetcher::new(registry, store)
}

#[derive(Debug, Serialize)]
struct ErrorReport {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

#[derive(Debug, Serialize)]
struct UpgradeReport {
    schema_version: &'static str,
    ok: bool,
    dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    from_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    to_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    breaking: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    required_actions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    followup: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    rollback: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorReport>,
}

fn cmd_upgrade(
    home: &Path,
    registry: &str,
    args: UpgradeArgs,
    reporter: &Reporter,
) -> Result<std::process::ExitCode> {
    let fetcher = new_fetcher(home, registry)?;
    let compose = compose::DockerCompose::new(&args.project_dir);
    let options = UpgradeOptions {
        target: args.version,
        dry_run: args.dry_run,
        force: args.force,
    };
    let mut confirm = confirm_from_stdin;
    let outcome = upgrade::run_upgrade(
        &args.project_dir,
        &fetcher,
        &compose,
        &options,
        reporter,
        &mut confirm,
    )?;

    let mut report = UpgradeReport {
        schema_version: UPGRADE_SCHEMA_VERSION,
        ok: outcome.exit_code() == 0,
        dry_run: options.dry_run,
        from_version: None,
        to_version: None,
        mode: None,
        breaking: None,
        warnings: Vec::new(),
        required_actions: Vec::new(),
        followup: Vec::new(),
        rollback: Vec::new(),
        error: None,
    };

    match &outcome {
        UpgradeOutcome::Invalid { message } => {
            report.error = Some(ErrorReport {
                code: "WHARF_VALIDATION".to_string(),
                message: message.clone(),
                hint: None,
            });
            if !reporter.json {
                println!("error: {message}");
            }
        }
        UpgradeOutcome::AlreadyCurrent { version } => {
            report.from_version = Some(version.to_string());
            report.to_version = Some(version.to_string());
            if !reporter.json {
                println!("ok: already on {version}");
            }
        }
        UpgradeOutcome::DryRunComplete { plan } => {
            fill_plan(&mut report, plan);
            if !reporter.json {
                println!("ok: dry run for {} -> {}", plan.from, plan.to);
            }
        }
        UpgradeOutcome::Declined { plan } => {
            fill_plan(&mut report, plan);
            report.error = Some(ErrorReport {
                code: "WHARF_CONFIRM_DECLINED".to_string(),
                message: "upgrade declined; no changes were made".to_string(),
                hint: Some("re-run with --force to skip the confirmation".to_string()),
            });
            if !reporter.json {
                println!("declined: no changes were made");
            }
        }
        UpgradeOutcome::Completed { plan, followup } => {
            fill_plan(&mut report, plan);
            report.followup = followup.clone();
            if !reporter.json {
                println!("ok: upgraded {} -> {}", plan.from, plan.to);
                for line in followup {
                    println!("{line}");
                }
            }
        }
        UpgradeOutcome::DispatchFailed {
            plan,
            message,
            rollback,
        } => {
            fill_plan(&mut report, plan);
            report.rollback = rollback.clone();
            report.error = Some(ErrorReport {
                code: "WHARF_DISPATCH_FAILED".to_string(),
                message: message.clone(),
                hint: None,
            });
            if !reporter.json {
                println!("error: upgrade failed: {message}");
                println!("rollback:");
                for (idx, line) in rollback.iter().enumerate() {
                    println!("  {}. {line}", idx + 1);
                }
            }
        }
    }

    if reporter.json {
        write_json_stdout(&report)?;
    }
    Ok(std::process::ExitCode::from(outcome.exit_code()))
}

fn fill_plan(report: &mut UpgradeReport, plan: &upgrade::UpgradePlan) {
    report.from_version = Some(plan.from.to_string());
    report.to_version = Some(plan.to.to_string());
    report.mode = Some(plan.mode.as_str());
    report.breaking = Some(plan.report.breaking);
    report.warnings = plan.report.warnings.clone();
    report.required_actions = plan.report.required_actions.clone();
}

fn confirm_from_stdin() -> Result<bool> {
    eprint!("breaking changes detected; continue? [y/N] ");
    std::io::stderr().flush().ok();
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("read confirmation")?;
    let answer = line.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}

#[derive(Debug, Serialize)]
struct CheckReport {
    schema_version: &'static str,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    from_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    to_version: Option<String>,
    up_to_date: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    breaking: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    required_actions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorReport>,
}

fn cmd_check(
    home: &Path,
    registry: &str,
    args: CheckArgs,
    reporter: &Reporter,
) -> Result<std::process::ExitCode> {
    let fetcher = new_fetcher(home, registry)?;
    match upgrade::resolve(&args.project_dir, &fetcher, args.version.as_deref(), reporter)? {
        Resolution::Invalid { message } => {
            if reporter.json {
                write_json_stdout(&CheckReport {
                    schema_version: CHECK_SCHEMA_VERSION,
                    ok: false,
                    from_version: None,
                    to_version: None,
                    up_to_date: false,
                    breaking: None,
                    warnings: Vec::new(),
                    required_actions: Vec::new(),
                    error: Some(ErrorReport {
                        code: "WHARF_VALIDATION".to_string(),
                        message: message.clone(),
                        hint: None,
                    }),
                })?;
            } else {
                println!("error: {message}");
            }
            Ok(std::process::ExitCode::from(1))
        }
        Resolution::UpToDate { version } => {
            if reporter.json {
                write_json_stdout(&CheckReport {
                    schema_version: CHECK_SCHEMA_VERSION,
                    ok: true,
                    from_version: Some(version.to_string()),
                    to_version: Some(version.to_string()),
                    up_to_date: true,
                    breaking: None,
                    warnings: Vec::new(),
                    required_actions: Vec::new(),
                    error: None,
                })?;
            } else {
                println!("ok: {version} is up to date");
            }
            Ok(std::process::ExitCode::SUCCESS)
        }
        Resolution::Hop {
            from,
            to,
            intermediates,
        } => {
            let report = upgrade::evaluate_hop(&fetcher, from, to, intermediates.as_deref())?;
            if reporter.json {
                write_json_stdout(&CheckReport {
                    schema_version: CHECK_SCHEMA_VERSION,
                    ok: true,
                    from_version: Some(from.to_string()),
                    to_version: Some(to.to_string()),
                    up_to_date: false,
                    breaking: Some(report.breaking),
                    warnings: report.warnings.clone(),
                    required_actions: report.required_actions.clone(),
                    error: None,
                })?;
            } else {
                println!(
                    "{}: {} -> {}",
                    if report.breaking {
                        "breaking"
                    } else {
                        "compatible"
                    },
                    from,
                    to
                );
                for warning in &report.warnings {
                    println!("  {warning}");
                }
                for action in &report.required_actions {
                    println!("  action: {action}");
                }
            }
            Ok(std::process::ExitCode::SUCCESS)
        }
    }
}

#[derive(Debug, Serialize)]
struct CacheListReport {
    schema_version: &'static str,
    ok: bool,
    root: String,
    versions: Vec<String>,
}

fn cmd_cache(
    home: &Path,
    args: CacheArgs,
    reporter: &Reporter,
) -> Result<std::process::ExitCode> {
    let store = ManifestStore::new(manifests_dir(home));
    match args.cmd {
        CacheCmd::List => {
            let versions: Vec<String> = store.list()?.into_iter().collect();
            if reporter.json {
                write_json_stdout(&CacheListReport {
                    schema_version: CACHE_LIST_SCHEMA_VERSION,
                    ok: true,
                    root: store.root().display().to_string(),
                    versions,
                })?;
            } else {
                for version in versions {
                    println!("{version}");
                }
            }
            Ok(std::process::ExitCode::SUCCESS)
        }
        CacheCmd::Clear => {
            store.clear()?;
            reporter.progress("manifest cache cleared");
            Ok(std::process::ExitCode::SUCCESS)
        }
    }
}

fn write_json_stdout<T: Serialize>(v: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec(v)?;
    bytes.push(b'\n');
    std::io::stdout()
        .write_all(&bytes)
        .context("write stdout")?;
    Ok(())
}
