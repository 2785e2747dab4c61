//! bbox - concurrent TeamCity orchestration
//!
//! ## Commands
//!
//! - `multi-trigger`: trigger many builds at once, wait, collect artifacts
//! - `clean vcs`: find VCS roots nothing uses and delete them
//! - `clean queue`: drop every queued build
//! - `version`: print the version

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, Level};

use bbox_core::metrics::METRICS;
use bbox_core::telemetry::{init_tracing, parse_level};
use bbox_core::{
    parse_combinations, render_root_report, CiService, CleanupConfig, FanOut, MultiTrigger,
    RunConfig, UnusedRootCleaner, VcsRootRef, DEFAULT_WIDTH,
};
use teamcity_client::{TeamCityClient, TeamCityConfig};

const EXIT_SUCCESS: u8 = 0;
/// Exit code when at least one build or deletion failed.
const EXIT_UNIT_FAILURE: u8 = 2;
/// Exit code for setup errors before anything was dispatched.
const EXIT_SETUP_FAILURE: u8 = 1;

#[derive(Parser)]
#[command(name = "bbox")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Trigger, wait for and clean up TeamCity builds concurrently", long_about = None)]
struct Cli {
    /// TeamCity server URL
    #[arg(long, env = "TEAMCITY_URL", global = true)]
    teamcity_url: Option<String>,

    /// TeamCity user
    #[arg(long, env = "TEAMCITY_USERNAME", global = true)]
    teamcity_username: Option<String>,

    /// TeamCity password or access token
    #[arg(long, env = "TEAMCITY_PASSWORD", hide_env_values = true, global = true)]
    teamcity_password: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Shortcut for --log-level debug
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Maximum number of concurrent calls against the server
    #[arg(long, default_value_t = DEFAULT_WIDTH, global = true)]
    concurrency: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trigger several builds concurrently and report on each
    MultiTrigger {
        /// Build to trigger as 'buildTypeId;branch;download;key=value&key2=value2'
        #[arg(
            short = 'c',
            long = "build-params-combination",
            visible_alias = "combination",
            required = true
        )]
        combinations: Vec<String>,

        /// Directory artifacts are unpacked into
        #[arg(long, default_value = "./")]
        artifacts_path: PathBuf,

        /// Wait for each build to finish (`-w`, `-w true` or `-w false`)
        #[arg(
            short = 'w',
            long,
            default_value_t = true,
            num_args = 0..=1,
            default_missing_value = "true",
            action = clap::ArgAction::Set
        )]
        wait_for_builds: bool,

        /// Per-build wait limit, e.g. `15m`, `1h30m` or plain seconds
        #[arg(
            short = 't',
            long = "wait-timeout",
            default_value = "15m",
            value_parser = parse_wait_timeout
        )]
        wait_timeout: Duration,

        /// Fail a build whose requested artifacts never appear
        #[arg(long)]
        require_artifacts: bool,

        /// How many times to look for artifacts on a finished build
        #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..))]
        artifact_check_attempts: u32,

        /// Report format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Remove unused server resources
    Clean {
        #[command(subcommand)]
        action: CleanAction,
    },

    /// Print the bbox version
    Version,
}

#[derive(Subcommand)]
enum CleanAction {
    /// Delete VCS roots with no instances that no template references
    Vcs {
        /// Delete without asking
        #[arg(short = 'c', long)]
        confirm: bool,
    },

    /// Remove every build waiting in the queue
    Queue,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        match parse_level(&cli.log_level) {
            Some(level) => level,
            None => {
                eprintln!("error: invalid --log-level '{}'", cli.log_level);
                return ExitCode::from(EXIT_SETUP_FAILURE);
            }
        }
    };
    init_tracing(cli.json, level);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_SETUP_FAILURE
        }
    };
    METRICS.flush();
    ExitCode::from(code)
}

async fn run(cli: Cli) -> Result<u8> {
    match &cli.command {
        Commands::Version => {
            cmd_version();
            Ok(EXIT_SUCCESS)
        }
        Commands::MultiTrigger {
            combinations,
            artifacts_path,
            wait_for_builds,
            wait_timeout,
            require_artifacts,
            artifact_check_attempts,
            output,
        } => {
            let config = RunConfig {
                wait_for_builds: *wait_for_builds,
                wait_timeout: *wait_timeout,
                artifacts_path: artifacts_path.clone(),
                artifact_check_attempts: *artifact_check_attempts,
            };
            let fanout = FanOut::new(cli.concurrency).context("Invalid --concurrency")?;
            cmd_multi_trigger(
                connect(&cli)?,
                fanout,
                config,
                combinations,
                *require_artifacts,
                *output,
            )
            .await
        }
        Commands::Clean { action } => match action {
            CleanAction::Vcs { confirm } => {
                let fanout = FanOut::new(cli.concurrency).context("Invalid --concurrency")?;
                cmd_clean_vcs(connect(&cli)?, fanout, *confirm, prompt_delete).await
            }
            CleanAction::Queue => cmd_clean_queue(connect(&cli)?).await,
        },
    }
}

/// Build the TeamCity client from the global flags.
fn connect(cli: &Cli) -> Result<Arc<dyn CiService>> {
    let config = TeamCityConfig::new(cli.teamcity_url.as_deref().unwrap_or_default())
        .with_credentials(
            cli.teamcity_username.as_deref().unwrap_or_default(),
            cli.teamcity_password.as_deref().unwrap_or_default(),
        );
    let client = TeamCityClient::new(config).context("Failed to set up TeamCity client")?;
    info!(server = %client.base_url(), "using TeamCity server");
    Ok(Arc::new(client))
}

/// Trigger every combination and print the consolidated report
async fn cmd_multi_trigger(
    service: Arc<dyn CiService>,
    fanout: FanOut,
    config: RunConfig,
    combinations: &[String],
    require_artifacts: bool,
    output: OutputFormat,
) -> Result<u8> {
    let requests = parse_combinations(combinations, require_artifacts)
        .context("Invalid build combination")?;
    info!(
        builds = requests.len(),
        width = fanout.width(),
        wait = config.wait_for_builds,
        "triggering builds"
    );

    let report = MultiTrigger::new(service, config, fanout).run(requests).await;

    match output {
        OutputFormat::Table => {
            println!("{}", report.render_table());
            println!(
                "{} build(s): {} passed, {} failed",
                report.results.len(),
                report.passed_count(),
                report.failed_count()
            );
        }
        OutputFormat::Json => {
            println!("{}", report.to_json().context("Failed to encode report")?);
        }
    }

    Ok(if report.any_failed() {
        EXIT_UNIT_FAILURE
    } else {
        EXIT_SUCCESS
    })
}

/// Discover unused VCS roots and delete them once confirmed
async fn cmd_clean_vcs<F>(
    service: Arc<dyn CiService>,
    fanout: FanOut,
    auto_confirm: bool,
    confirm: F,
) -> Result<u8>
where
    F: FnOnce(&[VcsRootRef]) -> bool,
{
    let cleaner = UnusedRootCleaner::new(
        service,
        fanout,
        CleanupConfig {
            auto_confirm_delete: auto_confirm,
        },
    );
    let report = cleaner
        .run(confirm)
        .await
        .context("Failed to discover unused VCS roots")?;

    println!("{}", render_root_report(&report));

    Ok(if report.has_problems() {
        EXIT_UNIT_FAILURE
    } else {
        EXIT_SUCCESS
    })
}

/// Clear the server's build queue
async fn cmd_clean_queue(service: Arc<dyn CiService>) -> Result<u8> {
    service
        .clear_queue()
        .await
        .context("Failed to clear the build queue")?;
    println!("Build queue cleared.");
    Ok(EXIT_SUCCESS)
}

/// Parse a wait limit such as `90`, `45s`, `10m` or `1h30m`.
///
/// A bare number is seconds. Units are `h`, `m`, `s` and `ms`.
fn parse_wait_timeout(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = raw;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(format!("invalid duration '{raw}': expected a number"));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|e| format!("invalid duration '{raw}': {e}"))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "h" => Duration::from_secs(value.saturating_mul(3600)),
            "m" => Duration::from_secs(value.saturating_mul(60)),
            "s" => Duration::from_secs(value),
            "ms" => Duration::from_millis(value),
            "" => return Err(format!("invalid duration '{raw}': missing unit after {value}")),
            unit => return Err(format!("invalid duration '{raw}': unknown unit '{unit}'")),
        };
        total = total.saturating_add(part);
        rest = &rest[unit_len..];
    }
    Ok(total)
}

fn cmd_version() {
    println!("bbox {}", env!("CARGO_PKG_VERSION"));
}

/// List the candidates and ask on stdin.
fn prompt_delete(candidates: &[VcsRootRef]) -> bool {
    println!("Unused VCS roots:");
    for root in candidates {
        println!("  {}  {}", root.id, root.name);
    }
    print!("Delete {} VCS root(s)? [y/N] ", candidates.len());
    if std::io::stdout().flush().is_err() {
        return false;
    }

    let mut answer = String::new();
    match std::io::stdin().lock().read_line(&mut answer) {
        Ok(_) => is_yes(&answer),
        Err(_) => false,
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bbox_core::fakes::{BuildScript, FakeCiService};

    fn fake(service: FakeCiService) -> (Arc<FakeCiService>, Arc<dyn CiService>) {
        let service = Arc::new(service);
        let dyn_service = Arc::clone(&service) as Arc<dyn CiService>;
        (service, dyn_service)
    }

    #[test]
    fn test_multi_trigger_args_parse_with_defaults() {
        let cli = Cli::try_parse_from([
            "bbox",
            "--teamcity-url",
            "http://tc:8111",
            "multi-trigger",
            "-c",
            "bt1;main;true;",
            "-c",
            "bt2;dev;false;env.A=1",
        ])
        .unwrap();

        assert_eq!(cli.concurrency, DEFAULT_WIDTH);
        match cli.command {
            Commands::MultiTrigger {
                combinations,
                wait_for_builds,
                wait_timeout,
                artifact_check_attempts,
                output,
                ..
            } => {
                assert_eq!(combinations.len(), 2);
                assert!(wait_for_builds);
                assert_eq!(wait_timeout, Duration::from_secs(900));
                assert_eq!(artifact_check_attempts, 5);
                assert_eq!(output, OutputFormat::Table);
            }
            _ => panic!("expected multi-trigger"),
        }
    }

    #[test]
    fn test_wait_for_builds_can_be_turned_off() {
        let cli = Cli::try_parse_from([
            "bbox",
            "multi-trigger",
            "-c",
            "bt1;main;false;",
            "--wait-for-builds",
            "false",
        ])
        .unwrap();

        assert!(matches!(
            cli.command,
            Commands::MultiTrigger {
                wait_for_builds: false,
                ..
            }
        ));
    }

    #[test]
    fn test_short_flags_and_bare_wait_switch() {
        let cli = Cli::try_parse_from([
            "bbox",
            "multi-trigger",
            "--build-params-combination",
            "bt1;main;true;",
            "-w",
            "-t",
            "10m",
        ])
        .unwrap();

        match cli.command {
            Commands::MultiTrigger {
                combinations,
                wait_for_builds,
                wait_timeout,
                ..
            } => {
                assert_eq!(combinations, ["bt1;main;true;"]);
                assert!(wait_for_builds);
                assert_eq!(wait_timeout, Duration::from_secs(600));
            }
            _ => panic!("expected multi-trigger"),
        }

        let cli = Cli::try_parse_from([
            "bbox",
            "multi-trigger",
            "-c",
            "bt1;main;false;",
            "-w",
            "false",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::MultiTrigger {
                wait_for_builds: false,
                ..
            }
        ));
    }

    #[test]
    fn test_wait_timeout_accepts_seconds_and_units() {
        assert_eq!(parse_wait_timeout("90"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_wait_timeout("45s"), Ok(Duration::from_secs(45)));
        assert_eq!(parse_wait_timeout("1h30m"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_wait_timeout("1500ms"), Ok(Duration::from_millis(1500)));

        assert!(parse_wait_timeout("").is_err());
        assert!(parse_wait_timeout("10x").is_err());
        assert!(parse_wait_timeout("m").is_err());
        assert!(parse_wait_timeout("1h30").is_err());

        let parsed = Cli::try_parse_from([
            "bbox",
            "multi-trigger",
            "-c",
            "bt1;main;false;",
            "-t",
            "soon",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_zero_artifact_check_attempts_is_rejected() {
        let parsed = Cli::try_parse_from([
            "bbox",
            "multi-trigger",
            "-c",
            "bt1;main;true;",
            "--artifact-check-attempts",
            "0",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_multi_trigger_requires_a_combination() {
        assert!(Cli::try_parse_from(["bbox", "multi-trigger"]).is_err());
    }

    #[test]
    fn test_clean_vcs_confirm_flag() {
        for flag in ["--confirm", "-c"] {
            let cli = Cli::try_parse_from(["bbox", "clean", "vcs", flag]).unwrap();
            assert!(matches!(
                cli.command,
                Commands::Clean {
                    action: CleanAction::Vcs { confirm: true }
                }
            ));
        }
    }

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("nope"));
    }

    #[test]
    fn test_connect_without_url_is_a_setup_error() {
        let cli = Cli::try_parse_from(["bbox", "--teamcity-url", "", "clean", "queue"]).unwrap();
        assert!(connect(&cli).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_multi_trigger_exit_codes() {
        let (_, service) = fake(FakeCiService::new());
        let code = cmd_multi_trigger(
            service,
            FanOut::default(),
            RunConfig::default(),
            &["bt1;main;false;".to_string()],
            false,
            OutputFormat::Json,
        )
        .await
        .unwrap();
        assert_eq!(code, EXIT_SUCCESS);

        let (_, service) = fake(
            FakeCiService::new()
                .with_trigger_failure("bt3")
                .with_build("bt4", BuildScript::succeeds()),
        );
        let code = cmd_multi_trigger(
            service,
            FanOut::default(),
            RunConfig::default(),
            &["bt3;main;false;".to_string(), "bt4;main;false;".to_string()],
            false,
            OutputFormat::Table,
        )
        .await
        .unwrap();
        assert_eq!(code, EXIT_UNIT_FAILURE);
    }

    #[tokio::test]
    async fn test_bad_combination_is_rejected_before_dispatch() {
        let (fake_service, service) = fake(FakeCiService::new());

        let err = cmd_multi_trigger(
            service,
            FanOut::default(),
            RunConfig::default(),
            &["bt1;main;maybe;".to_string()],
            false,
            OutputFormat::Table,
        )
        .await
        .unwrap_err();

        assert!(format!("{err:#}").contains("maybe"));
        assert!(fake_service.triggered().is_empty());
    }

    #[tokio::test]
    async fn test_clean_vcs_deletes_after_confirmation() {
        let (fake_service, service) = fake(
            FakeCiService::new()
                .with_project("P1", &["T1"])
                .with_template("T1", &["R2"])
                .with_roots(&["R1", "R2"]),
        );

        let code = cmd_clean_vcs(service, FanOut::default(), false, |candidates| {
            candidates.len() == 1
        })
        .await
        .unwrap();

        assert_eq!(code, EXIT_SUCCESS);
        assert_eq!(fake_service.deleted(), ["R1"]);
    }

    #[tokio::test]
    async fn test_clean_queue() {
        let (fake_service, service) = fake(FakeCiService::new());

        let code = cmd_clean_queue(service).await.unwrap();

        assert_eq!(code, EXIT_SUCCESS);
        assert_eq!(fake_service.queue_cleared(), 1);
    }
}
