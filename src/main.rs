use clap::{Parser, Subcommand, ValueEnum};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use web_vision::artifact::{group_by_hash, hash_file};
use web_vision::browser::{MockApp, MockBrowser, SessionLauncher};
use web_vision::catalog;
use web_vision::config::{self, parse_viewport, parse_viewport_list};
use web_vision::harness::{self, HarnessConfig};
use web_vision::report::render_text;
use web_vision::run_dir::{cleanup_old_runs, list_runs};
use web_vision::scenario::{Scenario, load_suite};

/// Web Vision - scripted browser verification with content-hashed screenshots
#[derive(Parser, Debug)]
#[command(
    name = "web-vision",
    about = "Drive a web application through scripted scenarios, capture screenshots and report what changed",
    after_help = "ENVIRONMENT VARIABLES:\n\
        WEB_VISION_BASE_URL             Base URL of the application under test\n\
        WEB_VISION_ARTIFACT_DIR         Base directory for run output\n\
        WEB_VISION_TEST_DATA_DIR        Directory holding upload fixtures\n\
        WEB_VISION_POLL_INTERVAL        Condition poll interval (ms)\n\
        WEB_VISION_WAIT_TIMEOUT         Default wait timeout (ms)\n\
        WEB_VISION_NAV_TIMEOUT          Default navigation timeout (ms)\n\
        WEB_VISION_VIEWPORT             Default viewport\n\
        WEB_VISION_RESPONSIVE_VIEWPORTS Viewports for the responsive layout check\n\
        WEB_VISION_DUPLICATE_TOLERANCE  Duplicate screenshots tolerated per run\n\
        WEB_VISION_CONCURRENCY          Scenarios run at once\n\
        WEB_VISION_CHROME_PATH          Chromium executable\n\
        RUST_LOG                        Log filter (default: web_vision=info)"
)]
struct Args {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Scripted in-memory model of the grading application
    Mock,
    /// Chromium over the DevTools protocol
    Chrome,
}

impl Default for Backend {
    fn default() -> Self {
        if cfg!(feature = "browser") {
            Backend::Chrome
        } else {
            Backend::Mock
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run scenarios and write a report
    Run {
        /// JSON suite file (default: built-in scenarios)
        #[arg(long)]
        suite: Option<PathBuf>,

        /// Only run these scenarios (comma-separated names)
        #[arg(long, short = 's', value_delimiter = ',')]
        scenario: Vec<String>,

        /// Base URL of the application under test
        #[arg(long)]
        base_url: Option<String>,

        /// Exact run directory (default: a new directory under the artifact dir)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Base directory for run output
        #[arg(long)]
        artifact_dir: Option<PathBuf>,

        /// Directory holding upload fixtures
        #[arg(long)]
        test_data: Option<PathBuf>,

        /// Viewport: desktop (1280x800), desktop-hd (1920x1080), tablet (768x1024), mobile (375x667), or WxH
        #[arg(long)]
        viewport: Option<String>,

        /// Viewports the built-in responsive layout check resizes through (comma-separated)
        #[arg(long)]
        responsive_viewports: Option<String>,

        /// Scenarios run at once, each on its own browser session
        #[arg(long, short = 'j')]
        concurrency: Option<usize>,

        /// Duplicate screenshots tolerated before visual coverage fails
        #[arg(long)]
        tolerance: Option<usize>,

        /// Browser backend
        #[arg(long, value_enum, default_value_t = Backend::default())]
        backend: Backend,

        /// Show the browser window (chrome backend)
        #[arg(long)]
        headful: bool,

        /// Chromium executable (chrome backend)
        #[arg(long, env = "WEB_VISION_CHROME_PATH")]
        chrome_path: Option<PathBuf>,

        /// Print the report as JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// List available scenarios
    List {
        /// JSON suite file (default: built-in scenarios)
        #[arg(long)]
        suite: Option<PathBuf>,

        /// Viewports the built-in responsive layout check resizes through (comma-separated)
        #[arg(long)]
        responsive_viewports: Option<String>,
    },

    /// Hash screenshot files and report duplicates
    Hash {
        /// Files to hash
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Manage past runs
    Runs {
        #[command(subcommand)]
        command: RunsCommand,

        /// Base directory for run output
        #[arg(long, global = true)]
        artifact_dir: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum RunsCommand {
    /// List runs, oldest first
    List,
    /// Delete runs older than the given age
    Clean {
        #[arg(long, default_value = "24")]
        max_age_hours: u64,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(args.log_json);

    match args.command {
        Some(Commands::Run {
            suite,
            scenario,
            base_url,
            output,
            artifact_dir,
            test_data,
            viewport,
            responsive_viewports,
            concurrency,
            tolerance,
            backend,
            headful,
            chrome_path,
            json,
        }) => {
            let mut config = HarnessConfig::default();
            if let Err(code) = apply_responsive_viewports(&mut config, responsive_viewports) {
                return Ok(code);
            }
            let scenarios = match load_scenarios(suite.as_ref(), &mut config) {
                Ok(scenarios) => scenarios,
                Err(err) => {
                    eprintln!("Error: {}", err);
                    return Ok(ExitCode::from(2));
                }
            };

            // flags win over suite file and environment
            if let Some(url) = base_url {
                config.base_url = url;
            }
            if let Some(size) = viewport {
                let Some(viewport) = parse_viewport(&size) else {
                    eprintln!("Error: invalid viewport '{}'. Use: desktop, desktop-hd, tablet, mobile, or WxH", size);
                    return Ok(ExitCode::from(2));
                };
                config.viewport = viewport;
            }
            if let Some(dir) = artifact_dir {
                config.artifact_dir = dir;
            }
            if let Some(dir) = test_data {
                config.test_data_dir = dir;
            }
            if let Some(n) = concurrency {
                config.concurrency = n.max(1);
            }
            if let Some(n) = tolerance {
                config.duplicate_tolerance = n;
            }
            config.output_dir = output;

            let scenarios = match harness::select(scenarios, &scenario) {
                Ok(scenarios) => scenarios,
                Err(err) => {
                    eprintln!("Error: {}", err);
                    return Ok(ExitCode::from(2));
                }
            };

            let launcher = make_launcher(backend, &config, headful, chrome_path)?;
            let run = match harness::run_suite(launcher.as_ref(), &config, &scenarios).await {
                Ok(run) => run,
                Err(err) if err.is_configuration() => {
                    eprintln!("Error: {}", err);
                    return Ok(ExitCode::from(2));
                }
                Err(err) => return Err(err.into()),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&run.report)?);
            } else {
                print!("{}", render_text(&run.report));
                println!("\nRun: {}", run.run.dir.display());
                if let Some(path) = &run.report_path {
                    println!("Report: {}", path.display());
                }
            }

            return Ok(if run.report.passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            });
        }

        Some(Commands::List {
            suite,
            responsive_viewports,
        }) => {
            let mut config = HarnessConfig::default();
            if let Err(code) = apply_responsive_viewports(&mut config, responsive_viewports) {
                return Ok(code);
            }
            let scenarios = match load_scenarios(suite.as_ref(), &mut config) {
                Ok(scenarios) => scenarios,
                Err(err) => {
                    eprintln!("Error: {}", err);
                    return Ok(ExitCode::from(2));
                }
            };
            for scenario in &scenarios {
                let viewport = scenario.viewport.unwrap_or(config.viewport);
                println!(
                    "{:<20} {:>3} steps  {:<10} {}",
                    scenario.name,
                    scenario.steps.len(),
                    viewport,
                    scenario.description
                );
            }
        }

        Some(Commands::Hash { files }) => {
            let mut hashed = Vec::new();
            for file in &files {
                let hash = hash_file(file)?;
                println!("{}  {}", hash, file.display());
                hashed.push((file.display().to_string(), hash));
            }

            let groups = group_by_hash(hashed);
            println!();
            println!("Total files: {}", files.len());
            println!("Unique hashes: {}", groups.len());
            for (hash, names) in groups.iter().filter(|(_, names)| names.len() > 1) {
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                println!("  DUPLICATE {}: {}", hash.short(), names.join(", "));
            }
        }

        Some(Commands::Runs {
            command,
            artifact_dir,
        }) => {
            let base = artifact_dir.unwrap_or_else(|| PathBuf::from(config::artifact_dir()));
            match command {
                RunsCommand::List => {
                    let runs = list_runs(&base)?;
                    if runs.is_empty() {
                        println!("No runs in {}", base.display());
                    }
                    for run in runs {
                        let created = run
                            .metadata
                            .as_ref()
                            .map(|m| m.created.as_str())
                            .unwrap_or("-");
                        let report = if run.has_report { "report" } else { "incomplete" };
                        println!("{}  {}  {}", run.dir.display(), created, report);
                    }
                }
                RunsCommand::Clean { max_age_hours } => {
                    let max_age = max_age(max_age_hours);
                    let removed = cleanup_old_runs(&base, max_age)?;
                    println!("Removed {} run(s) older than {}h from {}", removed, max_age_hours, base.display());
                }
            }
        }

        None => {
            println!("Web Vision - scripted browser verification with content-hashed screenshots");
            println!();
            println!("Usage: web-vision <COMMAND>");
            println!();
            println!("Commands:");
            println!("  run   Run scenarios and write a report");
            println!("  list  List available scenarios");
            println!("  hash  Hash screenshot files and report duplicates");
            println!("  runs  List or clean up past runs");
            println!();
            println!("Run with --help for more information.");
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("web_vision=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Scenarios from the suite file (applying its settings) or the catalog
fn load_scenarios(
    suite: Option<&PathBuf>,
    config: &mut HarnessConfig,
) -> Result<Vec<Scenario>, harness::HarnessError> {
    match suite {
        Some(path) => {
            let suite = load_suite(path)?;
            config.apply_suite(&suite)?;
            Ok(suite.scenarios)
        }
        None => Ok(catalog::builtin(&config.responsive_viewports)),
    }
}

fn max_age(hours: u64) -> Duration {
    Duration::from_secs(hours.saturating_mul(3600))
}

/// Replace the responsive viewport list from a `--responsive-viewports` value
fn apply_responsive_viewports(config: &mut HarnessConfig, list: Option<String>) -> Result<(), ExitCode> {
    let Some(list) = list else {
        return Ok(());
    };
    match parse_viewport_list(&list) {
        Some(viewports) => {
            config.responsive_viewports = viewports;
            Ok(())
        }
        None => {
            eprintln!("Error: invalid viewport list '{}'. Use comma-separated desktop, desktop-hd, tablet, mobile, or WxH", list);
            Err(ExitCode::from(2))
        }
    }
}

fn make_launcher(
    backend: Backend,
    config: &HarnessConfig,
    headful: bool,
    chrome_path: Option<PathBuf>,
) -> Result<Box<dyn SessionLauncher>, Box<dyn Error>> {
    match backend {
        Backend::Mock => Ok(Box::new(MockBrowser::new(MockApp::grader_demo(&config.base_url)))),
        #[cfg(feature = "browser")]
        Backend::Chrome => {
            let chrome_path = chrome_path.or_else(|| config::get().target.chrome_path.as_ref().map(PathBuf::from));
            Ok(Box::new(web_vision::browser::ChromeLauncher::new(headful, chrome_path)))
        }
        #[cfg(not(feature = "browser"))]
        Backend::Chrome => {
            let _ = (headful, chrome_path);
            Err("the chrome backend needs the `browser` feature (cargo build --features browser)".into())
        }
    }
}
