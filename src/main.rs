//! condarecipe CLI Entry Point
//!
//! Provides the command-line interface for working with conda recipes.
//!
//! # Usage
//!
//! ```bash
//! # Render for a target
//! condarecipe render recipes/conda --platform win-64 --python 3.6 -D version=4.3.21
//!
//! # Check every default target
//! condarecipe lint recipes/conda -D version=4.3.21
//!
//! # Re-serialize, or verify the round trip
//! condarecipe fmt recipes/conda --check
//!
//! # Run the test contract against an installed prefix
//! condarecipe test recipes/conda --prefix /opt/conda --jobs 4 --timeout 60
//! ```

use std::error::Error as StdError;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use log::{error, info, warn};

use condarecipe::environment::platform::{Platform, PythonVersion, RenderContext, DEFAULT_LINT_PLATFORMS};
use condarecipe::environment::prefix::Prefix;
use condarecipe::harness::{Harness, TestPlan};
use condarecipe::info::{context_info, info_json, pretty_recipe};
use condarecipe::recipe::parser::{read_recipe, render_document};
use condarecipe::recipe::writer::write_document;
use condarecipe::recipe::{lint, load_document, save_document, Document, LintOptions, TemplateContext};
use condarecipe::{APP_NAME, VERSION};

#[derive(Parser)]
#[command(name = "condarecipe")]
#[command(author, version, about = "Parse, lint, render and test conda build recipes")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a recipe for one target and print it
    Render {
        /// Recipe file or directory holding meta.yaml
        recipe: PathBuf,
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        template: TemplateArgs,
        /// Print JSON instead of YAML
        #[arg(long)]
        json: bool,
    },
    /// Check a recipe on several targets
    Lint {
        /// Recipe file or directory holding meta.yaml
        recipe: PathBuf,
        /// Target platform; repeatable (default: linux-64, osx-64, win-64)
        #[arg(long = "platform", value_name = "SUBDIR")]
        platforms: Vec<Platform>,
        /// Python version; repeatable
        #[arg(long = "python", value_name = "X.Y")]
        pythons: Vec<PythonVersion>,
        #[command(flatten)]
        template: TemplateArgs,
    },
    /// Re-serialize a recipe
    Fmt {
        /// Recipe file or directory holding meta.yaml
        recipe: PathBuf,
        /// Fail if the written recipe would not read back the same
        #[arg(long)]
        check: bool,
        /// Write to a file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
        #[command(flatten)]
        template: TemplateArgs,
    },
    /// List every selector-guarded entry
    Selectors {
        /// Recipe file or directory holding meta.yaml
        recipe: PathBuf,
        #[command(flatten)]
        template: TemplateArgs,
    },
    /// Show package information for a rendered recipe
    Info {
        /// Recipe file or directory holding meta.yaml
        #[arg(required_unless_present = "system")]
        recipe: Option<PathBuf>,
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        template: TemplateArgs,
        /// Print JSON
        #[arg(long)]
        json: bool,
        /// Describe the render target and environment
        #[arg(long)]
        system: bool,
    },
    /// Run the recipe tests against an installed prefix
    Test {
        /// Recipe file or directory holding meta.yaml
        recipe: PathBuf,
        /// Install prefix to test
        #[arg(long, env = "CONDA_PREFIX")]
        prefix: PathBuf,
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        template: TemplateArgs,
        /// Maximum parallel checks
        #[arg(short, long, default_value_t = 1)]
        jobs: usize,
        /// Per-check time limit in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
        /// Print the checks without running them
        #[arg(long)]
        dry_run: bool,
        /// Stop after the first failed check
        #[arg(long)]
        fail_fast: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
        /// Directory the commands run in
        #[arg(long, value_name = "DIR")]
        working_dir: Option<PathBuf>,
    },
}

#[derive(Args)]
struct TargetArgs {
    /// Target platform subdir (e.g. linux-64, win-64)
    #[arg(long, env = "CONDA_SUBDIR", value_name = "SUBDIR")]
    platform: Option<Platform>,

    /// Python version for py selectors (e.g. 3.6 or 36)
    #[arg(long, env = "CONDA_PY", value_name = "X.Y")]
    python: Option<PythonVersion>,
}

impl TargetArgs {
    fn context(&self) -> RenderContext {
        let ctx = RenderContext::new(self.platform.unwrap_or_else(Platform::current));
        match self.python {
            Some(python) => ctx.with_python(python),
            None => ctx,
        }
    }
}

#[derive(Args)]
struct TemplateArgs {
    /// Define a template variable
    #[arg(short = 'D', long = "define", value_name = "KEY=VALUE")]
    defines: Vec<String>,

    /// Take `version` from the first line of a file
    #[arg(long, value_name = "FILE")]
    version_file: Option<PathBuf>,
}

impl TemplateArgs {
    fn context(&self) -> Result<TemplateContext, Box<dyn StdError>> {
        let mut template = TemplateContext::from_env();
        if let Some(path) = &self.version_file {
            template.load_version_file(path)?;
        }
        for pair in &self.defines {
            template.define_pair(pair)?;
        }
        Ok(template)
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Conda Recipe Test Harness");
    println!();
}

fn render(recipe: &Path, target: &TargetArgs, template: &TemplateArgs, json: bool) -> Result<ExitCode, Box<dyn StdError>> {
    let ctx = target.context();
    let doc = load_document(recipe, &template.context()?)?;
    let rendered = render_document(&doc, &ctx)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rendered)?);
    } else {
        print!("{}", serde_yaml::to_string(&rendered)?);
    }
    Ok(ExitCode::SUCCESS)
}

fn run_lint(
    recipe: &Path,
    platforms: &[Platform],
    pythons: &[PythonVersion],
    template: &TemplateArgs,
) -> Result<ExitCode, Box<dyn StdError>> {
    let (file, text) = read_recipe(recipe)?;

    let mut template = template.context()?;
    if let Some(dir) = file.parent() {
        if template.environ("RECIPE_DIR").is_none() {
            template.set_environ("RECIPE_DIR", dir.display().to_string());
        }
    }

    let platforms = if platforms.is_empty() {
        DEFAULT_LINT_PLATFORMS
    } else {
        platforms
    };
    let options = LintOptions::new(platforms, pythons).with_template(template);
    let report = lint(&text, &options);

    println!("{}", report);
    if report.is_ok() {
        println!("{}", "Recipe is valid".green());
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn fmt(recipe: &Path, check: bool, output: Option<&Path>, template: &TemplateArgs) -> Result<ExitCode, Box<dyn StdError>> {
    let doc = load_document(recipe, &template.context()?)?;
    let text = write_document(&doc);

    if check {
        let reparsed = Document::parse(&text)?;
        if reparsed != doc {
            error!("Re-serialized recipe does not read back the same");
            return Ok(ExitCode::FAILURE);
        }
        info!("Round trip OK ({} sections)", doc.section_names().len());
    }

    match output {
        Some(path) => save_document(&doc, path)?,
        None if !check => print!("{}", text),
        None => {}
    }
    Ok(ExitCode::SUCCESS)
}

fn selectors(recipe: &Path, template: &TemplateArgs) -> Result<ExitCode, Box<dyn StdError>> {
    let doc = load_document(recipe, &template.context()?)?;
    let entries = doc.selectors();

    if entries.is_empty() {
        info!("No selectors in recipe");
    }

    for (path, selector) in entries {
        let targets: Vec<&str> = DEFAULT_LINT_PLATFORMS
            .iter()
            .filter(|p| selector.evaluate(&RenderContext::new(**p)))
            .map(|p| p.as_str())
            .collect();
        let note = if selector.is_python_conditional() {
            "python-dependent".to_string()
        } else {
            targets.join(", ")
        };
        println!("{:<36} [{}]  {}", path, selector, note);
    }
    Ok(ExitCode::SUCCESS)
}

fn show_info(
    recipe: Option<&Path>,
    target: &TargetArgs,
    template: &TemplateArgs,
    json: bool,
    system: bool,
) -> Result<ExitCode, Box<dyn StdError>> {
    let ctx = target.context();

    if system {
        let context = context_info(&ctx);
        if json {
            println!("{}", serde_json::to_string_pretty(&context)?);
        } else {
            println!("{}", context);
        }
    }

    if let Some(recipe) = recipe {
        let doc = load_document(recipe, &template.context()?)?;
        let rendered = render_document(&doc, &ctx)?;
        if json {
            println!("{}", serde_json::to_string_pretty(&info_json(&rendered, &ctx))?);
        } else {
            println!();
            print!("{}", pretty_recipe(&rendered, &ctx));
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[allow(clippy::too_many_arguments)]
fn run_tests(
    recipe: &Path,
    prefix: PathBuf,
    target: &TargetArgs,
    template: &TemplateArgs,
    jobs: usize,
    timeout: Option<u64>,
    dry_run: bool,
    fail_fast: bool,
    json: bool,
    working_dir: Option<PathBuf>,
) -> Result<ExitCode, Box<dyn StdError>> {
    if !json {
        print_banner();
    }
    if dry_run {
        info!("Mode: DRY RUN (checks will not execute)");
    }

    let ctx = target.context();
    let doc = load_document(recipe, &template.context()?)?;
    let rendered = render_document(&doc, &ctx)?;

    let prefix = Prefix::new(prefix);
    info!("Prefix: {}", prefix.root().display());

    let plan = TestPlan::from_recipe(&rendered, Some(&prefix))?;
    if plan.is_empty() {
        warn!("Recipe declares nothing to test");
    }

    let mut harness = Harness::new(plan);
    harness.set_prefix(prefix);
    harness.set_platform(ctx.platform);
    harness.set_max_parallel(jobs);
    harness.set_dry_run(dry_run);
    harness.set_fail_fast(fail_fast);
    if let Some(secs) = timeout {
        harness.set_timeout(Duration::from_secs(secs));
    }
    if let Some(dir) = working_dir {
        harness.set_working_dir(dir);
    }

    let report = harness.run()?;

    if json {
        println!("{}", report.to_json()?);
    } else {
        println!("{}", report.summary());
    }

    if report.success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Main application entry point.
fn run(cli: Cli) -> Result<ExitCode, Box<dyn StdError>> {
    match cli.command {
        Commands::Render {
            recipe,
            target,
            template,
            json,
        } => render(&recipe, &target, &template, json),
        Commands::Lint {
            recipe,
            platforms,
            pythons,
            template,
        } => run_lint(&recipe, &platforms, &pythons, &template),
        Commands::Fmt {
            recipe,
            check,
            output,
            template,
        } => fmt(&recipe, check, output.as_deref(), &template),
        Commands::Selectors { recipe, template } => selectors(&recipe, &template),
        Commands::Info {
            recipe,
            target,
            template,
            json,
            system,
        } => show_info(recipe.as_deref(), &target, &template, json, system),
        Commands::Test {
            recipe,
            prefix,
            target,
            template,
            jobs,
            timeout,
            dry_run,
            fail_fast,
            json,
            working_dir,
        } => run_tests(
            &recipe,
            prefix,
            &target,
            &template,
            jobs,
            timeout,
            dry_run,
            fail_fast,
            json,
            working_dir,
        ),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            let mut source = e.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {}", cause);
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_test_command() {
        let cli = Cli::try_parse_from([
            "condarecipe",
            "test",
            "recipes/conda",
            "--prefix",
            "/opt/conda",
            "--platform",
            "linux-64",
            "--python",
            "3.6",
            "-D",
            "version=4.3.21",
            "--jobs",
            "4",
            "--fail-fast",
        ])
        .unwrap();

        match cli.command {
            Commands::Test {
                prefix,
                target,
                template,
                jobs,
                fail_fast,
                ..
            } => {
                assert_eq!(prefix, PathBuf::from("/opt/conda"));
                assert_eq!(target.platform, Some(Platform::Linux64));
                assert_eq!(target.python, Some(PythonVersion::new(3, 6)));
                assert_eq!(template.defines, vec!["version=4.3.21"]);
                assert_eq!(jobs, 4);
                assert!(fail_fast);
            }
            _ => panic!("expected test command"),
        }
    }

    #[test]
    fn test_parse_lint_repeated_targets() {
        let cli = Cli::try_parse_from([
            "condarecipe",
            "lint",
            "meta.yaml",
            "--platform",
            "linux-64",
            "--platform",
            "win-64",
            "--python",
            "27",
        ])
        .unwrap();

        match cli.command {
            Commands::Lint { platforms, pythons, .. } => {
                assert_eq!(platforms, vec![Platform::Linux64, Platform::Win64]);
                assert_eq!(pythons, vec![PythonVersion::new(2, 7)]);
            }
            _ => panic!("expected lint command"),
        }
    }

    #[test]
    fn test_rejects_unknown_platform() {
        assert!(Cli::try_parse_from(["condarecipe", "lint", "meta.yaml", "--platform", "solaris"]).is_err());
    }

    #[test]
    fn test_info_system_needs_no_recipe() {
        assert!(Cli::try_parse_from(["condarecipe", "info", "--system"]).is_ok());
        assert!(Cli::try_parse_from(["condarecipe", "info"]).is_err());
    }

    #[test]
    fn test_template_args_context() {
        let args = TemplateArgs {
            defines: vec!["version=1.2".to_string()],
            version_file: None,
        };
        assert_eq!(args.context().unwrap().get("version"), Some("1.2"));

        let bad = TemplateArgs {
            defines: vec!["version".to_string()],
            version_file: None,
        };
        assert!(bad.context().is_err());
    }
}
