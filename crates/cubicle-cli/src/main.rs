//! Cubicle CLI
//!
//! A command-line tool for running code in throwaway Docker containers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cubicle::{
    Config, EXAMPLE_CONFIG, InMemoryStore, LanguageDefinition, LanguageRegistry, Runner,
};
use tracing::{Level, debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cubicle")]
#[command(about = "A tool for running untrusted code in throwaway containers")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: cubicle.toml)
        #[arg(short, long, default_value = "cubicle.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Run a source file in a fresh container
    Run {
        /// Source file to run
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Language name (e.g., python, node)
        #[arg(short, long)]
        language: String,

        /// Version (image tag) to run (default: first configured version)
        #[arg(short, long)]
        tag: Option<String>,
    },

    /// List configured languages
    Languages,

    /// Pull the images of a language
    Install {
        /// Language name
        language: String,

        /// Install only this version (image tag)
        #[arg(short, long)]
        tag: Option<String>,
    },

    /// Remove the images of a language
    Uninstall {
        /// Language name
        language: String,

        /// Remove only this version (image tag)
        #[arg(short, long)]
        tag: Option<String>,
    },

    /// Show the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        Config::from_file(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration");
        Config::default()
    };

    match cli.command {
        Commands::Init { output, force } => init_config(&output, force).await,
        Commands::Run {
            source,
            language,
            tag,
        } => run_execute(config, &source, &language, tag.as_deref()).await,
        Commands::Languages => {
            list_languages(&config);
            Ok(())
        }
        Commands::Install { language, tag } => install(config, &language, tag.as_deref()).await,
        Commands::Uninstall { language, tag } => {
            uninstall(config, &language, tag.as_deref()).await
        }
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
    }
}

/// Runner plus a registry seeded with every configured language
async fn open(config: Config) -> Result<(Runner, LanguageRegistry)> {
    let definitions = config.definitions();
    let catalog = Arc::new(InMemoryStore::new());
    let runner = Runner::new(config).with_catalog(catalog.clone());
    let registry = LanguageRegistry::for_runner(catalog, &runner);
    for def in definitions {
        registry
            .seed(def)
            .await
            .context("failed to load language")?;
    }
    Ok((runner, registry))
}

async fn run_execute(
    config: Config,
    source: &Path,
    language_name: &str,
    version: Option<&str>,
) -> Result<()> {
    let code = tokio::fs::read_to_string(source)
        .await
        .context("failed to read source file")?;

    let (runner, registry) = open(config).await?;
    let language = registry
        .get(language_name)
        .await
        .context("unknown language")?;
    let version = match version {
        Some(v) => v.to_owned(),
        None => language
            .versions
            .first()
            .cloned()
            .with_context(|| format!("language '{language_name}' has no versions configured"))?,
    };

    info!(language = %language.name, %version, "running program");
    let result = runner
        .execute(&language, &version, &code)
        .await
        .context("execution failed")?;

    print!("{}", result.stdout);
    if !result.stderr.is_empty() {
        eprint!("{}", result.stderr);
    }

    // Log execution info via tracing (stderr), keeping stdout clean for piping
    info!(exit_code = result.exit_code, "execution result");

    if result.is_success() {
        Ok(())
    } else {
        std::process::exit(i32::try_from(result.exit_code).unwrap_or(1));
    }
}

async fn install(config: Config, language_name: &str, version: Option<&str>) -> Result<()> {
    let lang = config
        .get_language(language_name)
        .context("unknown language")?
        .clone();
    let runner = Runner::new(config);
    let registry = LanguageRegistry::for_runner(Arc::new(InMemoryStore::new()), &runner);

    match version {
        Some(version) => {
            registry
                .seed(LanguageDefinition::new(
                    language_name,
                    Vec::<String>::new(),
                    lang.cmd,
                ))
                .await
                .context("failed to load language")?;
            registry
                .new_version(language_name, version)
                .await
                .with_context(|| format!("failed to install {language_name}:{version}"))?;
            println!("Installed {language_name}:{version}");
        }
        None => {
            let created = registry
                .new_language(lang.to_definition(language_name))
                .await
                .context("failed to install language")?;
            for version in &created.language.versions {
                println!("Installed {language_name}:{version}");
            }
            for error in &created.errors {
                warn!("{error}");
            }
            if !created.errors.is_empty() {
                anyhow::bail!(
                    "{} of {} versions failed to install",
                    created.errors.len(),
                    created.errors.len() + created.language.versions.len()
                );
            }
        }
    }
    Ok(())
}

async fn uninstall(config: Config, language_name: &str, version: Option<&str>) -> Result<()> {
    let (_runner, registry) = open(config).await?;
    registry
        .get(language_name)
        .await
        .context("unknown language")?;

    match version {
        Some(version) => {
            registry
                .delete_version(language_name, version)
                .await
                .with_context(|| format!("failed to remove {language_name}:{version}"))?;
            println!("Removed {language_name}:{version}");
        }
        None => {
            registry
                .delete_language(language_name)
                .await
                .with_context(|| format!("failed to remove {language_name}"))?;
            println!("Removed every image of {language_name}");
        }
    }
    Ok(())
}

fn list_languages(config: &Config) {
    println!("Available languages:\n");

    for def in config.definitions() {
        println!(
            "  {:<12} {:<30} {}",
            def.name,
            def.versions.join(", "),
            def.cmd.join(" ")
        );
    }
}

fn show_config(config: &Config) {
    println!("Docker socket: {}", config.socket_path.display());
    println!(
        "API version: {}",
        config.api_version.as_deref().unwrap_or("daemon default")
    );
    println!();
    println!("Source file: {}/{}", config.source_dir, config.source_name);
    match config.timeout() {
        Some(timeout) => println!("Execution timeout: {:.1}s", timeout.as_secs_f64()),
        None => println!("Execution timeout: none"),
    }
    println!("Pull missing images: {}", config.pull_missing_images);
    match config.max_concurrent_executions {
        Some(n) => println!("Max concurrent executions: {n}"),
        None => println!("Max concurrent executions: unbounded"),
    }
    println!();
    println!("Languages configured: {}", config.languages.len());
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
