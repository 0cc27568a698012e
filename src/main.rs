use clap::{Parser, Subcommand};
use sitepub::pipeline::{self, PublishOptions, SCOPE_EXIT_CODE};
use sitepub::types::BuildMode;
use sitepub::{config, output, scope};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Exit code for an unreadable or invalid `publish.toml`.
const CONFIG_EXIT_CODE: u8 = 2;

#[derive(Parser)]
#[command(name = "sitepub")]
#[command(about = "Build a static site and publish it to production or draft")]
#[command(long_about = "\
Build a static site and publish it to production or draft

Pipeline:

  1. build     run the generator (draft: against the draft base URL)
  2. derive    write a .webp sibling next to every PNG and JPEG
  3. patch     correct known generator defects in the output
  4. mask      draft only: noindex every page, strict robots.txt
  5. mirror    exact-mirror the output to the mode's destination
  6. refresh   production only: rebuild remote .gz artifacts

The first failing stage stops the run; the exit code names the stage:
  2 config   3 config scope   10 build   11 derive   12 patch
  13 mask    14 mirror        15 refresh

Run 'sitepub gen-config' to generate a documented publish.toml.")]
#[command(version)]
struct Cli {
    /// Publish configuration file. Relative site paths resolve against its directory.
    #[arg(long, default_value = config::CONFIG_FILENAME, global = true)]
    config: PathBuf,

    /// Log progress of every stage (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline
    Publish {
        /// Build and publish the draft site instead of production
        #[arg(long)]
        draft: bool,
        /// Stop after the local stages; do not mirror or refresh
        #[arg(long)]
        no_sync: bool,
        /// Print the final report as JSON instead of progress lines
        #[arg(long)]
        json: bool,
    },
    /// Load and validate publish.toml, then show what it resolves to
    Check,
    /// Print a stock publish.toml with all options documented
    GenConfig,
    /// Put back a generator config left modified by an interrupted draft build
    RestoreConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
            ExitCode::SUCCESS
        }
        Command::Publish {
            draft,
            no_sync,
            json,
        } => {
            let (publish_config, root) = match load(&cli.config) {
                Ok(loaded) => loaded,
                Err(code) => return code,
            };
            let options = PublishOptions {
                mode: if draft {
                    BuildMode::Draft
                } else {
                    BuildMode::Production
                },
                sync: !no_sync,
            };

            let (tx, rx) = std::sync::mpsc::channel();
            let printer = std::thread::spawn(move || {
                for event in rx {
                    if !json {
                        output::print_publish_event(&event);
                    }
                }
            });
            let result = pipeline::publish(&publish_config, &root, options, Some(tx));
            let _ = printer.join();

            match result {
                Ok(report) => {
                    if json {
                        match serde_json::to_string_pretty(&report) {
                            Ok(s) => println!("{s}"),
                            Err(e) => {
                                eprintln!("error: cannot serialize report: {e}");
                                return ExitCode::FAILURE;
                            }
                        }
                    } else {
                        output::print_report(&report);
                    }
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    output::print_error(&e);
                    ExitCode::from(e.exit_code())
                }
            }
        }
        Command::Check => {
            let (publish_config, root) = match load(&cli.config) {
                Ok(loaded) => loaded,
                Err(code) => return code,
            };
            output::print_check(&publish_config, &cli.config, &root);
            println!("==> Config is valid");
            ExitCode::SUCCESS
        }
        Command::RestoreConfig => {
            let (publish_config, root) = match load(&cli.config) {
                Ok(loaded) => loaded,
                Err(code) => return code,
            };
            let document = publish_config.site.paths(&root).config;
            match scope::recover(&document) {
                Ok(true) => {
                    println!("==> Restored {}", document.display());
                    ExitCode::SUCCESS
                }
                Ok(false) => {
                    println!("==> Nothing to restore for {}", document.display());
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    ExitCode::from(SCOPE_EXIT_CODE)
                }
            }
        }
    }
}

/// Load `publish.toml`, reporting failure with the config exit code.
fn load(config_path: &Path) -> Result<(config::PublishConfig, PathBuf), ExitCode> {
    match config::load_config(config_path) {
        Ok(c) => Ok((c, config_root(config_path))),
        Err(e) => {
            eprintln!("error: {}: {e}", config_path.display());
            Err(ExitCode::from(CONFIG_EXIT_CODE))
        }
    }
}

/// Directory that relative `[site]` paths resolve against.
fn config_root(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
