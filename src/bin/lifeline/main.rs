use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use tracing_subscriber::EnvFilter;

use lifeline::audio::{capture, playback};
use lifeline::config::Config;
use lifeline::error::LifelineError;

#[derive(Parser)]
#[command(
    name = "lifeline",
    about = "Talk to an emergency dispatcher agent",
    long_about = "Lifeline opens a live voice session with a conversational dispatcher \
        agent. Microphone audio is streamed to the agent as it is captured, the \
        agent's spoken replies are played back without gaps, and when the agent \
        has gathered enough detail it files an emergency report, which is printed \
        as JSON together with its ticket number."
)]
struct Cli {
    /// Path to config file
    ///
    /// Defaults to ~/.config/lifeline/config.yaml if not specified. Built-in
    /// defaults are used when the default file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    ///
    /// Sets the log level to debug for the lifeline crate, including the
    /// per-frame microphone level meter and playback scheduling.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a live voice session (foreground)
    ///
    /// Opens the configured microphone and speaker, connects to the live
    /// endpoint and streams in both directions. Submitted reports are
    /// printed to stdout. Runs until the agent hangs up, the connection
    /// fails, or Ctrl+C is pressed.
    Connect,

    /// List available audio input and output devices
    Devices,

    /// Generate shell completions
    ///
    /// Prints a completion script for the given shell to stdout.
    Completions {
        /// Shell to generate completions for (bash, zsh, fish, elvish, powershell)
        shell: Shell,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("lifeline=debug,info")
    } else {
        EnvFilter::new("lifeline=info,warn")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), LifelineError> {
    match cli.command {
        Command::Connect => {
            let config = Config::load_or_default(cli.config.as_deref())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(lifeline::live::run_live(config))
        }
        Command::Devices => run_devices(),
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "lifeline", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn print_device_list(devices: &[String], default_name: Option<&str>) {
    for (i, name) in devices.iter().enumerate() {
        let marker = if default_name == Some(name.as_str()) {
            " (default)"
        } else {
            ""
        };
        println!("  {}: {name}{marker}", i + 1);
    }
}

fn run_devices() -> Result<(), LifelineError> {
    let inputs = capture::list_input_devices()?;
    if inputs.is_empty() {
        println!("No audio input devices found.");
    } else {
        println!("Input devices:");
        print_device_list(&inputs, capture::default_input_device_name().as_deref());
    }

    let outputs = playback::list_output_devices()?;
    if outputs.is_empty() {
        println!("No audio output devices found.");
    } else {
        println!("Output devices:");
        print_device_list(&outputs, playback::default_output_device_name().as_deref());
    }

    Ok(())
}
