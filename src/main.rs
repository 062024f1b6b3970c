//! hostkit CLI entry point.

use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use cli::control::Action;
use cli::inspect::Field;
use hostkit::{Registry, Settings, Store};
use tracing_subscriber::EnvFilter;

mod cli;

/// hostkit - provision and manage container hosts
#[derive(Parser, Debug)]
#[command(name = "hostkit")]
#[command(about = "Provision and manage container hosts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a host.
    Create(cli::create::CreateCmd),

    /// Remove hosts.
    #[command(name = "rm", alias = "remove")]
    Remove(cli::delete::DeleteCmd),

    /// List hosts.
    #[command(name = "ls", alias = "list")]
    List(cli::list::ListCmd),

    /// Show or set the active host.
    Active(cli::active::ActiveCmd),

    /// Start a host.
    Start(cli::control::ControlCmd),

    /// Stop a host.
    Stop(cli::control::ControlCmd),

    /// Restart a host.
    Restart(cli::control::ControlCmd),

    /// Power a host off.
    Kill(cli::control::ControlCmd),

    /// Print the IP address of a host.
    Ip(cli::inspect::InspectCmd),

    /// Print the daemon URL of a host.
    Url(cli::inspect::InspectCmd),

    /// Print the state of a host.
    State(cli::inspect::InspectCmd),

    /// Log into or run a command on a host.
    Ssh(cli::ssh::SshCmd),

    /// List available drivers.
    Drivers(cli::drivers::DriversCmd),

    /// Show or initialize settings.
    #[command(subcommand)]
    Config(cli::config::ConfigCmd),
}

fn main() {
    // Initialize logging based on RUST_LOG or default to warn
    init_logging();

    let settings = match Settings::load() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            let mut settings = Settings::default();
            settings.apply_env();
            settings
        }
    };

    let registry = match Registry::builtin(&settings) {
        Ok(r) => r,
        Err(e) => fail(e),
    };

    // Driver flags are only known once the registry exists.
    let matches = Cli::command()
        .mut_subcommand("create", |cmd| cli::create::with_driver_flags(cmd, &registry))
        .get_matches();
    let cli = match Cli::from_arg_matches(&matches) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };

    tracing::debug!(
        version = hostkit::VERSION,
        store = %settings.store_path.display(),
        "starting hostkit"
    );

    let store = Store::new(settings.store_path.clone(), registry);

    let result = match cli.command {
        Commands::Create(cmd) => {
            let create = matches.subcommand_matches("create");
            cmd.run(&store, |flag| {
                create.and_then(|m| m.get_one::<String>(flag).cloned())
            })
        }
        Commands::Remove(cmd) => cmd.run(&store),
        Commands::List(cmd) => cmd.run(&store),
        Commands::Active(cmd) => cmd.run(&store),
        Commands::Start(cmd) => cmd.run(&store, Action::Start),
        Commands::Stop(cmd) => cmd.run(&store, Action::Stop),
        Commands::Restart(cmd) => cmd.run(&store, Action::Restart),
        Commands::Kill(cmd) => cmd.run(&store, Action::Kill),
        Commands::Ip(cmd) => cmd.run(&store, Field::Ip),
        Commands::Url(cmd) => cmd.run(&store, Field::Url),
        Commands::State(cmd) => cmd.run(&store, Field::State),
        Commands::Ssh(cmd) => cmd.run(&store),
        Commands::Drivers(cmd) => cmd.run(store.registry()),
        Commands::Config(cmd) => cmd.run(&settings),
    };

    if let Err(e) = result {
        fail(e);
    }
}

fn fail(e: hostkit::Error) -> ! {
    tracing::error!(error = %e, "command failed");
    eprintln!("Error: {}", e);
    std::process::exit(1);
}

/// Initialize the tracing subscriber.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("hostkit=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
