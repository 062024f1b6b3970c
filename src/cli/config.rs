//! Configuration CLI commands.

use clap::{Args, Subcommand};
use hostkit::{Error, Result, Settings};

/// Configuration commands
#[derive(Subcommand, Debug)]
pub enum ConfigCmd {
    /// Show the settings in effect
    Show(ShowCmd),

    /// Write a settings file with the defaults
    Init(InitCmd),
}

impl ConfigCmd {
    pub fn run(self, settings: &Settings) -> Result<()> {
        match self {
            ConfigCmd::Show(cmd) => cmd.run(settings),
            ConfigCmd::Init(cmd) => cmd.run(),
        }
    }
}

/// Show the settings in effect, environment overrides included.
#[derive(Args, Debug)]
pub struct ShowCmd {}

impl ShowCmd {
    pub fn run(self, settings: &Settings) -> Result<()> {
        match Settings::default_path() {
            Some(path) if path.exists() => println!("# {}", path.display()),
            Some(path) => println!("# {} (not present, using defaults)", path.display()),
            None => println!("# no configuration directory, using defaults"),
        }
        let content =
            toml::to_string_pretty(settings).map_err(|e| Error::ConfigSave(e.to_string()))?;
        print!("{}", content);
        Ok(())
    }
}

/// Write the default settings to the settings file.
#[derive(Args, Debug)]
pub struct InitCmd {
    /// Overwrite an existing settings file.
    #[arg(short, long)]
    pub force: bool,
}

impl InitCmd {
    pub fn run(self) -> Result<()> {
        let path = Settings::default_path()
            .ok_or_else(|| Error::ConfigSave("no configuration directory".into()))?;
        if path.exists() && !self.force {
            return Err(Error::ConfigSave(format!(
                "{} already exists (use --force to overwrite)",
                path.display()
            )));
        }

        Settings::default().save_to(&path)?;
        println!("Wrote {}", path.display());
        Ok(())
    }
}
