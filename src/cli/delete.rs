//! Remove command implementation.

use clap::Args;
use hostkit::Store;

/// Remove one or more hosts.
#[derive(Args, Debug)]
pub struct DeleteCmd {
    /// Host names to remove.
    #[arg(required = true)]
    pub names: Vec<String>,

    /// Remove without confirmation.
    #[arg(short, long)]
    pub force: bool,
}

impl DeleteCmd {
    /// Execute the remove command.
    ///
    /// Every host is attempted; the last failure is returned.
    pub fn run(&self, store: &Store) -> hostkit::Result<()> {
        if !self.force && !confirm(&self.names) {
            println!("Cancelled");
            return Ok(());
        }

        let mut result = Ok(());
        for name in &self.names {
            match store.remove(name) {
                Ok(()) => println!("Removed host '{}'", name),
                Err(e) if e.is_not_found() => {
                    eprintln!("Host '{}' does not exist", name);
                    result = Err(e);
                }
                Err(e) => {
                    tracing::warn!(host = %name, error = %e, "failed to remove host");
                    eprintln!("Error removing host '{}': {}", name, e);
                    result = Err(e);
                }
            }
        }
        result
    }
}

fn confirm(names: &[String]) -> bool {
    eprint!("Remove host(s) {}? [y/N] ", names.join(", "));
    let mut input = String::new();
    if std::io::stdin().read_line(&mut input).is_err() {
        return false;
    }
    let input = input.trim().to_lowercase();
    input == "y" || input == "yes"
}
