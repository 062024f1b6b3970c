//! List command implementation.

use clap::Args;
use hostkit::{Host, HostEntry, Store};

/// List all hosts.
#[derive(Args, Debug)]
pub struct ListCmd {
    /// Only print host names.
    #[arg(short, long)]
    pub quiet: bool,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// What `ls` shows for one host. Query failures are shown, not fatal.
struct Row {
    name: String,
    active: bool,
    driver: String,
    state: String,
    url: String,
}

impl Row {
    fn query(entry: &HostEntry, active: bool) -> Self {
        match &entry.host {
            Ok(host) => Self::from_host(host, active),
            Err(e) => {
                tracing::warn!(host = %entry.name, error = %e, "host cannot be loaded");
                Self {
                    name: entry.name.clone(),
                    active,
                    driver: "-".to_string(),
                    state: "Error".to_string(),
                    url: String::new(),
                }
            }
        }
    }

    fn from_host(host: &Host, active: bool) -> Self {
        let state = match host.state() {
            Ok(state) => state.to_string(),
            Err(e) => {
                tracing::debug!(host = %host.name, error = %e, "state query failed");
                "Error".to_string()
            }
        };
        let url = host.url().unwrap_or_else(|e| {
            tracing::debug!(host = %host.name, error = %e, "url query failed");
            String::new()
        });
        Self {
            name: host.name.clone(),
            active,
            driver: host.driver.driver_name().to_string(),
            state,
            url,
        }
    }
}

impl ListCmd {
    /// Execute the list command.
    pub fn run(&self, store: &Store) -> hostkit::Result<()> {
        if self.quiet {
            for name in store.names()? {
                println!("{}", name);
            }
            return Ok(());
        }

        let active = store.active_name()?;
        let rows: Vec<Row> = store
            .list()?
            .iter()
            .map(|entry| Row::query(entry, active.as_deref() == Some(entry.name.as_str())))
            .collect();

        if self.json {
            let json: Vec<_> = rows
                .iter()
                .map(|row| {
                    serde_json::json!({
                        "name": row.name,
                        "active": row.active,
                        "driver": row.driver,
                        "state": row.state,
                        "url": row.url,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
            return Ok(());
        }

        if rows.is_empty() {
            println!("No hosts found");
            return Ok(());
        }

        println!(
            "{:<20} {:<7} {:<12} {:<10} {}",
            "NAME", "ACTIVE", "DRIVER", "STATE", "URL"
        );
        for row in rows {
            println!(
                "{:<20} {:<7} {:<12} {:<10} {}",
                truncate(&row.name, 20),
                if row.active { "*" } else { "" },
                row.driver,
                row.state,
                row.url,
            );
        }
        Ok(())
    }
}

/// Truncate a string to max length, adding "..." if needed.
fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max - 3])
    }
}
