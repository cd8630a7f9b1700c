//! List command - print the suite without touching the cluster.

use anyhow::Result;
use clap::Args;

use cluster_health::ui;

use super::SuiteArgs;

/// Print the groups and expectations that `check` would evaluate.
#[derive(Args)]
pub struct ListCommand {
    #[command(flatten)]
    suite: SuiteArgs,

    /// Output the suite as JSON.
    #[arg(long, default_value = "false")]
    json: bool,
}

impl ListCommand {
    /// Run the list command.
    ///
    /// # Errors
    ///
    /// Returns an error if the suite definition is invalid.
    pub fn run(&self) -> Result<()> {
        let suite = self.suite.suite()?;

        if self.json {
            let groups: Vec<_> = suite
                .groups()
                .iter()
                .map(|g| {
                    serde_json::json!({
                        "name": g.name,
                        "expectations": g.checks.iter().map(|c| serde_json::json!({
                            "expectation": c.expectation,
                            "retry": c.retry,
                        })).collect::<Vec<_>>(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&groups)?);
            return Ok(());
        }

        for group in suite.groups() {
            ui::print_section(&format!("{} ({} checks)", group.name, group.checks.len()));
            for check in &group.checks {
                ui::print_list_item(&format!("{} [{}]", check.expectation, check.retry));
            }
        }
        println!();
        ui::print_info(&format!(
            "{} checks in {} groups",
            suite.len(),
            suite.groups().len()
        ));
        Ok(())
    }
}
