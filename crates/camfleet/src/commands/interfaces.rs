//! `camfleet interfaces`

use serde::Serialize;

use camfleet_config::AgentConfig;
use camfleet_core::{InterfaceDecision, InterfaceFilter, InterfaceSource, UnmatchedInterfacePolicy};

use crate::cli::{InterfacesArgs, OutputFormat};
use crate::error::CliError;
use crate::sysfs::SysfsInterfaces;

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct InterfaceRow {
    pub name: String,
    pub swept: bool,
    pub reason: String,
}

pub async fn handle(args: &InterfacesArgs, config: &AgentConfig) -> Result<(), CliError> {
    let names = SysfsInterfaces::new(&args.sysfs).interfaces().await?;
    let rows = classify(&names, config);

    match args.output {
        OutputFormat::Json | OutputFormat::Toml => {
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Text => {
            let width = rows.iter().map(|r| r.name.len()).max().unwrap_or(0);
            for row in &rows {
                let verdict = if row.swept { "sweep" } else { "skip" };
                println!("{:<width$}  {verdict:<5}  {}", row.name, row.reason);
            }
        }
    }
    Ok(())
}

/// Decide, for every enumerated interface plus the configured static
/// ones, whether discovery would sweep it.
pub fn classify(names: &[String], config: &AgentConfig) -> Vec<InterfaceRow> {
    let filter = InterfaceFilter::new(&config.discover_patterns, config.unmatched_interfaces);

    let mut rows: Vec<InterfaceRow> = names
        .iter()
        .filter(|name| !config.interfaces.contains(*name))
        .map(|name| {
            let decision = filter.decide(name);
            InterfaceRow {
                name: name.clone(),
                swept: decision.is_included(),
                reason: describe(&decision),
            }
        })
        .collect();

    rows.extend(config.interfaces.iter().map(|name| InterfaceRow {
        name: name.clone(),
        swept: true,
        reason: "static".into(),
    }));
    rows.sort_by(|a, b| a.name.cmp(&b.name));
    rows
}

fn describe(decision: &InterfaceDecision) -> String {
    match decision {
        InterfaceDecision::Include { pattern } => format!("matches '{pattern}'"),
        InterfaceDecision::Exclude { pattern } => format!("excluded by '{pattern}'"),
        InterfaceDecision::Unmatched(UnmatchedInterfacePolicy::Include) => {
            "no pattern matches, unmatched included".into()
        }
        InterfaceDecision::Unmatched(UnmatchedInterfacePolicy::Exclude) => {
            "no pattern matches".into()
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    fn row(name: &str, swept: bool, reason: &str) -> InterfaceRow {
        InterfaceRow {
            name: name.into(),
            swept,
            reason: reason.into(),
        }
    }

    #[test]
    fn default_patterns_skip_loopback_and_docker() {
        let rows = classify(&names(&["lo", "eth0", "docker0"]), &AgentConfig::default());
        assert_eq!(
            rows,
            [
                row("docker0", false, "excluded by '!docker.*'"),
                row("eth0", true, "matches '.*'"),
                row("lo", false, "excluded by '!lo'"),
            ]
        );
    }

    #[test]
    fn static_interfaces_are_always_swept() {
        let config = AgentConfig {
            discover_patterns: names(&["eth.*"]),
            interfaces: names(&["wg0", "br-cams"]),
            ..AgentConfig::default()
        };
        let rows = classify(&names(&["eth0", "wg0", "wlan0"]), &config);
        assert_eq!(
            rows,
            [
                row("br-cams", true, "static"),
                row("eth0", true, "matches 'eth.*'"),
                row("wg0", true, "static"),
                row("wlan0", false, "no pattern matches"),
            ]
        );
    }

    #[test]
    fn unmatched_policy_is_reported() {
        let config = AgentConfig {
            discover_patterns: names(&["eth.*"]),
            unmatched_interfaces: UnmatchedInterfacePolicy::Include,
            ..AgentConfig::default()
        };
        let rows = classify(&names(&["wlan0"]), &config);
        assert_eq!(
            rows,
            [row("wlan0", true, "no pattern matches, unmatched included")]
        );
    }
}
