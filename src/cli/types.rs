//! CLI type definitions

use clap::{Parser, Subcommand};

use super::commands::config::ConfigArgs;
use super::commands::plan::PlanArgs;
use super::commands::simulate::SimulateArgs;

#[derive(Parser, Debug)]
#[command(name = "sqlproxy-operator")]
#[command(about = "Reconciliation engine for a clustered SQL proxy", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the desired state of a resource after defaulting, and its diff
    /// against an observed proxy state
    Plan(PlanArgs),

    /// Reconcile a resource against in-memory fakes until it converges
    Simulate(SimulateArgs),

    /// Print the effective configuration
    Config(ConfigArgs),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plan() {
        let cli = Cli::try_parse_from([
            "sqlproxy-operator",
            "plan",
            "--resource",
            "proxy.yaml",
            "--observed",
            "live.yaml",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Plan(args) => {
                assert_eq!(args.resource.to_str(), Some("proxy.yaml"));
                assert!(args.database.is_none());
                assert_eq!(args.observed.as_deref().and_then(|p| p.to_str()), Some("live.yaml"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_simulate_defaults() {
        let cli =
            Cli::try_parse_from(["sqlproxy-operator", "simulate", "--resource", "p.yaml"]).unwrap();
        assert!(!cli.json);
        match cli.command {
            Commands::Simulate(args) => assert_eq!(args.ticks, 10),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_resource_is_required() {
        assert!(Cli::try_parse_from(["sqlproxy-operator", "plan"]).is_err());
    }
}
