//! Writes a deterministic demo warehouse for the dashboard.

use anyhow::{bail, Context, Result};
use clap::Parser;
use sales_dashboard_lib::warehouse::{DemoDataSpec, WarehouseWriter};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "seed-warehouse", about = "Create a demo sales warehouse", version)]
struct Args {
    /// SQLite file to create; must not exist yet
    #[arg(long, default_value = "warehouse.sqlite")]
    path: PathBuf,

    /// RNG seed; the same seed always produces the same sales
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Calendar year to fill (defaults to the current year)
    #[arg(long)]
    year: Option<i32>,

    /// Number of sales to generate
    #[arg(long, default_value_t = 2_000)]
    transactions: usize,

    #[arg(long, default_value = "local")]
    account: String,

    #[arg(long, default_value = "analyst")]
    user: String,

    /// Token registered for the user
    #[arg(long, env = "SALES_DASHBOARD_TOKEN", hide_env_values = true)]
    token: String,
}

impl Args {
    fn demo_spec(&self) -> DemoDataSpec {
        let defaults = DemoDataSpec::default();
        DemoDataSpec {
            seed: self.seed,
            year: self.year.unwrap_or(defaults.year),
            transactions: self.transactions,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if args.token.trim().is_empty() {
        bail!("the warehouse token must not be blank");
    }
    if args.path.exists() {
        bail!("{} already exists; remove it first", args.path.display());
    }

    let spec = args.demo_spec();
    let mut writer = WarehouseWriter::create(&args.path)
        .with_context(|| format!("creating warehouse at {}", args.path.display()))?;
    writer.add_user(&args.account, &args.user, &args.token)?;
    let rows = writer.seed_demo(&spec)?;

    println!(
        "Seeded {} sales for {} into {} (account '{}', user '{}')",
        rows,
        spec.year,
        args.path.display(),
        args.account,
        args.user
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Args;
    use clap::{CommandFactory, Parser};

    #[test]
    fn command_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn defaults_apply_when_only_the_token_is_given() {
        let args = Args::try_parse_from(["seed-warehouse", "--token", "abc"]).expect("parse");
        assert_eq!(args.path.to_str(), Some("warehouse.sqlite"));
        assert_eq!(args.account, "local");
        assert_eq!(args.user, "analyst");
        let spec = args.demo_spec();
        assert_eq!(spec.seed, 42);
        assert_eq!(spec.transactions, 2_000);
    }

    #[test]
    fn flags_override_the_demo_data() {
        let args = Args::try_parse_from([
            "seed-warehouse",
            "--token",
            "abc",
            "--seed",
            "7",
            "--year",
            "2023",
            "--transactions",
            "10",
        ])
        .expect("parse");
        let spec = args.demo_spec();
        assert_eq!((spec.seed, spec.year, spec.transactions), (7, 2023, 10));
    }

    #[test]
    fn non_numeric_values_are_rejected() {
        assert!(Args::try_parse_from(["seed-warehouse", "--token", "abc", "--seed", "many"]).is_err());
        assert!(Args::try_parse_from(["seed-warehouse", "--token", "abc", "--bogus", "1"]).is_err());
    }
}
