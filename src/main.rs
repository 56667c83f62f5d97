use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

use opsdash::app::App;
use opsdash::config::Config;

#[derive(Parser, Debug)]
#[command(name = "opsdash")]
#[command(about = "Data sync and revenue analytics for ERP-backed dashboards")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/opsdash/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Refresh the local snapshot from the ERP
  Refresh {
    /// Fetch even if the cached snapshot is still fresh
    #[arg(long)]
    force: bool,
  },
  /// Recalculate and show per-project financials
  Financials {
    /// Start of the date range (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,
    /// End of the date range (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,
    /// Skip recalculation and show the cached aggregates as-is
    #[arg(long)]
    cached: bool,
  },
  /// Show or edit the job-rate table
  Rates {
    #[command(subcommand)]
    action: Option<RatesAction>,
  },
}

#[derive(Subcommand, Debug)]
enum RatesAction {
  /// List all job titles and their rates
  List,
  /// Set the cost and revenue rates for a job title
  Set {
    job_title: String,
    cost: String,
    revenue: String,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;
  let mut app = App::new(&config)?;

  match args.command {
    Command::Refresh { force } => {
      let report = app.refresh(force).await?;
      println!("Status: {}", report.outcome);
      println!("Data as of: {}", report.as_of.to_rfc3339());
      for (name, collection) in report.snapshot.collections() {
        println!("  {:<12} {:>6} records", name, collection.len());
      }
    }

    Command::Financials { from, to, cached } => {
      if !cached {
        let report = app.recalculate().await?;
        eprintln!(
          "Recalculation: {} ({} projects)",
          report.mode, report.projects
        );
      }

      let range = match (from, to) {
        (Some(from), Some(to)) => Some((from, to)),
        (Some(from), None) => Some((from, NaiveDate::MAX)),
        (None, Some(to)) => Some((NaiveDate::MIN, to)),
        (None, None) => None,
      };

      let financials = app.financials(range)?;
      if financials.is_empty() {
        println!("No financial data available. Run 'opsdash refresh' first.");
        return Ok(());
      }

      let mut grand_total = 0.0;
      println!(
        "{:<30} {:>12} {:>14} {:>6}",
        "Project", "Hours", "Revenue", "Days"
      );
      for (project, aggregate) in &financials {
        println!(
          "{:<30} {:>12.1} {:>14.2} {:>6}",
          project,
          aggregate.total_hours,
          aggregate.total_revenue,
          aggregate.daily_data.len()
        );
        grand_total += aggregate.total_revenue;
      }
      println!("Total revenue: {:.2}", grand_total);
    }

    Command::Rates { action } => match action.unwrap_or(RatesAction::List) {
      RatesAction::List => {
        if app.job_rates().is_empty() {
          println!("No job titles known yet. Run 'opsdash refresh' first.");
          return Ok(());
        }
        println!("{:<30} {:>10} {:>10}", "Job title", "Cost", "Revenue");
        for (title, rate) in app.job_rates().iter() {
          println!("{:<30} {:>10} {:>10}", title, rate.cost, rate.revenue);
        }
      }
      RatesAction::Set {
        job_title,
        cost,
        revenue,
      } => {
        app.set_job_rate(&job_title, &cost, &revenue)?;
        println!("Saved rate for {}", job_title);
      }
    },
  }

  Ok(())
}
