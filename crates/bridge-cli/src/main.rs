//! Metabridge CLI
//!
//! Runs one SQL statement through a Metabase server and prints the rows.

use clap::Parser;
use metabridge_client::{ClientConfig, ManagerConfig, MetabaseClient, QueryResult, SessionManager};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "metabridge")]
#[command(version, about = "Run SQL through the Metabase REST API", long_about = None)]
struct Cli {
    /// Metabase server URL, e.g. https://metabase.example.com
    #[arg(long, env = "METABRIDGE_URL")]
    url: String,

    /// Metabase login
    #[arg(short, long, env = "METABRIDGE_USER")]
    user: String,

    /// Metabase password
    #[arg(long, env = "METABRIDGE_PASSWORD", hide_env_values = true)]
    password: String,

    /// Database to run the statement against (as named in Metabase)
    #[arg(short, long, env = "METABRIDGE_DATABASE")]
    database: String,

    /// Total attempts per request
    #[arg(long, default_value_t = 2)]
    max_retries: u32,

    /// Per-attempt timeout for the query, in seconds
    #[arg(long, default_value_t = 60)]
    query_timeout_secs: u64,

    /// Print column types and execution details
    #[arg(short, long)]
    verbose: bool,

    /// SQL statement
    sql: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::debug!(error = ?e, "Run failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let manager = Arc::new(SessionManager::new(ManagerConfig::from_env())?);

    let config = ClientConfig::builder("", cli.user, cli.password)
        .base_url(&cli.url)
        .database(cli.database.clone())
        .max_retries(cli.max_retries)
        .query_timeout(Duration::from_secs(cli.query_timeout_secs))
        .release_delay(Duration::ZERO)
        .no_prefetch()
        .build()?;

    let client = MetabaseClient::new(config, Arc::clone(&manager))?;
    client.connect().await?;
    tracing::info!(url = %cli.url, database = %cli.database, "Connected");

    let outcome = client.execute_query(&cli.sql, &cli.database).await;
    client.close();
    let mut result = outcome?;

    print_result(&mut result, cli.verbose)?;
    Ok(())
}

fn print_result(
    result: &mut QueryResult,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let headers: Vec<String> = result
        .columns()
        .iter()
        .map(|c| {
            if verbose {
                format!("{} ({})", c.display_name(), c.display_type_name())
            } else {
                c.display_name().to_string()
            }
        })
        .collect();

    let mut lines = Vec::with_capacity(result.row_count());
    while result.next() {
        let row: Vec<String> = result.current_row()?.iter().map(|v| v.to_string()).collect();
        lines.push(row);
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for line in &lines {
        for (width, cell) in widths.iter_mut().zip(line) {
            *width = (*width).max(cell.chars().count());
        }
    }

    println!("{}", format_line(&headers, &widths));
    println!(
        "{}",
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-")
    );
    for line in &lines {
        println!("{}", format_line(line, &widths));
    }

    println!();
    println!("({} row(s))", result.row_count());
    if verbose {
        println!("{}", result.execution_info().performance_summary());
    }

    Ok(())
}

fn format_line(cells: &[String], widths: &[usize]) -> String {
    cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
        .collect::<Vec<_>>()
        .join(" | ")
}
