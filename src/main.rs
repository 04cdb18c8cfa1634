#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::style)]

use std::time::Duration;

use clap::Parser;
use tracing::Level;
use waypoint::cli::{Args, Command};
use waypoint::client::Client;
use waypoint::helpers::prompt_server_choice;
use waypoint::ranker::RankedServer;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let is_verbose = args.verbose;
    tracing_subscriber::fmt()
        .with_max_level(if is_verbose {
            Level::TRACE
        } else {
            Level::INFO
        })
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args).await {
        tracing::error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let client = Client::load(args.settings.as_deref()).await?;

    match args.command {
        Command::Parse { link } => {
            let (record, report) = client.parse(&link)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            for issue in &report.issues {
                tracing::warn!("{}", issue);
            }
        }
        Command::Link { link } => {
            println!("{}", client.canonical_link(&link)?);
        }
        Command::Config { target, output } => {
            let record = client.resolve(&target).await?;
            let document = client.generate(&record)?;
            match output {
                Some(path) => {
                    client.write_config(&document, Some(&path)).await?;
                }
                None => println!("{}", document.to_json_pretty()?),
            }
        }
        Command::Import { source } => {
            let report = client.import(source.as_deref()).await?;
            for failure in &report.failures {
                tracing::warn!("line {}: {}", failure.line, failure.error);
            }
            println!("{report}");
        }
        Command::Rank { select } => {
            let pass = client.rank().await?;
            print_ranking(&pass.ranked);

            let chosen = if select {
                let labels: Vec<String> = pass.ranked.iter().map(ranking_label).collect();
                prompt_server_choice(&labels, 0).map(|idx| pass.ranked[idx].record.clone())
            } else {
                pass.selected
            };

            if let Some(record) = chosen {
                let document = client.generate(&record)?;
                client.write_config(&document, None).await?;
                tracing::info!("Switched to '{}'", record.name);
            }
        }
        Command::Ping {
            host,
            port,
            timeout_ms,
        } => {
            let latency = client
                .ping(&host, port, timeout_ms.map(Duration::from_millis))
                .await;
            println!("{latency}");
        }
        Command::Protocols => {
            for protocol in client.protocols() {
                println!("{:<12} {}://", protocol.as_str(), protocol.scheme());
            }
        }
    }

    Ok(())
}

fn ranking_label(entry: &RankedServer) -> String {
    let star = if entry.record.favorite { "*" } else { " " };
    format!(
        "{} {:>8}  {:<11} {}",
        star,
        entry.latency.to_string(),
        entry.record.protocol().as_str(),
        entry.record.name
    )
}

fn print_ranking(ranked: &[RankedServer]) {
    for (index, entry) in ranked.iter().enumerate() {
        println!("{:>3}. {}", index + 1, ranking_label(entry));
    }
}
