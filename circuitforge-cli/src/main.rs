//! CircuitForge CLI - AI-assisted PCB design generation from the command line.

use std::io::Write;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use circuitforge::{
    AnalysisSession, HttpTransport, PartRecord, QueryRequest, SessionOutcome, SessionUpdate,
};

#[derive(Parser)]
#[command(name = "circuitforge")]
#[command(about = "AI-assisted PCB design generation tool", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a design from a natural-language query
    Generate {
        /// Design query, e.g. "usb-c power bank, 20W"
        #[arg(value_name = "QUERY")]
        query: String,

        /// Analysis endpoint URL
        #[arg(short, long)]
        endpoint: String,

        /// AI provider to request
        #[arg(short, long, default_value = "claude")]
        provider: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,

        /// Abort if the stream is idle for this many seconds
        #[arg(long, default_value_t = 120)]
        idle_timeout: u64,

        /// Suppress per-event progress output
        #[arg(short, long)]
        quiet: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable BOM table
    Human,
    /// JSON output for tooling
    Json,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Generate {
            query,
            endpoint,
            provider,
            format,
            idle_timeout,
            quiet,
        } => handle_generate(query, endpoint, provider, format, idle_timeout, quiet).await,
    };

    process::exit(exit_code);
}

async fn handle_generate(
    query: String,
    endpoint: String,
    provider: String,
    format: OutputFormat,
    idle_timeout: u64,
    quiet: bool,
) -> i32 {
    let transport =
        HttpTransport::new(endpoint).with_idle_timeout(Duration::from_secs(idle_timeout));
    let session = Arc::new(AnalysisSession::new(Arc::new(transport)));

    if !quiet {
        let mut updates = session.subscribe();
        tokio::spawn(async move {
            while let Ok(update) = updates.recv().await {
                print_progress(&update);
            }
        });
    }

    // Ctrl-C cancels the in-flight run; cancellation is benign.
    {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                session.cancel().await;
            }
        });
    }

    let mut request = QueryRequest::new(query.clone(), provider.clone());
    loop {
        match session.start(request.clone()).await {
            Ok(SessionOutcome::Complete { total_parts }) => {
                eprintln!("Generation complete: {} parts selected", total_parts);
                output_bom(&session, &format).await;
                return 0;
            }
            Ok(SessionOutcome::ContextRequested(context)) => {
                eprintln!("The backend needs more input: {}", context.prompt);
                let answer = match read_line("> ").await {
                    Some(answer) => answer,
                    None => {
                        eprintln!("No context supplied; stopping");
                        return 1;
                    }
                };
                request = QueryRequest::new(query.clone(), provider.clone())
                    .with_context(context.query_id, answer);
            }
            Ok(SessionOutcome::Cancelled) => {
                eprintln!("Generation cancelled");
                return 0;
            }
            Ok(SessionOutcome::AlreadyRunning) => {
                // Single-shot CLI never re-enters; treat as done.
                return 0;
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        }
    }
}

fn print_progress(update: &SessionUpdate) {
    match update {
        SessionUpdate::Reasoning {
            component_id,
            hierarchy_level,
        } => {
            eprintln!("  [L{}] reasoning about {}", hierarchy_level, component_id);
        }
        SessionUpdate::PartSelected {
            component_id,
            part,
            duplicate,
            ..
        } => {
            if *duplicate {
                eprintln!(
                    "  [dup] {} -> {} x{}",
                    component_id, part.mpn, part.quantity
                );
            } else {
                eprintln!(
                    "  [sel] {} -> {} ({})",
                    component_id, part.mpn, part.manufacturer
                );
            }
        }
        SessionUpdate::ContextRequested { prompt, .. } => {
            eprintln!("  [ctx] {}", prompt);
        }
        SessionUpdate::Completed { .. }
        | SessionUpdate::Failed { .. }
        | SessionUpdate::Cancelled => {}
    }
}

async fn output_bom(session: &AnalysisSession, format: &OutputFormat) {
    let parts = session.parts().await;
    match format {
        OutputFormat::Human => output_human(&parts),
        OutputFormat::Json => output_json(session, &parts).await,
    }
}

fn output_human(parts: &[PartRecord]) {
    if parts.is_empty() {
        println!("No parts selected.");
        return;
    }

    println!(
        "{:<12} {:<20} {:<16} {:>4} {:>10}",
        "COMPONENT", "MPN", "MANUFACTURER", "QTY", "EXT PRICE"
    );
    let mut total = 0.0;
    for part in parts {
        total += part.extended_price();
        println!(
            "{:<12} {:<20} {:<16} {:>4} {:>10.2}",
            part.component_id, part.mpn, part.manufacturer, part.quantity, part.extended_price()
        );
    }
    println!("{:<54} {:>10.2}", "TOTAL", total);
}

async fn output_json(session: &AnalysisSession, parts: &[PartRecord]) {
    let nodes = session.nodes().await;
    let document = serde_json::json!({
        "parts": parts,
        "nodes": nodes,
        "totalCost": session.total_cost().await,
    });
    match serde_json::to_string_pretty(&document) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Error: failed to serialize BOM: {}", e),
    }
}

/// Prompt on stderr and read one trimmed line from stdin.
async fn read_line(prompt: &str) -> Option<String> {
    eprint!("{}", prompt);
    let _ = std::io::stderr().flush();
    let line = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).ok().map(|_| line)
    })
    .await
    .ok()
    .flatten()?;
    let trimmed = line.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
