use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use swgts_benchmarks::{write_results, BenchmarkConfig, BenchmarkRunner};
use swgts_client::{reconstruct, SwgtsClient, UploadOptions};
use swgts_server::{
    build_workers, cancel_on_ctrl_c, connect_store, init_metrics, run_server, run_workers,
    AppState, ServerConfig,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "swgts")]
#[command(version)]
#[command(about = "SWGTS - read filtering with byte-bounded backpressure", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConfigArgs {
    /// TOML configuration file
    #[arg(short, long, env = "SWGTS_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the upload API (filter workers run elsewhere)
    Serve {
        #[command(flatten)]
        config: ConfigArgs,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run filter workers against the shared store
    Filter {
        #[command(flatten)]
        config: ConfigArgs,

        /// Number of workers
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Serve the API and run filter workers in one process
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        #[arg(short, long)]
        port: Option<u16>,

        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Upload FASTQ files (one per pair slot) for filtering
    Submit {
        /// FASTQ files, plain or .gz
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Server base URL
        #[arg(short, long, default_value = "http://127.0.0.1:8000")]
        server: String,

        /// Bases per transmission (default: a tenth of the server buffer)
        #[arg(long)]
        count: Option<u64>,

        /// Give up after this many deferred submissions (default: never)
        #[arg(long)]
        retries: Option<usize>,

        /// Rebuild the filtered FASTQ files in this directory
        #[arg(short, long)]
        outfolder: Option<PathBuf>,
    },

    /// Show server status
    Status {
        #[arg(short, long, default_value = "http://127.0.0.1:8000")]
        server: String,
    },

    /// Measure filter accuracy on labelled samples
    Benchmark {
        #[command(flatten)]
        config: ConfigArgs,

        /// FASTQ samples whose read names start with `human` or `pathogen`
        #[arg(required = true)]
        samples: Vec<PathBuf>,

        /// Output file for results (CSV, or JSON when ending in .json)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn load_config(args: &ConfigArgs, port: Option<u16>) -> anyhow::Result<ServerConfig> {
    let mut config = ServerConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(port) = port {
        config.port = port;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("swgts=info,swgts_server=info,swgts_client=info,tower_http=info")
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, port } => {
            let config = load_config(&config, port)?;
            config.log();
            init_metrics();

            let store = connect_store(&config).await?;
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());

            run_server(Arc::new(AppState::new(config, store)), cancel).await?;
        }

        Commands::Filter { config, workers } => {
            let config = load_config(&config, None)?;
            config.log();
            init_metrics();

            let store = connect_store(&config).await?;
            let pool = build_workers(&config, store)?;
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());

            run_workers(pool, workers.unwrap_or(config.worker_threads), cancel).await;
        }

        Commands::Run {
            config,
            port,
            workers,
        } => {
            let config = load_config(&config, port)?;
            config.log();
            init_metrics();

            let store = connect_store(&config).await?;
            let pool = build_workers(&config, store.clone())?;
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());

            let state = AppState::new(config.clone(), store).with_workers(pool.stats());
            let worker_task = tokio::spawn(run_workers(
                pool,
                workers.unwrap_or(config.worker_threads).max(1),
                cancel.clone(),
            ));

            let served = run_server(Arc::new(state), cancel.clone()).await;
            cancel.cancel();
            worker_task.await.context("joining workers")?;
            served?;
        }

        Commands::Submit {
            files,
            server,
            count,
            retries,
            outfolder,
        } => {
            if files.len() > 2 {
                warn!(
                    files = files.len(),
                    "More than two pair slots seems suspicious, proceeding anyway"
                );
            }
            submit(&files, &server, count, retries, outfolder.as_deref()).await?;
        }

        Commands::Status { server } => {
            let client = SwgtsClient::new(server)?;
            let status = client
                .server_status()
                .await
                .context("could not query server status, is the server running?")?;

            println!("=== SWGTS Server ===");
            println!("URL: {}", client.base_url());
            println!("Version: {}", status.version);
            if let Some(commit) = &status.commit {
                println!("Commit: {}", commit);
            }
            println!("Uptime: {:.0}s", status.uptime);
            println!("Maximum pending bytes: {}", status.max_pending_bytes);
            println!("Processed bases: {}", status.processed_bases);
        }

        Commands::Benchmark {
            config,
            samples,
            output,
        } => {
            let config = load_config(&config, None)?;
            let filter = config.filter.build().context("building filter")?;
            let filter_name = filter.name().to_string();
            let runner = BenchmarkRunner::new(Arc::new(filter), filter_name.as_str());

            println!("SWGTS Filter Benchmark\n");
            println!("Filter: {}", filter_name);
            println!("Samples: {}\n", samples.len());

            let mut results = Vec::new();
            for sample in samples {
                let bench = BenchmarkConfig::for_sample(sample);
                match runner.run(&bench) {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        eprintln!("Benchmark '{}' failed: {:#}", bench.name, e);
                        continue;
                    }
                }
            }

            for result in &results {
                let m = &result.matrix;
                println!("{}:", result.config.name);
                println!("  Removed {} of {} reads", m.removed(), m.total());
                println!("  TP: {} TN: {} FP: {} FN: {}", m.tp, m.tn, m.fp, m.fn_);
                match (result.precision, result.recall, result.f1) {
                    (Some(p), Some(r), Some(f1)) => {
                        println!("  Precision: {:.4} Recall: {:.4} F1: {:.4}", p, r, f1)
                    }
                    _ => println!("  Nothing was removed, metrics undefined"),
                }
                println!("  Time: {:.1}ms", result.total_time_ms);
                println!();
            }

            if let Some(path) = output {
                write_results(&results, &path)?;
                println!("Results saved to: {}", path.display());
            }

            if results.is_empty() {
                anyhow::bail!("no benchmark completed");
            }
        }
    }

    Ok(())
}

async fn submit(
    files: &[PathBuf],
    server: &str,
    count: Option<u64>,
    retries: Option<usize>,
    outfolder: Option<&Path>,
) -> anyhow::Result<()> {
    let client = SwgtsClient::new(server)?.with_retries(retries);
    let options = UploadOptions { chunk_bases: count };

    let names: Vec<String> = files.iter().map(|f| f.display().to_string()).collect();
    println!(
        "Submitting {}{}",
        names.join(", "),
        if files.len() > 1 { " in paired-end mode" } else { "" }
    );

    let report = client.upload(files, &options).await?;
    println!(
        "The server saved {} of {}.",
        report.summary.saved.len(),
        report.summary.total
    );
    info!(
        context = %report.context,
        chunks = report.transmit.chunks,
        deferrals = report.transmit.deferrals,
        splits = report.transmit.splits,
        "Upload finished"
    );

    if let Some(outfolder) = outfolder {
        println!("Reconstructing the filtered read files in {}", outfolder.display());
        let saved: HashSet<String> = report.summary.saved.into_iter().collect();
        for path in reconstruct(files, &saved, outfolder)? {
            println!("  {}", path.display());
        }
    }

    Ok(())
}
