use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use strassen::{Config, DEFAULT_CUTOVER, Orchestrator, Report, Strategy, WORKERS, random_pair};

#[derive(Parser)]
#[command(name = "strassen")]
#[command(about = "Strassen matrix multiplication: sequential, parallel and distributed")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Multiply with plain recursion.
    Sequential(RunArgs),
    /// Multiply with pooled recursive tasks.
    Parallel(RunArgs),
    /// Multiply across eight message-passing ranks.
    Distributed(RunArgs),
    /// Run all three strategies on the same inputs and check they agree.
    Compare(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Side length of the random square matrices.
    side: usize,
    /// Side at or below which products are computed directly.
    #[arg(long, default_value_t = DEFAULT_CUTOVER)]
    cutover: usize,
    /// Threads for the parallel strategy (defaults to available cores).
    #[arg(long)]
    threads: Option<usize>,
    /// Ranks for the distributed strategy.
    #[arg(long, default_value_t = WORKERS)]
    workers: usize,
    /// Elements per broadcast chunk.
    #[arg(long, default_value_t = 1024)]
    chunk_len: usize,
    /// Seconds to wait on any rank before giving up; 0 waits forever.
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
    /// Seed for reproducible inputs.
    #[arg(long)]
    seed: Option<u64>,
    /// Reject sides that do not halve down to the cutover instead of padding.
    #[arg(long)]
    no_pad: bool,
    /// Print the operands and the product.
    #[arg(long)]
    print: bool,
}

impl RunArgs {
    fn config(&self) -> Config {
        let defaults = Config::default();
        Config {
            cutover: self.cutover,
            pool_size: self.threads.unwrap_or(defaults.pool_size),
            workers: self.workers,
            chunk_len: self.chunk_len,
            recv_timeout: (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs)),
            pad: !self.no_pad,
        }
    }
}

fn print_report(report: &Report) {
    println!(
        "{} runtime: {:.3} ms ({}x{}{})",
        report.strategy,
        report.elapsed.as_secs_f64() * 1000.0,
        report.side,
        report.side,
        if report.padded_side != report.side {
            format!(", padded to {}", report.padded_side)
        } else {
            String::new()
        }
    );
    if report.setup > Duration::ZERO {
        println!(
            "{} setup (untimed): {:.3} ms",
            report.strategy,
            report.setup.as_secs_f64() * 1000.0
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let (strategy, args) = match cli.command {
        Commands::Sequential(args) => (Some(Strategy::Sequential), args),
        Commands::Parallel(args) => (Some(Strategy::Parallel), args),
        Commands::Distributed(args) => (Some(Strategy::Distributed), args),
        Commands::Compare(args) => (None, args),
    };

    let orchestrator = Orchestrator::new(args.config())?;
    let (a, b) = random_pair(args.side, args.seed);
    if args.print {
        println!("Matrix A:\n{a}");
        println!("Matrix B:\n{b}");
    }

    let reports = match strategy {
        Some(strategy) => vec![orchestrator.run(strategy, &a, &b).await?],
        None => orchestrator.compare(&a, &b).await?,
    };

    if args.print {
        if let Some(report) = reports.first() {
            println!("Result:\n{}", report.product);
        }
    }
    for report in &reports {
        print_report(report);
    }
    if strategy.is_none() {
        println!("All strategies agree.");
    }

    Ok(())
}
