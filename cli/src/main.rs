use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use nodelist::{
    ClientConfig, End, LauncherConfig, NodeClient, Step, Traversal,
};

#[derive(Parser)]
#[command(name = "nodelist", about = "A linked list made of network services")]
struct Cli {
    /// Host new nodes listen on.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// Per round-trip timeout.
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a chain holding the given values and walk it.
    Chain {
        #[arg(required = true)]
        values: Vec<i64>,
    },
    /// For each even number up to the limit, store a prime pair summing to it
    /// as two chains of decimal digits and read them back.
    Goldbach {
        #[arg(long, default_value_t = 20)]
        limit: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let client = NodeClient::new(
        ClientConfig::builder()
            .timeout(Duration::from_millis(cli.timeout_ms))
            .launcher(LauncherConfig::builder().host(cli.host).build())
            .build(),
    );

    match cli.command {
        Command::Chain { values } => chain(&client, values).await,
        Command::Goldbach { limit } => goldbach(&client, limit).await,
    }
}

async fn chain(client: &NodeClient, values: Vec<i64>) -> anyhow::Result<()> {
    let chain = client
        .build_chain(values)
        .await
        .context("failed to build chain")?;
    println!("head at {}", chain.head());

    let mut steps = Box::pin(client.traverse::<i64>(chain.head().clone()));
    while let Some(step) = steps.next().await {
        match step {
            Step::Node { address, payload } => println!("{} -> {}", address, payload),
            Step::End(End::EndOfChain) => println!("end of chain"),
            Step::End(End::ReadFailed { address, reason }) => {
                println!("stopped at {}: {}", address, reason)
            }
            Step::End(End::HopLimitReached { address }) => {
                println!("hop limit reached before {}", address)
            }
        }
    }

    chain.shutdown().await?;
    Ok(())
}

async fn goldbach(client: &NodeClient, limit: u64) -> anyhow::Result<()> {
    println!("storing prime pairs for even numbers up to {}", limit);
    for even in (4..=limit).step_by(2) {
        let Some(p) = (2..even).find(|&p| is_prime(p) && is_prime(even - p)) else {
            println!("failed to find prime pair for {}", even);
            continue;
        };
        let q = even - p;
        println!("{} = {} + {}", even, p, q);
        for (name, n) in [("p", p), ("q", q)] {
            let chain = client.build_chain(digits(n)).await?;
            let walk = client.collect::<u8>(chain.head().clone()).await;
            println!("  {}: {} ({} nodes from {})", name, render(&walk)?, chain.len(), chain.head());
            chain.shutdown().await?;
        }
    }
    println!("done");
    Ok(())
}

/// Decimal digits, least significant first.
fn digits(mut n: u64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        out.push((n % 10) as u8);
        n /= 10;
        if n == 0 {
            return out;
        }
    }
}

/// Prints a least-significant-first digit chain most significant first.
fn render(walk: &Traversal<u8>) -> anyhow::Result<String> {
    if !walk.is_complete() {
        bail!("chain read ended early: {:?}", walk.end);
    }
    Ok(walk
        .payloads
        .iter()
        .rev()
        .map(|d| char::from(b'0' + d))
        .collect())
}

fn is_prime(n: u64) -> bool {
    if n <= 3 {
        return n > 1;
    }
    if n % 2 == 0 || n % 3 == 0 {
        return false;
    }
    let mut i = 5;
    while i * i <= n {
        if n % i == 0 || n % (i + 2) == 0 {
            return false;
        }
        i += 6;
    }
    true
}
