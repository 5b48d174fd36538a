//! Runs one of the built-in circuits with all parties simulated in a single process.
use std::time::Duration;

use anyhow::{Context, bail};
use bgw_mpc::{
    circuit::Circuit,
    protocol::{MpcConfig, simulate_mpc},
};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

/// Evaluates an arithmetic circuit with the BGW protocol, simulating every party.
///
/// Logging can be controlled with an EnvFilter via the `BGW_LOG` environment variable.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// The built-in circuit to evaluate.
    #[arg(long, value_enum, default_value_t = BuiltinCircuit::SumOfProducts)]
    circuit: BuiltinCircuit,
    /// The binary digits (most significant first) converted by the `binary` circuit.
    #[arg(long, default_value = "1101")]
    digits: String,
    /// The number of multiplication levels of the `product-tree` circuit.
    #[arg(long, default_value_t = 3)]
    levels: u32,
    /// Comma-separated private values replacing the defaults of the circuit, in party order.
    #[arg(long, value_delimiter = ',')]
    inputs: Option<Vec<u64>>,
    /// The number of parties, at least the number of input gates of the circuit.
    #[arg(long)]
    parties: Option<usize>,
    /// Seed for reproducible random polynomials.
    #[arg(long)]
    seed: Option<u64>,
    /// How long a party waits for a single message.
    #[arg(long, default_value_t = 600)]
    timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BuiltinCircuit {
    /// `x1·x2 + x3·x4 + x5·x6` over `Z_101` with six parties.
    SumOfProducts,
    /// The product of `2^levels` inputs, multiplied pairwise in a tree.
    ProductTree,
    /// The decimal value of a binary number, one party per digit and power of two.
    Binary,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing().context("tracing initialization")?;

    let cli = Cli::parse();
    let (mut circuit, mut inputs) = match cli.circuit {
        BuiltinCircuit::SumOfProducts => Circuit::sum_of_products(),
        BuiltinCircuit::ProductTree => Circuit::product_tree(cli.levels)?,
        BuiltinCircuit::Binary => Circuit::binary_to_decimal(&parse_digits(&cli.digits)?),
    };
    if let Some(values) = cli.inputs {
        if values.len() != inputs.len() {
            bail!(
                "the circuit has {} inputs, but {} values were given",
                inputs.len(),
                values.len()
            );
        }
        inputs = circuit.input_parties().zip(values).collect();
    }
    if let Some(parties) = cli.parties {
        circuit.n_parties = parties;
    }
    let config = MpcConfig {
        recv_timeout: Duration::from_secs(cli.timeout_secs),
        seed: cli.seed,
    };

    let expected = circuit.eval_plain(&inputs)?;
    let outputs = simulate_mpc(&circuit, &inputs, config).await?;
    for (i, output) in outputs.iter().enumerate() {
        info!(party = i + 1, output, "output");
    }
    if outputs.iter().any(|&o| o != expected) {
        bail!("parties disagree with the plaintext result {expected}: {outputs:?}");
    }
    println!("{expected}");
    Ok(())
}

fn parse_digits(digits: &str) -> anyhow::Result<Vec<u64>> {
    digits
        .chars()
        .map(|c| match c {
            '0' => Ok(0),
            '1' => Ok(1),
            _ => bail!("'{c}' is not a binary digit"),
        })
        .collect()
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = EnvFilter::builder()
        .with_env_var("BGW_LOG")
        .with_default_directive("info".parse()?)
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .init();

    Ok(())
}
