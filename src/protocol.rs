//! The [BGW](https://dl.acm.org/doi/10.1145/62212.62213) protocol for semi-honest MPC of
//! arithmetic circuits.
//!
//! Every party runs [`mpc`] with its own index and (if it owns an input gate) its private
//! value. All parties execute the same three phases, there is no leader:
//!
//! 1. Input sharing: each input owner splits its value into Shamir shares of the circuit's
//!    degree and sends one share to every party.
//! 2. Evaluation: gates are evaluated in ascending id order on shares. ADD gates are local,
//!    MUL gates multiply locally and then run a degree reduction round, in which every party
//!    reshares its product share and recombines the received shares with the `2·degree + 1`
//!    Lagrange coefficients.
//! 3. Output: every party broadcasts its share of the output wire and interpolates the result
//!    from `degree + 1` shares.
//!
//! Every `receive` blocks the party until the message arrives or the configured timeout
//! elapses. Any error aborts the run for this party, the other parties will then time out at
//! their next exchange with it.
use std::{collections::BTreeMap, time::Duration};

use futures::future::try_join_all;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing::{Level, debug, info, instrument, trace};

use crate::{
    channel::{self, Channel, ErrorKind, SimpleChannel, Tag, Transport},
    circuit::{self, Circuit, GateKind, ShareTable},
    field::{self, Field},
    sharing::{self, Shamir},
};

/// A custom error type for MPC computation and communication.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Prime, degree and party count do not allow a secure, reconstructable sharing.
    #[error("invalid circuit parameters: {0}")]
    InvalidCircuitParameters(circuit::Error),
    /// The gate list is malformed (unknown kind, dangling or duplicate wiring).
    #[error("malformed circuit: {0}")]
    MalformedCircuit(circuit::Error),
    /// A field inverse of zero was requested.
    #[error("division by zero")]
    DivisionByZero,
    /// Not enough shares were available for a reconstruction.
    #[error("expected at least {needed} shares, got {actual}")]
    InsufficientShares {
        /// The reconstruction threshold.
        needed: usize,
        /// The number of available shares.
        actual: usize,
    },
    /// A party did not send an expected message before the receive timeout elapsed.
    #[error("party {party} did not respond in time (during {phase})")]
    PeerTimeout {
        /// The party that was waited for.
        party: usize,
        /// The exchange that was waited for.
        phase: String,
    },
    /// A message could not be sent or received.
    #[error(transparent)]
    Channel(channel::Error),
    /// Sharing or reconstruction failed for another reason.
    #[error(transparent)]
    Sharing(sharing::Error),
    /// The specified party does not exist in the circuit.
    #[error("party {party} is not one of the {n_parties} parties")]
    PartyDoesNotExist {
        /// The index of the party.
        party: usize,
        /// The number of parties of the circuit.
        n_parties: usize,
    },
    /// The party owns an input gate but no private value was provided.
    #[error("party {0} owns an input gate, but no private value was provided")]
    MissingInput(usize),
    /// The party owns no input gate but a private value was provided.
    #[error("party {0} owns no input gate, but a private value was provided")]
    UnexpectedInput(usize),
}

impl From<circuit::Error> for Error {
    fn from(e: circuit::Error) -> Self {
        if e.is_parameter_error() {
            Self::InvalidCircuitParameters(e)
        } else {
            Self::MalformedCircuit(e)
        }
    }
}

impl From<field::Error> for Error {
    fn from(e: field::Error) -> Self {
        match e {
            field::Error::DivisionByZero => Self::DivisionByZero,
            field::Error::NotPrime(_) => Self::InvalidCircuitParameters(e.into()),
        }
    }
}

impl From<sharing::Error> for Error {
    fn from(e: sharing::Error) -> Self {
        match e {
            sharing::Error::InsufficientShares { needed, actual } => {
                Self::InsufficientShares { needed, actual }
            }
            sharing::Error::Field(e) => e.into(),
            e => Self::Sharing(e),
        }
    }
}

impl From<channel::Error> for Error {
    fn from(e: channel::Error) -> Self {
        match e.reason {
            ErrorKind::PeerTimeout(party) => Self::PeerTimeout {
                party,
                phase: e.phase,
            },
            _ => Self::Channel(e),
        }
    }
}

/// Settings of a single protocol run.
#[derive(Debug, Clone, Copy)]
pub struct MpcConfig {
    /// How long a party waits for a single message before giving up with
    /// [`Error::PeerTimeout`].
    pub recv_timeout: Duration,
    /// Makes the random polynomials of all parties reproducible, for debugging only.
    pub seed: Option<u64>,
}

impl Default for MpcConfig {
    fn default() -> Self {
        Self {
            recv_timeout: Duration::from_secs(10 * 60),
            seed: None,
        }
    }
}

impl MpcConfig {
    fn rng(&self, p_own: usize) -> ChaCha20Rng {
        match self.seed {
            Some(seed) => {
                let mut rng = ChaCha20Rng::seed_from_u64(seed);
                rng.set_stream(p_own as u64);
                rng
            }
            None => ChaCha20Rng::from_rng(&mut rand::rng()),
        }
    }
}

/// Executes the BGW protocol for a single party and returns the public output.
///
/// # Arguments
///
/// * `channel` - Communication channel to interact with the other parties
/// * `circuit` - The arithmetic circuit to be evaluated, identical for all parties
/// * `p_own` - Index of the current party executing this function (`1..=n_parties`)
/// * `input` - The party's private value, if the party owns an input gate
/// * `config` - Timeout and randomness settings
///
/// # Errors
///
/// Returns `Error` if the circuit is invalid, the party index or input do not match the
/// circuit, or a message could not be exchanged with another party in time.
#[instrument(level = Level::DEBUG, skip_all, fields(party = p_own), err)]
pub async fn mpc<C: Channel>(
    channel: C,
    circuit: &Circuit,
    p_own: usize,
    input: Option<u64>,
    config: MpcConfig,
) -> Result<u64, Error> {
    validate(circuit, p_own, input)?;
    let field = circuit.field()?;
    let mut ctx = Context {
        circ: circuit,
        p_own,
        p_max: circuit.n_parties,
        degree: circuit.degree,
        field,
        transport: Transport::new(channel, p_own, circuit.n_parties, config.recv_timeout),
        shamir: Shamir::new(field, circuit.n_parties),
        rng: config.rng(p_own),
    };

    let inputs = share_inputs(&mut ctx, input).await?;
    let output_share = evaluate(&mut ctx, &inputs).await?;
    let output = reveal(&mut ctx, output_share).await?;

    info!(party = p_own, output, "protocol finished");
    Ok(output)
}

/// Simulates the protocol with all parties in the same task, using [`SimpleChannel`]s.
///
/// `inputs` maps the index of every input owner to its private value. Returns the output of
/// every party, in party order.
pub async fn simulate_mpc(
    circuit: &Circuit,
    inputs: &BTreeMap<usize, u64>,
    config: MpcConfig,
) -> Result<Vec<u64>, Error> {
    let channels = SimpleChannel::channels(circuit.n_parties);
    simulate_mpc_with(channels, circuit, inputs, config).await
}

/// Simulates the protocol over the given channels, the channel of party `i` at position `i - 1`.
pub async fn simulate_mpc_with<C: Channel>(
    channels: Vec<C>,
    circuit: &Circuit,
    inputs: &BTreeMap<usize, u64>,
    config: MpcConfig,
) -> Result<Vec<u64>, Error> {
    try_join_all(channels.into_iter().enumerate().map(|(i, channel)| {
        let p_own = i + 1;
        mpc(channel, circuit, p_own, inputs.get(&p_own).copied(), config)
    }))
    .await
}

struct Context<'circ, C: Channel> {
    circ: &'circ Circuit,
    p_own: usize,
    p_max: usize,
    degree: usize,
    field: Field,
    transport: Transport<C>,
    shamir: Shamir,
    rng: ChaCha20Rng,
}

fn validate(circ: &Circuit, p_own: usize, input: Option<u64>) -> Result<(), Error> {
    circ.validate()?;
    if p_own == 0 || p_own > circ.n_parties {
        return Err(Error::PartyDoesNotExist {
            party: p_own,
            n_parties: circ.n_parties,
        });
    }
    match (circ.has_input(p_own), input) {
        (true, None) => Err(Error::MissingInput(p_own)),
        (false, Some(_)) => Err(Error::UnexpectedInput(p_own)),
        _ => Ok(()),
    }
}

/// Sends a different value to every party (including this one).
async fn scatter(
    ctx: &mut Context<'_, impl Channel>,
    tag: Tag,
    shares: BTreeMap<usize, u64>,
) -> Result<(), Error> {
    for (p, share) in shares {
        ctx.transport.send(p, tag, share).await?;
    }
    Ok(())
}

/// Sends the same value to every party (including this one).
async fn broadcast(ctx: &mut Context<'_, impl Channel>, tag: Tag, value: u64) -> Result<(), Error> {
    for p in 1..=ctx.p_max {
        ctx.transport.send(p, tag, value).await?;
    }
    Ok(())
}

async fn receive_all(
    ctx: &mut Context<'_, impl Channel>,
    tag: Tag,
) -> Result<BTreeMap<usize, u64>, Error> {
    let mut shares = BTreeMap::new();
    for p in 1..=ctx.p_max {
        shares.insert(p, ctx.transport.receive(p, tag).await?);
    }
    Ok(shares)
}

#[instrument(level = Level::DEBUG, skip_all, err)]
async fn share_inputs(
    ctx: &mut Context<'_, impl Channel>,
    input: Option<u64>,
) -> Result<BTreeMap<usize, u64>, Error> {
    let circ = ctx.circ;
    if let Some(value) = input {
        let shares = ctx.shamir.share(value, ctx.degree, &mut ctx.rng);
        trace!(?shares, "input shares");
        let tag = Tag::Input(ctx.p_own);
        scatter(ctx, tag, shares).await?;
    }
    let mut inputs = BTreeMap::new();
    for owner in circ.input_parties() {
        inputs.insert(owner, ctx.transport.receive(owner, Tag::Input(owner)).await?);
    }
    debug!(inputs = inputs.len(), "received input shares");
    Ok(inputs)
}

#[instrument(level = Level::DEBUG, skip_all, err)]
async fn evaluate(
    ctx: &mut Context<'_, impl Channel>,
    inputs: &BTreeMap<usize, u64>,
) -> Result<u64, Error> {
    let circ = ctx.circ;
    let field = ctx.field;
    let mut table = ShareTable::new(circ.output_gate());
    for (&id, gate) in &circ.gates {
        let share = match gate.kind {
            GateKind::Input => *inputs
                .get(&id)
                .ok_or(circuit::Error::MissingInput(id))?,
            GateKind::Const(c) => field.reduce(c),
            GateKind::Add => {
                let (a, b) = table.operands(id)?;
                field.add(a, b)
            }
            GateKind::Mul => {
                let (a, b) = table.operands(id)?;
                multiply(ctx, id, a, b).await?
            }
        };
        table.set(gate.dest, gate.slot, share)?;
    }
    Ok(table.output()?)
}

/// Multiplies two shares and reduces the degree of the product back to the sharing degree.
async fn multiply(
    ctx: &mut Context<'_, impl Channel>,
    gate: usize,
    a: u64,
    b: u64,
) -> Result<u64, Error> {
    let product = ctx.field.mul(a, b);
    let shares = ctx.shamir.share(product, ctx.degree, &mut ctx.rng);
    scatter(ctx, Tag::Gate(gate), shares).await?;
    let received = receive_all(ctx, Tag::Gate(gate)).await?;
    // the product of two degree d polynomials has degree 2d
    let reduced = ctx.shamir.reconstruct(&received, 2 * ctx.degree + 1)?;
    debug!(gate, "degree reduction finished");
    Ok(reduced)
}

#[instrument(level = Level::DEBUG, skip_all, err)]
async fn reveal(ctx: &mut Context<'_, impl Channel>, share: u64) -> Result<u64, Error> {
    let tag = Tag::Output(ctx.circ.output_gate());
    broadcast(ctx, tag, share).await?;
    let shares = receive_all(ctx, tag).await?;
    Ok(ctx.shamir.reconstruct(&shares, ctx.degree + 1)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> MpcConfig {
        MpcConfig {
            seed: Some(42),
            ..MpcConfig::default()
        }
    }

    #[tokio::test]
    async fn seeded_runs_are_reproducible() -> Result<(), Error> {
        let (circuit, inputs) = Circuit::sum_of_products();
        let first = simulate_mpc(&circuit, &inputs, seeded()).await?;
        let second = simulate_mpc(&circuit, &inputs, seeded()).await?;
        assert_eq!(first, vec![7; 6]);
        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn rejects_mismatched_inputs() {
        let (circuit, _) = Circuit::sum_of_products();
        let channel = SimpleChannel::channels(6).remove(0);
        let err = mpc(channel, &circuit, 1, None, seeded()).await.unwrap_err();
        assert!(matches!(err, Error::MissingInput(1)));

        let (mut circuit, _) = Circuit::binary_to_decimal(&[1, 0]);
        circuit.n_parties = 5;
        let channel = SimpleChannel::channels(5).remove(4);
        let err = mpc(channel, &circuit, 5, Some(1), seeded()).await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedInput(5)));

        let channel = SimpleChannel::channels(5).remove(0);
        let err = mpc(channel, &circuit, 6, None, seeded()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::PartyDoesNotExist {
                party: 6,
                n_parties: 5
            }
        ));
    }

    #[test]
    fn maps_errors_to_the_taxonomy() {
        let err: Error = field::Error::DivisionByZero.into();
        assert!(matches!(err, Error::DivisionByZero));
        let err: Error = sharing::Error::Field(field::Error::DivisionByZero).into();
        assert!(matches!(err, Error::DivisionByZero));
        let err: Error = sharing::Error::InsufficientShares {
            needed: 3,
            actual: 1,
        }
        .into();
        assert!(matches!(
            err,
            Error::InsufficientShares {
                needed: 3,
                actual: 1
            }
        ));
        let err: Error = circuit::Error::ZeroDegree.into();
        assert!(matches!(err, Error::InvalidCircuitParameters(_)));
        let err: Error = circuit::Error::ZeroGateId.into();
        assert!(matches!(err, Error::MalformedCircuit(_)));
        let err: Error = channel::Error {
            phase: "gate 4".to_string(),
            reason: ErrorKind::PeerTimeout(2),
        }
        .into();
        assert!(matches!(err, Error::PeerTimeout { party: 2, .. }));
    }
}
