//! A Rust implementation of the [BGW](https://dl.acm.org/doi/10.1145/62212.62213) protocol for
//! semi-honest secure multi-party computation (MPC) of arithmetic circuits.
//!
//! A fixed set of parties jointly evaluates an arithmetic circuit over a prime field. Each
//! party contributes at most one private input and all parties learn the circuit's output,
//! while any coalition of up to `degree` parties learns nothing beyond it.
//!
//! ## Main Components
//!
//! The crate is structured into several modules:
//!
//! * [`field`]: Arithmetic modulo a prime.
//! * [`sharing`]: Shamir secret sharing with cached Lagrange recombination vectors.
//! * [`circuit`]: The circuit model, its validation and a few built-in circuits.
//! * [`channel`]: Communication abstractions and the tagged, buffering transport.
//! * [`protocol`]: The [`protocol::mpc`] function which executes the protocol for a single party.
//!
//! ## Basic Usage
//!
//! To run an MPC computation, each participating party needs to:
//!
//! 1. Set up communication channels with other parties
//! 2. Create or load a circuit definition (identical for all parties)
//! 3. Call the [`protocol::mpc`] function with its own index and private input
//!
//! For simulated environments (testing/development), you can use the [`protocol::simulate_mpc`]
//! function, which runs all parties concurrently in the same task.
//!
//! ## Example
//!
//! ```
//! use bgw_mpc::{
//!     circuit::{ADD, Circuit, INP, MUL},
//!     protocol::{Error, MpcConfig, simulate_mpc},
//! };
//! use std::collections::BTreeMap;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Error> {
//! // (v1 · v2) + v3 over Z_101, shared with polynomials of degree 1
//! let gates = [(1, INP, 4, 1), (2, INP, 4, 2), (3, INP, 5, 2), (4, MUL, 5, 1), (5, ADD, 6, 1)];
//! let circuit = Circuit::from_raw(101, 1, 3, &gates)?;
//! let inputs = BTreeMap::from([(1, 5), (2, 7), (3, 3)]);
//!
//! let outputs = simulate_mpc(&circuit, &inputs, MpcConfig::default()).await?;
//! assert_eq!(outputs, vec![38; 3]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Properties
//!
//! This implementation provides security against semi-honest adversaries corrupting at most
//! `degree` parties, with `2 · degree < n_parties`. Parties that deviate from the protocol are
//! not detected.
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod channel;
pub mod circuit;
pub mod field;
pub mod protocol;
pub mod sharing;
