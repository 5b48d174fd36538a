use std::{collections::BTreeMap, time::Duration};

use bgw_mpc::{
    channel::SimpleChannel,
    circuit::{ADD, Circuit, Gate, GateKind, INP, MUL, Slot},
    protocol::{Error, MpcConfig, mpc, simulate_mpc, simulate_mpc_with},
};
use futures::future::join_all;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// `(v1 · v2) + v3` over `Z_101`.
fn mul_add_circuit() -> Circuit {
    let gates = [
        (1, INP, 4, 1),
        (2, INP, 4, 2),
        (3, INP, 5, 2),
        (4, MUL, 5, 1),
        (5, ADD, 6, 1),
    ];
    Circuit::from_raw(101, 1, 3, &gates).unwrap()
}

fn seeded(seed: u64) -> MpcConfig {
    MpcConfig {
        seed: Some(seed),
        ..MpcConfig::default()
    }
}

#[tokio::test]
async fn eval_mul_add_3pc() -> Result<(), Error> {
    let circuit = mul_add_circuit();
    let inputs = BTreeMap::from([(1, 5), (2, 7), (3, 3)]);
    assert_eq!(
        simulate_mpc(&circuit, &inputs, MpcConfig::default()).await?,
        vec![38; 3]
    );
    for (x, y, z) in [(20, 40, 21), (0, 57, 3), (100, 100, 100), (1, 1, 0)] {
        let inputs = BTreeMap::from([(1, x), (2, y), (3, z)]);
        let output = simulate_mpc(&circuit, &inputs, MpcConfig::default()).await?;
        assert_eq!(output, vec![(x * y + z) % 101; 3]);
    }
    Ok(())
}

#[tokio::test]
async fn eval_sum_of_products() -> Result<(), Error> {
    let (circuit, inputs) = Circuit::sum_of_products();
    let output = simulate_mpc(&circuit, &inputs, MpcConfig::default()).await?;
    assert_eq!(output, vec![7; 6]);
    Ok(())
}

#[tokio::test]
async fn eval_with_more_parties_than_inputs() -> Result<(), Error> {
    let (mut circuit, inputs) = Circuit::sum_of_products();
    circuit.n_parties = 9;
    circuit.degree = 4;
    let output = simulate_mpc(&circuit, &inputs, seeded(3)).await?;
    assert_eq!(output, vec![7; 9]);

    let (mut circuit, inputs) = Circuit::binary_to_decimal(&[1, 1, 0, 1]);
    circuit.n_parties = 8;
    let output = simulate_mpc(&circuit, &inputs, MpcConfig::default()).await?;
    assert_eq!(output, vec![13; 8]);
    Ok(())
}

#[tokio::test]
async fn eval_binary_to_decimal() -> Result<(), Error> {
    for digits in [vec![1, 0, 1], vec![0, 0, 0, 0], vec![1, 1, 0, 0, 1, 1, 0, 1]] {
        let (circuit, inputs) = Circuit::binary_to_decimal(&digits);
        let expected = digits.iter().fold(0, |acc, d| 2 * acc + d);
        let output = simulate_mpc(&circuit, &inputs, MpcConfig::default()).await?;
        assert_eq!(output, vec![expected; circuit.n_parties]);
    }
    Ok(())
}

#[tokio::test]
async fn eval_long_binary_number() -> Result<(), Error> {
    let digits = vec![1; 65];
    let (circuit, inputs) = Circuit::binary_to_decimal(&digits);
    let expected = circuit.eval_plain(&inputs)?;
    // 2^65 - 1 mod 100003
    let expected_by_hand = ((1u128 << 65) - 1) % 100_003;
    assert_eq!(expected as u128, expected_by_hand);
    let output = simulate_mpc(&circuit, &inputs, seeded(65)).await?;
    assert_eq!(output, vec![expected; circuit.n_parties]);
    Ok(())
}

#[tokio::test]
async fn eval_product_tree() -> Result<(), Error> {
    let (circuit, inputs) = Circuit::product_tree(3)?;
    let output = simulate_mpc(&circuit, &inputs, MpcConfig::default()).await?;
    assert_eq!(output, vec![40_320; 8]);
    Ok(())
}

#[tokio::test]
async fn eval_random_inputs_like_plaintext() -> Result<(), Error> {
    let mut rng = ChaCha20Rng::seed_from_u64(1234);
    let (circuit, _) = Circuit::product_tree(2)?;
    for _ in 0..20 {
        let inputs: BTreeMap<usize, u64> = circuit
            .input_parties()
            .map(|p| (p, rng.random_range(0..circuit.prime)))
            .collect();
        let expected = circuit.eval_plain(&inputs)?;
        let output = simulate_mpc(&circuit, &inputs, MpcConfig::default()).await?;
        assert_eq!(output, vec![expected; circuit.n_parties]);
    }
    Ok(())
}

#[tokio::test]
async fn eval_constants() -> Result<(), Error> {
    // 7 · (v1 + v2) + 100
    let gates = BTreeMap::from([
        (1, Gate::new(GateKind::Input, 3, Slot::First)),
        (2, Gate::new(GateKind::Input, 3, Slot::Second)),
        (3, Gate::new(GateKind::Add, 5, Slot::First)),
        (4, Gate::new(GateKind::Const(7), 5, Slot::Second)),
        (5, Gate::new(GateKind::Mul, 7, Slot::First)),
        (6, Gate::new(GateKind::Const(100), 7, Slot::Second)),
        (7, Gate::new(GateKind::Add, 8, Slot::First)),
    ]);
    let circuit = Circuit {
        prime: 1_009,
        degree: 2,
        n_parties: 5,
        gates,
    };
    let inputs = BTreeMap::from([(1, 30), (2, 12)]);
    let output = simulate_mpc(&circuit, &inputs, MpcConfig::default()).await?;
    assert_eq!(output, vec![394; 5]);
    Ok(())
}

#[tokio::test]
async fn eval_over_broadcast_medium() -> Result<(), Error> {
    let (circuit, inputs) = Circuit::sum_of_products();
    let channels = SimpleChannel::broadcast_channels(circuit.n_parties);
    let output = simulate_mpc_with(channels, &circuit, &inputs, MpcConfig::default()).await?;
    assert_eq!(output, vec![7; 6]);
    Ok(())
}

#[tokio::test]
async fn output_does_not_depend_on_randomness() -> Result<(), Error> {
    let (circuit, inputs) = Circuit::product_tree(2)?;
    let expected = circuit.eval_plain(&inputs)?;
    for seed in 0..5 {
        let output = simulate_mpc(&circuit, &inputs, seeded(seed)).await?;
        assert_eq!(output, vec![expected; 4]);
    }
    Ok(())
}

#[tokio::test]
async fn reject_invalid_parameters() {
    let inputs = BTreeMap::from([(1, 1), (2, 2), (3, 3)]);
    let gates = [
        (1, INP, 4, 1),
        (2, INP, 4, 2),
        (3, INP, 5, 2),
        (4, MUL, 5, 1),
        (5, ADD, 6, 1),
    ];
    for (prime, degree) in [(3, 1), (100, 1), (101, 2), (101, 0)] {
        let circuit = Circuit::from_raw(prime, degree, 3, &gates).unwrap();
        let err = simulate_mpc(&circuit, &inputs, MpcConfig::default())
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::InvalidCircuitParameters(_)),
            "prime {prime}, degree {degree}: {err}"
        );
    }
}

#[tokio::test]
async fn reject_malformed_circuits() {
    let inputs = BTreeMap::from([(1, 1), (2, 2), (3, 3)]);

    let mut dangling = mul_add_circuit();
    dangling.gates.insert(5, Gate::new(GateKind::Add, 9, Slot::First));
    let mut backwards = mul_add_circuit();
    backwards.gates.insert(4, Gate::new(GateKind::Mul, 2, Slot::First));
    let mut unfed = mul_add_circuit();
    unfed.gates.remove(&3);

    for circuit in [dangling, backwards, unfed] {
        let inputs: BTreeMap<usize, u64> = inputs
            .iter()
            .filter(|(p, _)| circuit.has_input(**p))
            .map(|(p, v)| (*p, *v))
            .collect();
        let err = simulate_mpc(&circuit, &inputs, MpcConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedCircuit(_)), "{err}");
    }

    let err: Error = Circuit::from_raw(101, 1, 3, &[(1, INP, 2, 1), (2, 7, 3, 1)])
        .unwrap_err()
        .into();
    assert!(matches!(err, Error::MalformedCircuit(_)), "{err}");
}

#[tokio::test]
async fn missing_party_times_out() {
    let circuit = mul_add_circuit();
    let inputs = BTreeMap::from([(1, 20), (2, 40), (3, 21)]);
    let config = MpcConfig {
        recv_timeout: Duration::from_millis(100),
        seed: Some(1),
    };
    let mut channels = SimpleChannel::channels(3);
    // party 3 stays reachable but never runs the protocol
    let _idle = channels.pop();

    let runs = channels.into_iter().enumerate().map(|(i, channel)| {
        let p_own = i + 1;
        mpc(channel, &circuit, p_own, inputs.get(&p_own).copied(), config)
    });
    for result in join_all(runs).await {
        match result {
            Err(Error::PeerTimeout { party, phase }) => {
                assert_eq!(party, 3);
                assert!(phase.contains("input"), "{phase}");
            }
            other => panic!("expected a timeout, got {other:?}"),
        }
    }
}
