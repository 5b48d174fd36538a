//! Arithmetic circuits evaluated by the parties.
//!
//! A circuit is a list of gates keyed by their id (starting at 1). Every gate writes its
//! value into one of the two operand slots of a destination gate with a larger id, so
//! evaluating the gates in ascending id order is always a valid topological order. The
//! value written to the first slot of the (virtual) gate `max_id + 1` is the output.
//!
//! Input gate `i` holds the private value of party `i`. Circuits may have fewer input gates
//! than parties, the remaining parties only take part in the evaluation.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::field::{self, Field};

/// The prime of the built-in circuits with many parties.
const BUILTIN_PRIME: u64 = 100_003;

/// Numeric kind code of input gates in raw circuit descriptions.
pub const INP: u8 = 0;
/// Numeric kind code of addition gates in raw circuit descriptions.
pub const ADD: u8 = 1;
/// Numeric kind code of multiplication gates in raw circuit descriptions.
pub const MUL: u8 = 2;

/// Errors caused by invalid circuit parameters or malformed gate lists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The modulus is not a valid field prime.
    #[error(transparent)]
    Field(#[from] field::Error),
    /// The circuit is evaluated by zero parties.
    #[error("the circuit needs at least one party")]
    NoParties,
    /// The prime does not exceed the number of parties.
    #[error("the prime {prime} must be larger than the number of parties ({n_parties})")]
    PrimeTooSmall {
        /// The field prime.
        prime: u64,
        /// The number of parties.
        n_parties: usize,
    },
    /// Shares of degree 0 do not hide anything.
    #[error("the polynomial degree must be at least 1")]
    ZeroDegree,
    /// Products of degree `2·degree` could not be interpolated from `n_parties` shares.
    #[error("2 * degree ({degree}) must be smaller than the number of parties ({n_parties})")]
    DegreeTooLarge {
        /// The polynomial degree.
        degree: usize,
        /// The number of parties.
        n_parties: usize,
    },
    /// The circuit has no gates.
    #[error("the circuit has no gates")]
    EmptyCircuit,
    /// Gate ids start at 1.
    #[error("gate ids must start at 1")]
    ZeroGateId,
    /// The same gate id was defined twice.
    #[error("gate {0} is defined more than once")]
    DuplicateGate(usize),
    /// The gate kind code is not one of `INP`, `ADD`, `MUL`.
    #[error("gate {gate} has unknown kind {kind}")]
    UnknownGateKind {
        /// The gate id.
        gate: usize,
        /// The unrecognized kind code.
        kind: u8,
    },
    /// The destination slot is neither 1 nor 2.
    #[error("gate {gate} writes to unknown slot {slot}")]
    InvalidSlot {
        /// The gate id.
        gate: usize,
        /// The unrecognized slot.
        slot: u8,
    },
    /// The destination does not exist, is an input or is the second slot of the output wire.
    #[error("gate {gate} writes to {dest} which is not an operand of any gate")]
    DanglingDestination {
        /// The gate id.
        gate: usize,
        /// The destination gate id.
        dest: usize,
    },
    /// The destination gate would be evaluated before the gate that feeds it.
    #[error("gate {gate} writes to the earlier gate {dest}")]
    BackwardWire {
        /// The gate id.
        gate: usize,
        /// The destination gate id.
        dest: usize,
    },
    /// Two gates write to the same operand slot.
    #[error("slot {slot} of gate {gate} is written more than once")]
    SlotFedTwice {
        /// The destination gate id.
        gate: usize,
        /// The operand slot.
        slot: Slot,
    },
    /// An operand slot of an ADD or MUL gate is never written.
    #[error("slot {slot} of gate {gate} is never written")]
    MissingOperand {
        /// The gate id.
        gate: usize,
        /// The operand slot.
        slot: Slot,
    },
    /// The input gate has no party with the same index.
    #[error("input gate {0} has no owner, there are fewer parties")]
    InputWithoutOwner(usize),
    /// No value was provided for the input gate.
    #[error("no value for input gate {0}")]
    MissingInput(usize),
    /// A product tree with `2^levels` inputs needs more parties than the prime allows.
    #[error("a product tree with {0} levels has too many inputs for its prime")]
    TooManyLevels(u32),
}

impl Error {
    /// Returns true if the error is caused by the prime, degree or party count.
    pub fn is_parameter_error(&self) -> bool {
        matches!(
            self,
            Error::Field(_)
                | Error::NoParties
                | Error::PrimeTooSmall { .. }
                | Error::ZeroDegree
                | Error::DegreeTooLarge { .. }
                | Error::TooManyLevels(_)
        )
    }
}

/// The operation of a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateKind {
    /// The private value of the party whose index equals the gate id.
    Input,
    /// A publicly known constant.
    Const(u64),
    /// The sum of both operands.
    Add,
    /// The product of both operands.
    Mul,
}

impl GateKind {
    fn from_code(gate: usize, kind: u8) -> Result<Self, Error> {
        match kind {
            INP => Ok(GateKind::Input),
            ADD => Ok(GateKind::Add),
            MUL => Ok(GateKind::Mul),
            kind => Err(Error::UnknownGateKind { gate, kind }),
        }
    }

    fn has_operands(self) -> bool {
        matches!(self, GateKind::Add | GateKind::Mul)
    }
}

/// One of the two operand slots of a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Slot {
    /// Slot 1.
    First,
    /// Slot 2.
    Second,
}

impl Slot {
    fn from_code(gate: usize, slot: u8) -> Result<Self, Error> {
        match slot {
            1 => Ok(Slot::First),
            2 => Ok(Slot::Second),
            slot => Err(Error::InvalidSlot { gate, slot }),
        }
    }

    fn index(self) -> usize {
        match self {
            Slot::First => 0,
            Slot::Second => 1,
        }
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.index() + 1)
    }
}

/// A gate and the operand slot its value is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gate {
    /// The operation of the gate.
    pub kind: GateKind,
    /// The id of the gate that consumes the value.
    pub dest: usize,
    /// The operand slot of `dest` the value is written to.
    pub slot: Slot,
}

impl Gate {
    /// Creates a gate writing to `slot` of `dest`.
    pub fn new(kind: GateKind, dest: usize, slot: Slot) -> Self {
        Self { kind, dest, slot }
    }
}

/// An arithmetic circuit together with the parameters of its secret sharing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Circuit {
    /// The prime of the field that inputs, shares and the output live in.
    pub prime: u64,
    /// The degree of the sharing polynomials.
    pub degree: usize,
    /// The number of parties evaluating the circuit.
    pub n_parties: usize,
    /// The gates, evaluated in ascending id order.
    pub gates: BTreeMap<usize, Gate>,
}

impl Circuit {
    /// Builds a circuit from `(id, kind, dest, slot)` rows using the `INP`/`ADD`/`MUL` codes.
    pub fn from_raw(
        prime: u64,
        degree: usize,
        n_parties: usize,
        rows: &[(usize, u8, usize, u8)],
    ) -> Result<Self, Error> {
        let mut gates = BTreeMap::new();
        for &(id, kind, dest, slot) in rows {
            let gate = Gate::new(
                GateKind::from_code(id, kind)?,
                dest,
                Slot::from_code(id, slot)?,
            );
            if gates.insert(id, gate).is_some() {
                return Err(Error::DuplicateGate(id));
            }
        }
        Ok(Self {
            prime,
            degree,
            n_parties,
            gates,
        })
    }

    /// The field the circuit is evaluated in.
    pub fn field(&self) -> Result<Field, Error> {
        Ok(Field::new(self.prime)?)
    }

    /// The id of the virtual gate whose first slot holds the output.
    pub fn output_gate(&self) -> usize {
        self.gates.keys().next_back().map_or(1, |id| id + 1)
    }

    /// The ids of the input gates, which are also the indices of the parties providing input.
    pub fn input_parties(&self) -> impl Iterator<Item = usize> + '_ {
        self.gates
            .iter()
            .filter(|(_, g)| g.kind == GateKind::Input)
            .map(|(id, _)| *id)
    }

    /// Returns true if party `p` owns an input gate.
    pub fn has_input(&self, p: usize) -> bool {
        self.gates
            .get(&p)
            .is_some_and(|g| g.kind == GateKind::Input)
    }

    /// Checks that prime, degree and party count allow a secure, reconstructable sharing.
    pub fn validate_parameters(&self) -> Result<(), Error> {
        self.field()?;
        if self.n_parties == 0 {
            return Err(Error::NoParties);
        }
        if self.prime <= self.n_parties as u64 {
            return Err(Error::PrimeTooSmall {
                prime: self.prime,
                n_parties: self.n_parties,
            });
        }
        if self.degree == 0 {
            return Err(Error::ZeroDegree);
        }
        if 2 * self.degree >= self.n_parties {
            return Err(Error::DegreeTooLarge {
                degree: self.degree,
                n_parties: self.n_parties,
            });
        }
        Ok(())
    }

    /// Checks the parameters and that every operand slot is written exactly once, by an
    /// earlier gate.
    pub fn validate(&self) -> Result<(), Error> {
        self.validate_parameters()?;
        if self.gates.is_empty() {
            return Err(Error::EmptyCircuit);
        }
        if self.gates.contains_key(&0) {
            return Err(Error::ZeroGateId);
        }
        let output = self.output_gate();
        let mut written = BTreeMap::new();
        for (&id, gate) in &self.gates {
            if gate.kind == GateKind::Input && id > self.n_parties {
                return Err(Error::InputWithoutOwner(id));
            }
            if gate.dest <= id {
                return Err(Error::BackwardWire {
                    gate: id,
                    dest: gate.dest,
                });
            }
            let consumes = if gate.dest == output {
                gate.slot == Slot::First
            } else {
                self.gates
                    .get(&gate.dest)
                    .is_some_and(|g| g.kind.has_operands())
            };
            if !consumes {
                return Err(Error::DanglingDestination {
                    gate: id,
                    dest: gate.dest,
                });
            }
            if written.insert((gate.dest, gate.slot), id).is_some() {
                return Err(Error::SlotFedTwice {
                    gate: gate.dest,
                    slot: gate.slot,
                });
            }
        }
        for (&id, gate) in &self.gates {
            if !gate.kind.has_operands() {
                continue;
            }
            for slot in [Slot::First, Slot::Second] {
                if !written.contains_key(&(id, slot)) {
                    return Err(Error::MissingOperand { gate: id, slot });
                }
            }
        }
        Ok(())
    }

    /// Evaluates the circuit in the clear, used to check the result of an MPC run.
    pub fn eval_plain(&self, inputs: &BTreeMap<usize, u64>) -> Result<u64, Error> {
        self.validate()?;
        let field = self.field()?;
        let mut table = ShareTable::new(self.output_gate());
        for (&id, gate) in &self.gates {
            let value = match gate.kind {
                GateKind::Input => field.reduce(*inputs.get(&id).ok_or(Error::MissingInput(id))?),
                GateKind::Const(c) => field.reduce(c),
                GateKind::Add => {
                    let (a, b) = table.operands(id)?;
                    field.add(a, b)
                }
                GateKind::Mul => {
                    let (a, b) = table.operands(id)?;
                    field.mul(a, b)
                }
            };
            table.set(gate.dest, gate.slot, value)?;
        }
        table.output()
    }

    /// The textbook example `x1·x2 + x3·x4 + x5·x6 mod 101` for 6 parties.
    pub fn sum_of_products() -> (Self, BTreeMap<usize, u64>) {
        let rows = [
            (1, GateKind::Input, 7, Slot::First),
            (2, GateKind::Input, 7, Slot::Second),
            (3, GateKind::Input, 8, Slot::First),
            (4, GateKind::Input, 8, Slot::Second),
            (5, GateKind::Input, 9, Slot::First),
            (6, GateKind::Input, 9, Slot::Second),
            (7, GateKind::Mul, 10, Slot::First),
            (8, GateKind::Mul, 10, Slot::Second),
            (9, GateKind::Mul, 11, Slot::First),
            (10, GateKind::Add, 11, Slot::Second),
            (11, GateKind::Add, 12, Slot::First),
        ];
        let circuit = Self {
            prime: 101,
            degree: 2,
            n_parties: 6,
            gates: gates(&rows),
        };
        let inputs = BTreeMap::from([(1, 20), (2, 40), (3, 21), (4, 31), (5, 1), (6, 71)]);
        (circuit, inputs)
    }

    /// A binary tree of MUL gates computing the product of `2^levels` inputs `1, 2, ...`.
    ///
    /// Fails if there would be at least as many parties as the prime.
    pub fn product_tree(levels: u32) -> Result<(Self, BTreeMap<usize, u64>), Error> {
        let n_inputs = 1usize
            .checked_shl(levels)
            .filter(|&n| (n as u64) < BUILTIN_PRIME)
            .ok_or(Error::TooManyLevels(levels))?;
        let mut gates = BTreeMap::new();
        let mut next = 1;
        let mut count = n_inputs;
        let mut kind = GateKind::Input;
        while count >= 1 {
            let mut out = next + count;
            let last = out - 1;
            for g in (next..next + count).step_by(2) {
                gates.insert(g, Gate::new(kind, out, Slot::First));
                if g < last {
                    gates.insert(g + 1, Gate::new(kind, out, Slot::Second));
                }
                out += 1;
            }
            next += count;
            count /= 2;
            kind = GateKind::Mul;
        }
        let circuit = Self {
            prime: BUILTIN_PRIME,
            degree: default_degree(n_inputs),
            n_parties: n_inputs,
            gates,
        };
        let inputs = (1..=n_inputs).map(|k| (k, k as u64)).collect();
        Ok((circuit, inputs))
    }

    /// Converts binary digits (most significant first) to their value.
    ///
    /// Party `i <= digits.len()` holds digit `i`, the following parties hold the powers of
    /// two the digits are multiplied with, reduced modulo the prime.
    pub fn binary_to_decimal(digits: &[u64]) -> (Self, BTreeMap<usize, u64>) {
        let k = digits.len();
        let mut inputs: BTreeMap<usize, u64> =
            digits.iter().enumerate().map(|(i, d)| (i + 1, *d)).collect();
        let mut power = 1;
        for i in (1..k).rev() {
            power = power * 2 % BUILTIN_PRIME;
            inputs.insert(i + k, power);
        }
        let n = inputs.len();

        let mut gates = BTreeMap::new();
        for i in 1..k {
            gates.insert(i, Gate::new(GateKind::Input, n + i, Slot::First));
        }
        let last_digit = match k {
            0 => None,
            1 => Some(Gate::new(GateKind::Input, 2 * n, Slot::First)),
            _ => Some(Gate::new(GateKind::Input, 2 * n - 1, Slot::Second)),
        };
        if let Some(gate) = last_digit {
            gates.insert(k, gate);
        }
        for i in 1..k {
            gates.insert(i + k, Gate::new(GateKind::Input, n + i, Slot::Second));
        }
        for i in 1..k {
            let gate = if i == 1 {
                Gate::new(GateKind::Mul, n + k, Slot::First)
            } else {
                Gate::new(GateKind::Mul, i + n + k - 2, Slot::Second)
            };
            gates.insert(i + n, gate);
        }
        for i in 1..k {
            gates.insert(i + n + k - 1, Gate::new(GateKind::Add, i + n + k, Slot::First));
        }
        let circuit = Self {
            prime: BUILTIN_PRIME,
            degree: default_degree(n),
            n_parties: n,
            gates,
        };
        (circuit, inputs)
    }
}

/// The largest degree up to 2 that still allows reconstructing products.
fn default_degree(n_parties: usize) -> usize {
    (n_parties.saturating_sub(1) / 2).min(2)
}

fn gates(rows: &[(usize, GateKind, usize, Slot)]) -> BTreeMap<usize, Gate> {
    rows.iter()
        .map(|&(id, kind, dest, slot)| (id, Gate::new(kind, dest, slot)))
        .collect()
}

/// The value (or share) written to each operand slot, filled in gate evaluation order.
#[derive(Debug)]
pub(crate) struct ShareTable {
    slots: Vec<[Option<u64>; 2]>,
}

impl ShareTable {
    pub(crate) fn new(output_gate: usize) -> Self {
        Self {
            slots: vec![[None; 2]; output_gate + 1],
        }
    }

    pub(crate) fn set(&mut self, gate: usize, slot: Slot, value: u64) -> Result<(), Error> {
        let Some(slots) = self.slots.get_mut(gate) else {
            return Err(Error::DanglingDestination { gate, dest: gate });
        };
        if slots[slot.index()].replace(value).is_some() {
            return Err(Error::SlotFedTwice { gate, slot });
        }
        Ok(())
    }

    pub(crate) fn get(&self, gate: usize, slot: Slot) -> Result<u64, Error> {
        self.slots
            .get(gate)
            .and_then(|slots| slots[slot.index()])
            .ok_or(Error::MissingOperand { gate, slot })
    }

    pub(crate) fn operands(&self, gate: usize) -> Result<(u64, u64), Error> {
        Ok((self.get(gate, Slot::First)?, self.get(gate, Slot::Second)?))
    }

    pub(crate) fn output(&self) -> Result<u64, Error> {
        self.get(self.slots.len() - 1, Slot::First)
    }
}
