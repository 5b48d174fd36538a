//! Shamir secret sharing and Lagrange reconstruction over a prime [`Field`].
//!
//! A secret `s` is hidden as the constant term of a random polynomial
//! `f(x) = s + r_1·x + ... + r_d·x^d`. Party `i` (counting from 1) holds `f(i)`. Any `d + 1`
//! shares determine `s` via Lagrange interpolation at `x = 0`, any `d` shares are uniformly
//! distributed and independent of `s`.
//!
//! The interpolation coefficients only depend on the set of share indices, so [`Shamir`]
//! keeps them in a cache owned by the engine instance, keyed by the exact index subset that
//! was used and the threshold.
use std::collections::{BTreeMap, HashMap, hash_map::Entry};

use rand::Rng;
use thiserror::Error;
use tracing::trace;

use crate::field::{self, Field};

/// Errors raised while sharing or reconstructing secrets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Fewer shares than the threshold were available.
    #[error("expected at least {needed} shares, got {actual}")]
    InsufficientShares {
        /// The reconstruction threshold.
        needed: usize,
        /// The number of shares that were supplied.
        actual: usize,
    },
    /// A reconstruction threshold of zero was requested.
    #[error("the reconstruction threshold must be at least 1")]
    ZeroThreshold,
    /// The share index is `0` or not smaller than the prime, so it is no valid evaluation point.
    #[error("share index {0} is not a valid evaluation point")]
    InvalidIndex(usize),
    /// The field arithmetic failed.
    #[error(transparent)]
    Field(#[from] field::Error),
}

/// Lagrange coefficients for interpolating `f(0)` from the shares of a fixed index set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecombinationVector {
    coefficients: BTreeMap<usize, u64>,
}

impl RecombinationVector {
    /// Computes `coeff[i] = Π_{j≠i} j / (j - i)` over the given (distinct, non-zero) indices.
    fn compute(field: Field, indices: &[usize]) -> Result<Self, Error> {
        let mut coefficients = BTreeMap::new();
        for &i in indices {
            let mut num = 1;
            let mut den = 1;
            for &j in indices.iter().filter(|&&j| j != i) {
                num = field.mul(num, j as u64);
                den = field.mul(den, field.sub(j as u64, i as u64));
            }
            coefficients.insert(i, field.div(num, den)?);
        }
        Ok(Self { coefficients })
    }

    /// The coefficient for the share with the given index.
    pub fn get(&self, index: usize) -> Option<u64> {
        self.coefficients.get(&index).copied()
    }

    /// The indices this vector interpolates from, in ascending order.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.coefficients.keys().copied()
    }

    /// The number of shares this vector combines.
    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    /// Returns true if the vector has no coefficients.
    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }

    /// Returns `Σ shares[i] · coeff[i] mod p`, every index of the vector must be present.
    pub fn combine(&self, field: Field, shares: &BTreeMap<usize, u64>) -> Result<u64, Error> {
        let mut acc = 0;
        for (i, coeff) in &self.coefficients {
            let share = shares.get(i).ok_or(Error::InsufficientShares {
                needed: self.len(),
                actual: shares.len(),
            })?;
            acc = field.add(acc, field.mul(*share, *coeff));
        }
        Ok(acc)
    }
}

/// Evaluates the polynomial with the given coefficients (ascending powers) at `x`.
pub(crate) fn eval_poly(field: Field, coefficients: &[u64], x: u64) -> u64 {
    coefficients
        .iter()
        .rev()
        .fold(0, |acc, c| field.add(field.mul(acc, x), *c))
}

/// Shares `secret` with a fresh random polynomial of the given degree among `n_parties`.
///
/// Returns the share of every party, keyed by the party index `1..=n_parties`.
pub fn share<R: Rng + ?Sized>(
    field: Field,
    secret: u64,
    degree: usize,
    n_parties: usize,
    rng: &mut R,
) -> BTreeMap<usize, u64> {
    let mut coefficients = Vec::with_capacity(degree + 1);
    coefficients.push(field.reduce(secret));
    coefficients.extend((0..degree).map(|_| field.random_element(rng)));
    (1..=n_parties)
        .map(|p| (p, eval_poly(field, &coefficients, p as u64)))
        .collect()
}

/// The secret sharing engine of a single party.
#[derive(Debug, Clone)]
pub struct Shamir {
    field: Field,
    n_parties: usize,
    cache: HashMap<(Vec<usize>, usize), RecombinationVector>,
}

impl Shamir {
    /// Creates an engine for sharing among `n_parties` parties with indices `1..=n_parties`.
    pub fn new(field: Field, n_parties: usize) -> Self {
        Self {
            field,
            n_parties,
            cache: HashMap::new(),
        }
    }

    /// The field the shares live in.
    pub fn field(&self) -> Field {
        self.field
    }

    /// The number of parties that receive a share.
    pub fn n_parties(&self) -> usize {
        self.n_parties
    }

    /// Shares `secret` with a fresh polynomial of the given degree among all parties.
    pub fn share<R: Rng + ?Sized>(
        &self,
        secret: u64,
        degree: usize,
        rng: &mut R,
    ) -> BTreeMap<usize, u64> {
        share(self.field, secret, degree, self.n_parties, rng)
    }

    /// Reconstructs the secret from at least `threshold` shares.
    ///
    /// The `threshold` smallest indices present in `shares` are used. When all parties supply
    /// a share, this is always the canonical set `1..=threshold`.
    pub fn reconstruct(
        &mut self,
        shares: &BTreeMap<usize, u64>,
        threshold: usize,
    ) -> Result<u64, Error> {
        let indices: Vec<usize> = shares.keys().copied().collect();
        let field = self.field;
        self.recombination_vector(&indices, threshold)?
            .combine(field, shares)
    }

    /// Returns the (cached) recombination vector for the first `threshold` of `indices`.
    pub fn recombination_vector(
        &mut self,
        indices: &[usize],
        threshold: usize,
    ) -> Result<&RecombinationVector, Error> {
        if threshold == 0 {
            return Err(Error::ZeroThreshold);
        }
        let mut subset = indices.to_vec();
        subset.sort_unstable();
        subset.dedup();
        if let Some(&i) = subset
            .iter()
            .find(|&&i| i == 0 || i as u64 >= self.field.prime())
        {
            return Err(Error::InvalidIndex(i));
        }
        if subset.len() < threshold {
            return Err(Error::InsufficientShares {
                needed: threshold,
                actual: subset.len(),
            });
        }
        subset.truncate(threshold);
        match self.cache.entry((subset, threshold)) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                let (subset, _) = e.key();
                trace!(?subset, "computing recombination vector");
                let vector = RecombinationVector::compute(self.field, subset)?;
                Ok(e.insert(vector))
            }
        }
    }

    /// The number of distinct recombination vectors computed so far.
    pub fn cached_vectors(&self) -> usize {
        self.cache.len()
    }
}
