//! Arithmetic in the prime field `Z_p` that all shares live in.
//!
//! Elements are plain `u64` values in `[0, p)`. The prime is chosen at runtime as part of the
//! circuit description, so the operations are methods of [`Field`] rather than operator impls
//! on an element type. Products are computed in `u128` and reduced, which keeps every prime
//! below `2^64` exact.
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Witnesses for a deterministic Miller-Rabin test, sufficient for all `n < 2^64`.
const WITNESSES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

/// Errors raised by field operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// The divisor was congruent to zero modulo the prime.
    #[error("division by zero")]
    DivisionByZero,
    /// The modulus is not a prime number.
    #[error("{0} is not a prime")]
    NotPrime(u64),
}

/// The prime field `Z_p`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    prime: u64,
}

impl Field {
    /// Creates the field of integers modulo `prime`, failing if `prime` is not a prime.
    pub fn new(prime: u64) -> Result<Self, Error> {
        if is_prime(prime) {
            Ok(Self { prime })
        } else {
            Err(Error::NotPrime(prime))
        }
    }

    /// The modulus of the field.
    pub fn prime(&self) -> u64 {
        self.prime
    }

    /// Maps an arbitrary integer into `[0, p)`.
    pub fn reduce(&self, a: u64) -> u64 {
        a % self.prime
    }

    /// `a + b mod p`
    pub fn add(&self, a: u64, b: u64) -> u64 {
        ((a as u128 + b as u128) % self.prime as u128) as u64
    }

    /// `a - b mod p`
    pub fn sub(&self, a: u64, b: u64) -> u64 {
        let (a, b) = (self.reduce(a), self.reduce(b));
        if a >= b { a - b } else { self.prime - (b - a) }
    }

    /// `-a mod p`
    pub fn neg(&self, a: u64) -> u64 {
        self.sub(0, a)
    }

    /// `a · b mod p`
    pub fn mul(&self, a: u64, b: u64) -> u64 {
        mul_mod(a, b, self.prime)
    }

    /// `base^exp mod p` by square-and-multiply.
    pub fn pow(&self, base: u64, exp: u64) -> u64 {
        pow_mod(base, exp, self.prime)
    }

    /// The multiplicative inverse `a^(p-2) mod p` (Fermat's little theorem).
    pub fn inv(&self, a: u64) -> Result<u64, Error> {
        let a = self.reduce(a);
        if a == 0 {
            return Err(Error::DivisionByZero);
        }
        Ok(self.pow(a, self.prime - 2))
    }

    /// `a · b^-1 mod p`
    pub fn div(&self, a: u64, b: u64) -> Result<u64, Error> {
        Ok(self.mul(a, self.inv(b)?))
    }

    /// Samples an element uniformly from `[0, p)`.
    pub fn random_element<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        rng.random_range(0..self.prime)
    }
}

fn mul_mod(a: u64, b: u64, m: u64) -> u64 {
    ((a as u128 * b as u128) % m as u128) as u64
}

fn pow_mod(base: u64, mut exp: u64, m: u64) -> u64 {
    let mut acc = 1 % m;
    let mut base = base % m;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = mul_mod(acc, base, m);
        }
        base = mul_mod(base, base, m);
        exp >>= 1;
    }
    acc
}

/// Deterministic Miller-Rabin primality test.
pub(crate) fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    for p in WITNESSES {
        if n % p == 0 {
            return n == p;
        }
    }
    let mut d = n - 1;
    let mut s = 0;
    while d % 2 == 0 {
        d /= 2;
        s += 1;
    }
    'witness: for a in WITNESSES {
        let mut x = pow_mod(a, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..s {
            x = mul_mod(x, x, n);
            if x == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}
