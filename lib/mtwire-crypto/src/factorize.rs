// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn abs_diff(a: u128, b: u128) -> u128 {
    a.max(b) - a.min(b)
}

fn random_below(n: u128) -> u128 {
    let mut bytes = [0; 8];
    getrandom::fill(&mut bytes).expect("failed to generate random factorization seed");
    1 + (u64::from_le_bytes(bytes) as u128) % (n - 1)
}

/// One run of Brent's cycle detection over `y ↦ y² + c (mod n)`.
///
/// Returns a non-trivial factor, or `None` when the chosen parameters only
/// found `n` itself and a new sequence has to be tried.
#[allow(clippy::many_single_char_names)]
fn brent(n: u128, mut y: u128, c: u128, m: u128) -> Option<u128> {
    let step = |v: u128| (v * v % n + c) % n;

    let (mut g, mut r, mut q) = (1, 1, 1);
    let (mut x, mut ys) = (0, 0);

    while g == 1 {
        x = y;
        for _ in 0..r {
            y = step(y);
        }

        let mut k = 0;
        while k < r && g == 1 {
            ys = y;
            for _ in 0..m.min(r - k) {
                y = step(y);
                q = q * abs_diff(x, y) % n;
            }
            g = gcd(q, n);
            k += m;
        }
        r *= 2;
    }

    if g == n {
        // The batch overshot; walk back one step at a time.
        loop {
            ys = step(ys);
            g = gcd(abs_diff(x, ys), n);
            if g > 1 {
                break;
            }
        }
    }

    (g != n).then_some(g)
}

/// Deterministic Miller-Rabin; these bases cover every `u64`.
fn is_prime(n: u64) -> bool {
    const BASES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

    if n < 2 {
        return false;
    }
    for p in BASES {
        if n % p == 0 {
            return n == p;
        }
    }

    let n = n as u128;
    let (mut d, mut s) = (n - 1, 0);
    while d % 2 == 0 {
        d /= 2;
        s += 1;
    }

    let pow_mod = |mut base: u128, mut exp: u128| {
        let mut result = 1;
        base %= n;
        while exp > 0 {
            if exp & 1 == 1 {
                result = result * base % n;
            }
            base = base * base % n;
            exp >>= 1;
        }
        result
    };

    'witness: for a in BASES {
        let mut x = pow_mod(a as u128, d);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..s {
            x = x * x % n;
            if x == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Fresh sequences tried before giving up on a number.
const MAX_ATTEMPTS: usize = 64;

/// Splits `pq` into two factors, smallest first.
///
/// Uses [Brent's improvement] of Pollard's rho with a random quadratic
/// sequence, retrying with fresh parameters until a factor is found.
/// Returns `None` for numbers with no non-trivial factors (below 4, or
/// prime), which a well-behaved server never sends.
///
/// [Brent's improvement]: https://maths-people.anu.edu.au/~brent/pd/rpb051i.pdf
pub fn factorize(pq: u64) -> Option<(u64, u64)> {
    if pq < 4 || is_prime(pq) {
        return None;
    }
    if pq % 2 == 0 {
        return Some((2, pq / 2));
    }

    let n = pq as u128;
    let p = (0..MAX_ATTEMPTS).find_map(|_| {
        brent(n, random_below(n), random_below(n), random_below(n)).map(|factor| factor as u64)
    })?;

    let q = pq / p;
    Some((p.min(q), p.max(q)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factorization_1() {
        assert_eq!(factorize(1470626929934143021), Some((1206429347, 1218991343)));
    }

    #[test]
    fn factorization_2() {
        assert_eq!(factorize(2363612107535801713), Some((1518968219, 1556064227)));
    }

    #[test]
    fn factorization_even() {
        assert_eq!(factorize(2 * 1000000007), Some((2, 1000000007)));
    }

    #[test]
    fn factorization_is_repeatable() {
        for _ in 0..10 {
            assert_eq!(factorize(17 * 19), Some((17, 19)));
        }
    }

    #[test]
    fn factorization_of_square() {
        assert_eq!(factorize(1000000007 * 1000000007), Some((1000000007, 1000000007)));
    }

    #[test]
    fn nothing_to_factorize() {
        for pq in [0, 1, 2, 3, 1000000007, 18446744073709551557] {
            assert_eq!(factorize(pq), None, "{pq}");
        }
    }

    #[test]
    fn primality() {
        assert!(is_prime(2));
        assert!(is_prime(1218991343));
        assert!(!is_prime(1));
        assert!(!is_prime(561));
        assert!(!is_prime(1470626929934143021));
    }
}
