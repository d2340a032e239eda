//! Short human-typeable join codes.

use std::future::Future;

use rand::Rng;

/// Code alphabet: uppercase letters and digits without `0`/`O` and `1`/`I`.
pub const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
/// Number of characters in a join code.
pub const CODE_LENGTH: usize = 6;
/// Candidates checked against active sessions before giving up on the check.
pub const MAX_ATTEMPTS: usize = 5;

/// Draw a random code from [`ALPHABET`].
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..CODE_LENGTH)
        .map(|_| char::from(ALPHABET[rng.random_range(0..ALPHABET.len())]))
        .collect()
}

/// Canonical form of a user-typed code: trimmed, uppercased, separators dropped.
pub fn normalize_code(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .flat_map(char::to_uppercase)
        .collect()
}

/// Whether `code` is a well-formed canonical code.
pub fn is_valid_code(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.bytes().all(|b| ALPHABET.contains(&b))
}

/// Outcome of [`allocate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    /// Code to use for the new session.
    pub code: String,
    /// Number of candidates drawn.
    pub attempts: usize,
    /// True when every candidate collided and the last one is returned anyway.
    pub exhausted: bool,
}

/// Draw candidates until one is not held by an active session, at most [`MAX_ATTEMPTS`] times.
///
/// When every attempt collides the last candidate is returned rather than failing: the
/// store's uniqueness constraint on active codes is what actually rejects a duplicate.
pub async fn allocate<C, F, Fut, E>(mut next_candidate: C, mut is_taken: F) -> Result<Allocation, E>
where
    C: FnMut() -> String,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let mut code = next_candidate();
    for attempt in 1..=MAX_ATTEMPTS {
        if !is_taken(code.clone()).await? {
            return Ok(Allocation {
                code,
                attempts: attempt,
                exhausted: false,
            });
        }
        if attempt < MAX_ATTEMPTS {
            code = next_candidate();
        }
    }

    Ok(Allocation {
        code,
        attempts: MAX_ATTEMPTS,
        exhausted: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::Cell, collections::HashSet, convert::Infallible};

    #[test]
    fn generated_codes_use_unambiguous_alphabet() {
        let mut rng = rand::rng();
        for _ in 0..200 {
            let code = generate_code(&mut rng);
            assert!(is_valid_code(&code), "bad code {code}");
            assert!(!code.contains(['0', 'O', '1', 'I']));
        }
    }

    #[test]
    fn normalization_accepts_sloppy_input() {
        assert_eq!(normalize_code(" ab2-3cd "), "AB23CD");
        assert!(is_valid_code(&normalize_code("ab23cd")));
        assert!(!is_valid_code("AB10CD"));
        assert!(!is_valid_code("ABC"));
    }

    #[tokio::test]
    async fn allocation_skips_active_codes() {
        let active: HashSet<&str> = ["AB23CD", "XY45ZW"].into_iter().collect();
        let mut candidates = vec!["AB23CD", "XY45ZW", "QQ77RR"].into_iter();

        let allocation = allocate(
            || candidates.next().unwrap_or("ZZZZZZ").to_string(),
            |code| {
                let taken = active.contains(code.as_str());
                async move { Ok::<_, Infallible>(taken) }
            },
        )
        .await
        .unwrap();

        assert_eq!(allocation.code, "QQ77RR");
        assert_eq!(allocation.attempts, 3);
        assert!(!allocation.exhausted);
    }

    #[tokio::test]
    async fn allocation_gives_up_after_bounded_attempts() {
        let drawn = Cell::new(0);
        let allocation = allocate(
            || {
                drawn.set(drawn.get() + 1);
                format!("AAAAA{}", drawn.get() + 1)
            },
            |_| async { Ok::<_, Infallible>(true) },
        )
        .await
        .unwrap();

        assert_eq!(drawn.get(), MAX_ATTEMPTS);
        assert!(allocation.exhausted);
        assert_eq!(allocation.code, "AAAAA6");
    }
}
