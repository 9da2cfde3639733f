//! Token generation.

use rand::rngs::OsRng;
use tally_crypto::blinded::Token;

/// Source of fresh tokens for a refill.
pub trait TokenGenerator: Send + Sync {
    fn generate(&self, count: usize) -> Vec<Token>;
}

/// Tokens from the operating system RNG.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomTokenGenerator;

impl TokenGenerator for RandomTokenGenerator {
    fn generate(&self, count: usize) -> Vec<Token> {
        (0..count).map(|_| Token::random(&mut OsRng)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_tokens_are_distinct() {
        let tokens = RandomTokenGenerator.generate(8);
        assert_eq!(tokens.len(), 8);
        let encoded: std::collections::HashSet<String> =
            tokens.iter().map(Token::encode_base64).collect();
        assert_eq!(encoded.len(), 8);
    }

    #[test]
    fn test_zero_tokens() {
        assert!(RandomTokenGenerator.generate(0).is_empty());
    }
}
