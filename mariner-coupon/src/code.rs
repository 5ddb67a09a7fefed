use std::fmt;

use crate::CouponError;

pub const MAX_CODE_LEN: usize = 64;

/// A syntactically valid coupon code: 1 to 64 ASCII letters, digits, `-` or `_`.
///
/// Case is preserved; lookups compare case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouponCode(String);

impl CouponCode {
    pub fn parse(raw: &str) -> Result<Self, CouponError> {
        let code = raw.trim();

        if code.is_empty() {
            return Err(CouponError::InvalidCode("code is empty".into()));
        }
        if code.len() > MAX_CODE_LEN {
            return Err(CouponError::InvalidCode(format!(
                "code is longer than {} characters",
                MAX_CODE_LEN
            )));
        }
        if let Some(bad) = code
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(CouponError::InvalidCode(format!(
                "code contains invalid character {:?}",
                bad
            )));
        }

        Ok(Self(code.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CouponCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_and_trims() {
        assert_eq!(CouponCode::parse("  SEA_10-off ").unwrap().as_str(), "SEA_10-off");
        assert!(CouponCode::parse(&"A".repeat(64)).is_ok());
    }

    #[test]
    fn test_rejects_malformed() {
        let too_long = "A".repeat(65);
        for raw in ["", "   ", "SEA 10", "SEA10!", "ÉTÉ", too_long.as_str()] {
            assert!(
                matches!(CouponCode::parse(raw), Err(CouponError::InvalidCode(_))),
                "{:?} should be rejected",
                raw
            );
        }
    }
}
