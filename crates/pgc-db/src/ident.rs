//! Identifier and literal quoting for interpolated DDL.
//!
//! `CREATE DATABASE` / `CREATE ROLE` / `GRANT` / `DROP` cannot take bound
//! parameters, so claim-supplied names are interpolated. Every name passes
//! through [`quote_ident`] and the role password through [`quote_literal`]
//! before reaching a statement string. Existence probes use bound parameters
//! and never need either.

use crate::GatewayError;

/// Quote a SQL identifier: wrap in double quotes, double any embedded
/// double quote. Empty identifiers and identifiers containing NUL are
/// rejected — neither is a valid Postgres identifier.
pub fn quote_ident(raw: &str) -> Result<String, GatewayError> {
    if raw.is_empty() {
        return Err(GatewayError::InvalidIdentifier(
            "empty identifier".to_string(),
        ));
    }
    if raw.contains('\0') {
        return Err(GatewayError::InvalidIdentifier(format!(
            "identifier contains NUL: {raw:?}"
        )));
    }
    Ok(format!("\"{}\"", raw.replace('"', "\"\"")))
}

/// Quote a string literal: wrap in single quotes, double any embedded
/// single quote. NUL is rejected.
pub fn quote_literal(raw: &str) -> Result<String, GatewayError> {
    if raw.contains('\0') {
        return Err(GatewayError::InvalidIdentifier(
            "literal contains NUL".to_string(),
        ));
    }
    Ok(format!("'{}'", raw.replace('\'', "''")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_identifier_is_wrapped() {
        assert_eq!(quote_ident("appdb").unwrap(), "\"appdb\"");
    }

    #[test]
    fn embedded_double_quote_is_doubled() {
        assert_eq!(
            quote_ident("app\"; DROP TABLE x; --").unwrap(),
            "\"app\"\"; DROP TABLE x; --\""
        );
    }

    #[test]
    fn empty_identifier_rejected() {
        assert!(matches!(
            quote_ident(""),
            Err(GatewayError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn nul_in_identifier_rejected() {
        assert!(matches!(
            quote_ident("a\0b"),
            Err(GatewayError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn literal_doubles_single_quotes() {
        assert_eq!(quote_literal("o'brien").unwrap(), "'o''brien'");
    }

    #[test]
    fn literal_rejects_nul() {
        assert!(quote_literal("p\0w").is_err());
    }
}
