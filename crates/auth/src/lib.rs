//! Actor authentication: token claims and validation.
//!
//! A sync actor is identified by a UUID v4 that doubles as its store
//! identifier. Tokens are bearer JWTs; deterministic claims validation is
//! kept separate from signature verification so both can be tested in
//! isolation.

pub mod claims;

pub use claims::{
    validate_claims, ActorClaims, Hs256TokenValidator, TokenValidationError, TokenValidator,
};
