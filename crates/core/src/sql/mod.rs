//! Lexical statement analysis. Nothing here parses SQL; every check works on
//! keywords and substrings of the normalised text.

mod classifier;
mod validator;

pub use classifier::{classify, mentions_write};
pub use validator::{
    destructive_keyword, has_multiple_statements, validate, ValidationPolicy, DANGEROUS_FUNCTIONS,
};
