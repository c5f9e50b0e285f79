/// Errors raised while decoding a command envelope from its wire fields.
///
/// A message that fails to parse can never succeed on redelivery, so
/// consumers treat these as poison and discard after logging.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ParseError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("invalid action payload: {0}")]
    InvalidAction(String),
}
