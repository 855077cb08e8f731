use crate::proto::Rejection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KrbError {
    // =========================================================================================
    // IMPORTANT: Don't add variables to variants in this enum - it's a potential security risk
    // as you can leak internal state in an error as these can end up in userfacing contexts!!!
    //
    // The exceptions are ReplyError, which only ever carries the message text that a server
    // already sent to us in the clear, and Rejected, which carries a fixed reason.
    //
    // If you want to debug the error, then use the error! macro at the error raise site to
    // report relevant information.
    // =========================================================================================
    InvalidKeyLength,
    InvalidHmacKey,
    RandomSourceFailure,
    CiphertextEmpty,
    MalformedCiphertext,
    InvalidPadding,

    MessageAuthenticationFailed,

    MessageEncode,
    MessageDecode,

    UnknownPrincipal,
    Rejected(Rejection),

    /// The server answered with an error, or its answer could not be trusted.
    ReplyError(String),
    /// A reply passed its integrity check but could not be opened with the key we hold.
    PasswordError,
    TokenMissing,
    TokenExpired,
    MutualAuthenticationFailed,

    TransportError,
    IoError,
    CredentialCacheError,
    UnsupportedCredentialCacheType,
    KeyStoreError,
    BinRWError,
    FromHexError,
    InvalidConfiguration,

    /// No really, do you have a time machine? How did you go back to before 1970?
    DoYouHaveATimeMachine,
}

impl KrbError {
    /// True for the failures that mean the key used on the client side was wrong.
    pub fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            KrbError::PasswordError | KrbError::MessageAuthenticationFailed
        ) || matches!(self, KrbError::ReplyError(msg) if msg == crate::proto::REPLY_TAMPERED)
    }
}

impl From<Rejection> for KrbError {
    fn from(value: Rejection) -> Self {
        KrbError::Rejected(value)
    }
}

impl From<hex::FromHexError> for KrbError {
    fn from(_value: hex::FromHexError) -> Self {
        KrbError::FromHexError
    }
}
