//! Symmetric cipher facade for payload encryption.
//!
//! The net service moves opaque payloads; deployments that encrypt them do
//! so through this interface. The expected shape is an AEAD cipher in the
//! AES/GCM style: a symmetric key, an initialization vector, additional
//! authenticated data and an authentication tag length.

/// Cipher parameters. The key is referenced by hex string so configuration
/// never carries raw bytes.
#[derive(Debug, Clone)]
pub struct CipherSpec {
    pub key_hex: String,
    pub iv: Vec<u8>,
    pub aad: Vec<u8>,
    pub tag_bit_length: usize,
}

/// A symmetric payload cipher.
pub trait PayloadCipher: Send + Sync {
    /// Encrypt a payload, producing ciphertext plus authentication tag.
    fn encrypt(&self, message: &[u8]) -> Result<Vec<u8>, CipherError>;

    /// Decrypt and authenticate a payload.
    fn decrypt(&self, message: &[u8]) -> Result<Vec<u8>, CipherError>;

    /// Rotate the symmetric key.
    fn set_key(&mut self, key: &[u8]) -> Result<(), CipherError>;
}

/// Cipher failures: bad parameters or unauthentic payloads.
#[derive(Debug, Clone)]
pub enum CipherError {
    InvalidKey { message: String },
    InvalidParameters { message: String },
    AuthenticationFailed,
}

impl std::fmt::Display for CipherError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CipherError::InvalidKey { message } => write!(f, "Invalid cipher key: {}", message),
            CipherError::InvalidParameters { message } => {
                write!(f, "Invalid cipher parameters: {}", message)
            }
            CipherError::AuthenticationFailed => write!(f, "Payload authentication failed"),
        }
    }
}

impl std::error::Error for CipherError {}
