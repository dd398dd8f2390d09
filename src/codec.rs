//! The framed symmetric-cipher channel between the local and server components:
//! AES-256-CBC with PKCS padding, wrapped in a 4-byte big-endian length prefix.

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use sha2::{Digest, Sha256};
use std::fmt;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

pub const KEY_SIZE: usize = 32;
pub const BLOCK_SIZE: usize = 16;
const LEN_PREFIX_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptoError;

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cryptographic operation failed")
    }
}

impl std::error::Error for CryptoError {}

/// A 32-byte key and 16-byte IV, bound to one Tunnel and immutable after construction.
#[derive(Clone)]
pub struct CipherContext {
    key: [u8; KEY_SIZE],
    iv: [u8; BLOCK_SIZE],
}

impl CipherContext {
    pub fn new(key: [u8; KEY_SIZE], iv: [u8; BLOCK_SIZE]) -> Self {
        CipherContext { key, iv }
    }

    /// Derives a fixed, non-trivial IV from the key via `SHA-256(key || "iv")`,
    /// rather than the all-zero IV some reference deployments use. This does not
    /// add authentication or per-message freshness; it only avoids the all-zero
    /// special case. Callers who need an explicit IV (tests, compatibility with a
    /// peer using a different derivation) should use `CipherContext::new` instead.
    pub fn from_key(key: [u8; KEY_SIZE]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(key);
        hasher.update(b"iv");
        let digest = hasher.finalize();
        let mut iv = [0u8; BLOCK_SIZE];
        iv.copy_from_slice(&digest[..BLOCK_SIZE]);
        CipherContext { key, iv }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        Aes256CbcEnc::new(&self.key.into(), &self.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Aes256CbcDec::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError)
    }
}

/// A per-socket byte buffer supporting non-destructive peek, drain, and append,
/// so that incomplete records leave the buffer untouched.
#[derive(Default)]
pub struct ConnectionBuffer {
    data: Vec<u8>,
}

impl ConnectionBuffer {
    pub fn new() -> Self {
        ConnectionBuffer { data: Vec::new() }
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn peek(&self, n: usize) -> Option<&[u8]> {
        if self.data.len() < n {
            return None;
        }
        Some(&self.data[..n])
    }

    pub fn drain(&mut self, n: usize) {
        let n = n.min(self.data.len());
        self.data.drain(..n);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

/// Encrypt/decrypt on a [`ConnectionBuffer`], framing each record with a 4-byte
/// big-endian length prefix.
pub struct FrameCodec {
    ctx: CipherContext,
}

impl FrameCodec {
    pub fn new(ctx: CipherContext) -> Self {
        FrameCodec { ctx }
    }

    /// Appends `htonl(|C|) || C` to `buf`, where `C = encrypt(plaintext)`. One
    /// frame per call; frames never coalesce.
    pub fn encrypt_to(&self, buf: &mut ConnectionBuffer, plaintext: &[u8]) -> Result<(), CryptoError> {
        let ciphertext = self.ctx.encrypt(plaintext);
        let len = u32::try_from(ciphertext.len()).map_err(|_| CryptoError)?;
        buf.append(&len.to_be_bytes());
        buf.append(&ciphertext);
        Ok(())
    }

    /// `None` = incomplete frame, buffer left untouched. `Some(P)` = one frame
    /// decrypted and drained from `buf`. `Err` = decryption failure, buffer left
    /// untouched (the caller destroys the Tunnel; no plaintext is ever produced).
    pub fn decrypt_from(&self, buf: &mut ConnectionBuffer) -> Result<Option<Vec<u8>>, CryptoError> {
        match self.peek_frame(buf)? {
            Some(plaintext) => {
                self.drop_frame(buf);
                Ok(Some(plaintext))
            }
            None => Ok(None),
        }
    }

    /// Same contract as `decrypt_from` but never drains `buf`.
    pub fn peek_frame(&self, buf: &ConnectionBuffer) -> Result<Option<Vec<u8>>, CryptoError> {
        let Some(len_bytes) = buf.peek(LEN_PREFIX_SIZE) else {
            return Ok(None);
        };
        let len = u32::from_be_bytes(len_bytes.try_into().expect("peek(4) yields 4 bytes")) as usize;
        let Some(frame) = buf.peek(LEN_PREFIX_SIZE + len) else {
            return Ok(None);
        };
        let ciphertext = &frame[LEN_PREFIX_SIZE..];
        let plaintext = self.ctx.decrypt(ciphertext)?;
        Ok(Some(plaintext))
    }

    /// Drains exactly one complete frame from `buf`; a no-op if the frame is
    /// still incomplete.
    pub fn drop_frame(&self, buf: &mut ConnectionBuffer) {
        let Some(len_bytes) = buf.peek(LEN_PREFIX_SIZE) else {
            return;
        };
        let len = u32::from_be_bytes(len_bytes.try_into().expect("peek(4) yields 4 bytes")) as usize;
        if buf.len() < LEN_PREFIX_SIZE + len {
            return;
        }
        buf.drain(LEN_PREFIX_SIZE + len);
    }
}
