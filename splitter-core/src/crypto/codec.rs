use std::io::{self, Read};

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use subtle::ConstantTimeEq;

use crate::error::SplitterError;

/// Reserved cipher identifier for AES-256-GCM; not emitted in the frame
/// layout, kept for wire-format versioning.
pub const AES256_GCM: u8 = 0x00;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const HEADER_SIZE: usize = 16;
pub const TAG_SIZE: usize = 16;
pub const MAX_PAYLOAD: usize = 1 << 16;
pub const MAX_FRAME: usize = HEADER_SIZE + MAX_PAYLOAD + TAG_SIZE;

/// High bit of the first nonce-prefix byte marks the terminating frame.
pub const FINAL_FLAG: u8 = 0x80;

/// Frame layout:
///
/// ```text
/// 0..4     payload length minus one, u32 LE (associated data)
/// 4..16    nonce prefix; bit 7 of byte 4 is the final flag
/// 16..     ciphertext (declared length) followed by the 16-byte tag
/// ```
///
/// The per-frame nonce is the prefix with the frame's sequence number
/// XOR-ed little-endian into bytes 8..12. The scheme caps at 2^32 frames
/// per codec instance; both directions refuse to go past that.
fn frame_nonce(prefix: &[u8; NONCE_SIZE], seq: u32) -> [u8; NONCE_SIZE] {
    let mut nonce = *prefix;
    let mut ctr = [0u8; 4];
    ctr.copy_from_slice(&nonce[8..12]);
    let mixed = u32::from_le_bytes(ctr) ^ seq;
    nonce[8..12].copy_from_slice(&mixed.to_le_bytes());
    nonce
}

fn new_cipher(key: &[u8]) -> crate::Result<Aes256Gcm> {
    if key.len() != KEY_SIZE {
        return Err(SplitterError::InvalidKeySize {
            expected: KEY_SIZE,
            actual: key.len(),
        });
    }
    Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)))
}

/// Reads until `buf` is full or the reader reports EOF; returns bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[derive(Clone, Copy)]
enum EncryptorState {
    /// No byte read from the input yet.
    Init,
    /// Holding the one-byte look-ahead that opens the next frame.
    Primed { carry: u8 },
    /// Final frame built; nothing more will be sealed.
    Finalized,
    /// Input was empty, or the final frame has been fully served.
    Eof,
}

/// Streaming encryptor: reads plaintext from `inner`, yields framed AEAD
/// records.
///
/// Every frame but the last carries exactly `MAX_PAYLOAD` bytes. Finality is
/// decided by keeping one byte of look-ahead: each frame starts with the
/// buffered carry byte and reads up to `MAX_PAYLOAD` more; a full read leaves
/// the extra byte as the next carry, a short read makes the current frame
/// final. An input that yields EOF before the first byte produces no output
/// at all.
pub struct Encryptor<R> {
    inner: R,
    cipher: Aes256Gcm,
    prefix: [u8; NONCE_SIZE],
    seq: u32,
    state: EncryptorState,
    frame: Vec<u8>,
    served: usize,
}

impl<R: Read> Encryptor<R> {
    pub fn new(key: &[u8], inner: R) -> crate::Result<Self> {
        let cipher = new_cipher(key)?;
        let generated = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut prefix = [0u8; NONCE_SIZE];
        prefix.copy_from_slice(&generated);
        Ok(Self {
            inner,
            cipher,
            prefix,
            seq: 0,
            state: EncryptorState::Init,
            frame: Vec::with_capacity(MAX_FRAME),
            served: 0,
        })
    }

    fn next_frame(&mut self) -> io::Result<()> {
        match self.state {
            EncryptorState::Init => {
                let mut first = [0u8; 1];
                let n = read_full(&mut self.inner, &mut first)?;
                if n == 0 {
                    self.state = EncryptorState::Eof;
                } else {
                    self.state = EncryptorState::Primed { carry: first[0] };
                }
                Ok(())
            }
            EncryptorState::Primed { carry } => {
                let mut payload = vec![0u8; 1 + MAX_PAYLOAD];
                payload[0] = carry;
                let n = read_full(&mut self.inner, &mut payload[1..])?;
                if n == MAX_PAYLOAD {
                    let next_carry = payload[MAX_PAYLOAD];
                    self.seal(&payload[..MAX_PAYLOAD], false)?;
                    self.state = EncryptorState::Primed { carry: next_carry };
                } else {
                    self.seal(&payload[..1 + n], true)?;
                    self.state = EncryptorState::Finalized;
                }
                Ok(())
            }
            EncryptorState::Finalized | EncryptorState::Eof => Ok(()),
        }
    }

    fn seal(&mut self, payload: &[u8], finalize: bool) -> io::Result<()> {
        let seq = self.seq;
        self.seq = self
            .seq
            .checked_add(1)
            .ok_or_else(|| SplitterError::SequenceOverflow.into_io())?;

        let mut header = [0u8; HEADER_SIZE];
        header[..4].copy_from_slice(&(payload.len() as u32 - 1).to_le_bytes());
        header[4..].copy_from_slice(&self.prefix);
        if finalize {
            header[4] |= FINAL_FLAG;
        } else {
            header[4] &= !FINAL_FLAG;
        }

        let mut prefix = [0u8; NONCE_SIZE];
        prefix.copy_from_slice(&header[4..]);
        let nonce = frame_nonce(&prefix, seq);
        let sealed = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: payload,
                    aad: &header[..4],
                },
            )
            .map_err(|_| SplitterError::Authentication.into_io())?;

        self.frame.clear();
        self.frame.extend_from_slice(&header);
        self.frame.extend_from_slice(&sealed);
        self.served = 0;
        Ok(())
    }
}

impl<R: Read> Read for Encryptor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.served < self.frame.len() {
                let n = buf.len().min(self.frame.len() - self.served);
                buf[..n].copy_from_slice(&self.frame[self.served..self.served + n]);
                self.served += n;
                return Ok(n);
            }
            match self.state {
                EncryptorState::Eof => return Ok(0),
                EncryptorState::Finalized => {
                    self.state = EncryptorState::Eof;
                    return Ok(0);
                }
                _ => self.next_frame()?,
            }
        }
    }
}

/// Streaming decryptor: reads framed AEAD records from `inner`, yields the
/// original plaintext.
///
/// The nonce prefix of the first frame is latched as the reference; every
/// subsequent frame must carry the same prefix (with the final flag set iff
/// the frame claims to be final), compared in constant time. EOF before a
/// final frame, or any byte after it, is an error.
pub struct Decryptor<R> {
    inner: R,
    cipher: Aes256Gcm,
    ref_prefix: Option<[u8; NONCE_SIZE]>,
    seq: u32,
    finalized: bool,
    done: bool,
    plain: Vec<u8>,
    served: usize,
}

impl<R: Read> Decryptor<R> {
    pub fn new(key: &[u8], inner: R) -> crate::Result<Self> {
        let cipher = new_cipher(key)?;
        Ok(Self {
            inner,
            cipher,
            ref_prefix: None,
            seq: 0,
            finalized: false,
            done: false,
            plain: Vec::new(),
            served: 0,
        })
    }

    fn next_frame(&mut self) -> io::Result<()> {
        let mut header = [0u8; HEADER_SIZE];
        let n = read_full(&mut self.inner, &mut header)?;
        if n == 0 {
            if self.finalized {
                self.done = true;
                return Ok(());
            }
            return Err(SplitterError::UnexpectedEof.into_io());
        }
        if self.finalized {
            return Err(SplitterError::UnexpectedData.into_io());
        }
        if n < HEADER_SIZE {
            return Err(SplitterError::UnexpectedEof.into_io());
        }

        let mut length = [0u8; 4];
        length.copy_from_slice(&header[..4]);
        let declared = u32::from_le_bytes(length) as usize + 1;
        let final_frame = header[4] & FINAL_FLAG == FINAL_FLAG;
        if declared > MAX_PAYLOAD {
            return Err(SplitterError::InvalidPayloadSize(format!(
                "declared payload of {declared} bytes exceeds the maximum of {MAX_PAYLOAD}"
            ))
            .into_io());
        }
        if !final_frame && declared != MAX_PAYLOAD {
            return Err(SplitterError::InvalidPayloadSize(format!(
                "non-final frame carries {declared} bytes, expected {MAX_PAYLOAD}"
            ))
            .into_io());
        }

        let mut body = vec![0u8; declared + TAG_SIZE];
        let got = read_full(&mut self.inner, &mut body)?;
        if got < body.len() {
            return Err(SplitterError::UnexpectedEof.into_io());
        }

        let mut prefix = [0u8; NONCE_SIZE];
        prefix.copy_from_slice(&header[4..]);
        let reference = *self.ref_prefix.get_or_insert(prefix);
        let mut expected = reference;
        if final_frame {
            expected[0] |= FINAL_FLAG;
        } else {
            expected[0] &= !FINAL_FLAG;
        }
        if prefix[..].ct_eq(&expected[..]).unwrap_u8() != 1 {
            return Err(SplitterError::NonceMismatch.into_io());
        }

        let seq = self.seq;
        self.seq = self
            .seq
            .checked_add(1)
            .ok_or_else(|| SplitterError::SequenceOverflow.into_io())?;
        let nonce = frame_nonce(&prefix, seq);
        let plain = self
            .cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &body,
                    aad: &header[..4],
                },
            )
            .map_err(|_| SplitterError::Authentication.into_io())?;

        if final_frame {
            self.finalized = true;
        }
        self.plain = plain;
        self.served = 0;
        Ok(())
    }
}

impl<R: Read> Read for Decryptor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.served < self.plain.len() {
                let n = buf.len().min(self.plain.len() - self.served);
                buf[..n].copy_from_slice(&self.plain[self.served..self.served + n]);
                self.served += n;
                return Ok(n);
            }
            if self.done {
                return Ok(0);
            }
            self.next_frame()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SplitterError;

    const KEY: [u8; KEY_SIZE] = [7u8; KEY_SIZE];

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn encrypt_vec(key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut enc = Encryptor::new(key, data).unwrap();
        let mut out = Vec::new();
        enc.read_to_end(&mut out).unwrap();
        out
    }

    fn decrypt_vec(key: &[u8], data: &[u8]) -> Result<Vec<u8>, SplitterError> {
        let mut dec = Decryptor::new(key, data).unwrap();
        let mut out = Vec::new();
        dec.read_to_end(&mut out)
            .map_err(SplitterError::from_io)?;
        Ok(out)
    }

    #[test]
    fn round_trips_across_frame_boundaries() {
        for len in [
            1,
            42,
            MAX_PAYLOAD - 1,
            MAX_PAYLOAD,
            MAX_PAYLOAD + 1,
            2 * MAX_PAYLOAD + 371,
        ] {
            let data = pattern(len);
            let sealed = encrypt_vec(&KEY, &data);
            let opened = decrypt_vec(&KEY, &sealed).unwrap();
            assert_eq!(opened, data, "round trip failed for {len} bytes");
        }
    }

    #[test]
    fn empty_input_emits_nothing() {
        assert!(encrypt_vec(&KEY, &[]).is_empty());
    }

    #[test]
    fn decrypting_nothing_is_unexpected_eof() {
        assert!(matches!(
            decrypt_vec(&KEY, &[]),
            Err(SplitterError::UnexpectedEof)
        ));
    }

    #[test]
    fn single_byte_yields_one_final_frame() {
        let sealed = encrypt_vec(&KEY, b"A");
        assert_eq!(sealed.len(), HEADER_SIZE + 1 + TAG_SIZE);
        assert_eq!(sealed[..4], [0u8; 4]);
        assert_eq!(sealed[4] & FINAL_FLAG, FINAL_FLAG);
    }

    #[test]
    fn exact_payload_yields_one_full_final_frame() {
        let sealed = encrypt_vec(&KEY, &pattern(MAX_PAYLOAD));
        assert_eq!(sealed.len(), MAX_FRAME);
        assert_eq!(sealed[4] & FINAL_FLAG, FINAL_FLAG);
    }

    #[test]
    fn payload_plus_one_yields_full_frame_and_carry() {
        let sealed = encrypt_vec(&KEY, &pattern(MAX_PAYLOAD + 1));
        assert_eq!(sealed.len(), MAX_FRAME + HEADER_SIZE + 1 + TAG_SIZE);
        assert_eq!(sealed[4] & FINAL_FLAG, 0);
        let tail = &sealed[MAX_FRAME..];
        assert_eq!(tail[..4], [0u8; 4]);
        assert_eq!(tail[4] & FINAL_FLAG, FINAL_FLAG);
    }

    #[test]
    fn invalid_key_size_is_rejected() {
        let short = [0u8; 16];
        assert!(matches!(
            Encryptor::new(&short, &b""[..]),
            Err(SplitterError::InvalidKeySize {
                expected: KEY_SIZE,
                actual: 16
            })
        ));
        assert!(matches!(
            Decryptor::new(&short, &b""[..]),
            Err(SplitterError::InvalidKeySize { .. })
        ));
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let sealed = encrypt_vec(&KEY, &pattern(100));
        let other = [9u8; KEY_SIZE];
        assert!(matches!(
            decrypt_vec(&other, &sealed),
            Err(SplitterError::Authentication)
        ));
    }

    #[test]
    fn flipped_ciphertext_fails_authentication() {
        let mut sealed = encrypt_vec(&KEY, &pattern(100));
        sealed[HEADER_SIZE] ^= 0x01;
        assert!(matches!(
            decrypt_vec(&KEY, &sealed),
            Err(SplitterError::Authentication)
        ));
    }

    #[test]
    fn flipped_tag_fails_authentication() {
        let mut sealed = encrypt_vec(&KEY, &pattern(100));
        let last = sealed.len() - 1;
        sealed[last] ^= 0x80;
        assert!(matches!(
            decrypt_vec(&KEY, &sealed),
            Err(SplitterError::Authentication)
        ));
    }

    #[test]
    fn flipped_first_frame_nonce_fails_authentication() {
        // The tampered prefix becomes the latched reference, so the failure
        // surfaces at the AEAD open, not the prefix compare.
        let mut sealed = encrypt_vec(&KEY, &pattern(100));
        sealed[5] ^= 0x10;
        assert!(matches!(
            decrypt_vec(&KEY, &sealed),
            Err(SplitterError::Authentication)
        ));
    }

    #[test]
    fn second_frame_prefix_drift_is_nonce_mismatch() {
        let mut sealed = encrypt_vec(&KEY, &pattern(MAX_PAYLOAD + 1));
        sealed[MAX_FRAME + 5] ^= 0x10;
        assert!(matches!(
            decrypt_vec(&KEY, &sealed),
            Err(SplitterError::NonceMismatch)
        ));
    }

    #[test]
    fn truncated_final_frame_is_unexpected_eof() {
        let sealed = encrypt_vec(&KEY, &pattern(100));
        let cut = &sealed[..sealed.len() - 5];
        assert!(matches!(
            decrypt_vec(&KEY, cut),
            Err(SplitterError::UnexpectedEof)
        ));
    }

    #[test]
    fn missing_final_frame_is_unexpected_eof() {
        let sealed = encrypt_vec(&KEY, &pattern(MAX_PAYLOAD + 1));
        let cut = &sealed[..MAX_FRAME];
        assert!(matches!(
            decrypt_vec(&KEY, cut),
            Err(SplitterError::UnexpectedEof)
        ));
    }

    #[test]
    fn bytes_after_final_frame_are_unexpected_data() {
        let mut sealed = encrypt_vec(&KEY, &pattern(100));
        sealed.push(0xFF);
        assert!(matches!(
            decrypt_vec(&KEY, &sealed),
            Err(SplitterError::UnexpectedData)
        ));
    }

    #[test]
    fn short_non_final_frame_is_invalid_payload_size() {
        // Clearing the final flag turns a 1-byte final frame into a short
        // non-final one.
        let mut sealed = encrypt_vec(&KEY, b"A");
        sealed[4] &= !FINAL_FLAG;
        assert!(matches!(
            decrypt_vec(&KEY, &sealed),
            Err(SplitterError::InvalidPayloadSize(_))
        ));
    }

    #[test]
    fn flipped_length_field_fails() {
        let mut sealed = encrypt_vec(&KEY, &pattern(100));
        sealed[0] ^= 0x01;
        assert!(decrypt_vec(&KEY, &sealed).is_err());
    }

    #[test]
    fn prefix_is_stable_across_frames() {
        let sealed = encrypt_vec(&KEY, &pattern(2 * MAX_PAYLOAD + 5));
        let first = &sealed[5..16];
        let second = &sealed[MAX_FRAME + 5..MAX_FRAME + 16];
        assert_eq!(first, second);
    }
}
