// Copyright 2024 The Buttercup Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The stream codec (§4.1): `encode`/`decode` a byte stream with a
//! passphrase, wrapping `zstd` compression inside `age` scrypt-passphrase
//! authenticated encryption. Pairs with the original's `modifiers` package
//! (`compressAndEncrypt.go` / `decryptAndDecompress.go`) and preserves its
//! on-disk format: a single age-encrypted frame whose plaintext is a zstd
//! stream.
//!
//! This is a pure, synchronous transform -- `age` and `zstd` both operate on
//! blocking `Read`/`Write`. Callers on the async side (the encrypted
//! providers and index backends) run it via `spawn_blocking`.

use std::io::{Read, Write};
use std::path::Path;

use age::secrecy::Secret;
use buttercup_error::{make_err, Code, Error, ResultExt};

/// Encrypts and compresses `input`, writing the self-delimiting ciphertext
/// frame to `output`. One call processes exactly one blob, end to end.
pub fn encode<R: Read, W: Write>(mut input: R, output: W, passphrase: &str) -> Result<(), Error> {
    let recipient = age::scrypt::Recipient::new(Secret::new(passphrase.to_string()));
    let encryptor = age::Encryptor::with_recipients(vec![Box::new(recipient)])
        .ok_or_else(|| make_err!(Code::CodecError, "could not build age encryptor"))?;

    let age_writer = encryptor
        .wrap_output(output)
        .map_err(|e| make_err!(Code::CodecError, "could not open age output stream: {e}"))?;

    let mut zstd_writer = zstd::Encoder::new(age_writer, 0)
        .map_err(|e| make_err!(Code::CodecError, "could not open zstd encoder: {e}"))?;

    std::io::copy(&mut input, &mut zstd_writer)
        .map_err(|e| make_err!(Code::CodecError, "failed compressing stream: {e}"))?;

    let age_writer = zstd_writer
        .finish()
        .map_err(|e| make_err!(Code::CodecError, "failed finishing zstd stream: {e}"))?;

    age_writer
        .finish()
        .map_err(|e| make_err!(Code::CodecError, "failed finishing age stream: {e}"))?;

    Ok(())
}

/// Inverse of [`encode`]: decrypts then decompresses `input`, writing
/// plaintext to `output`. Fails with [`Code::CodecError`] on a wrong
/// passphrase, truncated input, or corrupt frame.
pub fn decode<R: Read, W: Write>(input: R, mut output: W, passphrase: &str) -> Result<(), Error> {
    let decryptor = match age::Decryptor::new(input)
        .map_err(|e| make_err!(Code::CodecError, "corrupt or truncated ciphertext frame: {e}"))?
    {
        age::Decryptor::Passphrase(d) => d,
        age::Decryptor::Recipients(_) => {
            return Err(make_err!(
                Code::CodecError,
                "ciphertext was not passphrase-encrypted"
            ))
        }
    };

    let age_reader = decryptor
        .decrypt(&Secret::new(passphrase.to_string()), None)
        .map_err(|e| make_err!(Code::CodecError, "wrong passphrase or corrupt ciphertext: {e}"))?;

    let mut zstd_reader = zstd::Decoder::new(age_reader)
        .map_err(|e| make_err!(Code::CodecError, "corrupt compressed frame: {e}"))?;

    std::io::copy(&mut zstd_reader, &mut output)
        .map_err(|e| make_err!(Code::CodecError, "failed decompressing stream: {e}"))?;

    Ok(())
}

/// File-path convenience wrapper around [`encode`], mirroring
/// `CompressAndEncryptFile`. Used when re-encrypting a staged index before
/// publishing it (§4.2).
pub fn encode_file(input_path: &Path, output_path: &Path, passphrase: &str) -> Result<(), Error> {
    let input = std::fs::File::open(input_path)
        .map_err(Error::from)
        .err_tip(|| format!("cannot open {} for encoding", input_path.display()))?;
    let output = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(output_path)
        .map_err(Error::from)
        .err_tip(|| format!("cannot open {} for writing", output_path.display()))?;
    encode(input, output, passphrase)
}

/// File-path convenience wrapper around [`decode`], mirroring
/// `DecryptAndDecompressFile`.
pub fn decode_file(input_path: &Path, output_path: &Path, passphrase: &str) -> Result<(), Error> {
    let input = std::fs::File::open(input_path)
        .map_err(Error::from)
        .err_tip(|| format!("cannot open {} for decoding", input_path.display()))?;
    let output = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(output_path)
        .map_err(Error::from)
        .err_tip(|| format!("cannot open {} for writing", output_path.display()))?;
    decode(input, output, passphrase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq; // Must be declared in every module.
    use std::io::Cursor;

    #[test]
    fn round_trips_arbitrary_bytes() {
        let plaintext = b"the quick brown fox jumps over the lazy dog".repeat(100);
        let mut ciphertext = Vec::new();
        encode(Cursor::new(&plaintext), &mut ciphertext, "correct horse battery staple").unwrap();

        let mut decoded = Vec::new();
        decode(Cursor::new(&ciphertext), &mut decoded, "correct horse battery staple").unwrap();
        assert_eq!(decoded, plaintext);
    }

    #[test]
    fn round_trips_empty_input() {
        let mut ciphertext = Vec::new();
        encode(Cursor::new(b""), &mut ciphertext, "pw").unwrap();
        let mut decoded = Vec::new();
        decode(Cursor::new(&ciphertext), &mut decoded, "pw").unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn wrong_passphrase_fails_with_codec_error() {
        let mut ciphertext = Vec::new();
        encode(Cursor::new(b"secret"), &mut ciphertext, "right").unwrap();
        let mut decoded = Vec::new();
        let err = decode(Cursor::new(&ciphertext), &mut decoded, "wrong").unwrap_err();
        assert_eq!(err.code, Code::CodecError);
    }

    #[test]
    fn truncated_ciphertext_fails_with_codec_error() {
        let mut ciphertext = Vec::new();
        encode(Cursor::new(b"some data here"), &mut ciphertext, "pw").unwrap();
        ciphertext.truncate(ciphertext.len() / 2);
        let mut decoded = Vec::new();
        let err = decode(Cursor::new(&ciphertext), &mut decoded, "pw").unwrap_err();
        assert_eq!(err.code, Code::CodecError);
    }

    #[test]
    fn file_helpers_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("plain.bin");
        let encoded_path = dir.path().join("enc.bin");
        let decoded_path = dir.path().join("decoded.bin");

        std::fs::write(&input_path, b"file contents").unwrap();
        encode_file(&input_path, &encoded_path, "pw").unwrap();
        decode_file(&encoded_path, &decoded_path, "pw").unwrap();

        let decoded = std::fs::read(&decoded_path).unwrap();
        assert_eq!(decoded, b"file contents");
    }
}
