/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use aes::Aes256;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::Rng;
use std::fmt;
use thiserror::Error;

use super::consts::{AES_IV_SIZE, AES_KEY_SIZE};
use super::input::load_secret;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptError {
    #[error("key should be 32 bytes long")]
    KeyTooShort,
    #[error("cipher text should be longer than 16 bytes")]
    CipherTextTooShort,
    #[error("cipher text is not valid base64")]
    InvalidEncoding,
}

/// AES-256-CTR with a random IV prepended to every cipher text.
#[derive(Clone)]
pub struct AesEncrypter {
    key: [u8; AES_KEY_SIZE],
}

impl fmt::Debug for AesEncrypter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesEncrypter").finish_non_exhaustive()
    }
}

impl AesEncrypter {
    /// Only the first 32 bytes of longer keys are used.
    pub fn new(key: &[u8]) -> Result<Self, CryptError> {
        if key.len() < AES_KEY_SIZE {
            return Err(CryptError::KeyTooShort);
        }

        let mut buf = [0u8; AES_KEY_SIZE];
        buf.copy_from_slice(&key[..AES_KEY_SIZE]);
        Ok(Self { key: buf })
    }

    pub fn from_file(path: &str) -> Result<Self, CryptError> {
        Self::new(load_secret(path).as_bytes())
    }

    pub fn encrypt(&self, plain_text: &[u8]) -> Vec<u8> {
        let mut iv = [0u8; AES_IV_SIZE];
        rand::rng().fill(&mut iv);

        let mut cipher_text = Vec::with_capacity(AES_IV_SIZE + plain_text.len());
        cipher_text.extend_from_slice(&iv);
        cipher_text.extend_from_slice(plain_text);

        let mut stream = Aes256Ctr::new(&self.key.into(), &iv.into());
        stream.apply_keystream(&mut cipher_text[AES_IV_SIZE..]);
        cipher_text
    }

    pub fn decrypt(&self, cipher_text: &[u8]) -> Result<Vec<u8>, CryptError> {
        if cipher_text.len() < AES_IV_SIZE {
            return Err(CryptError::CipherTextTooShort);
        }

        let (iv, body) = cipher_text.split_at(AES_IV_SIZE);
        let mut iv_buf = [0u8; AES_IV_SIZE];
        iv_buf.copy_from_slice(iv);

        let mut plain_text = body.to_vec();
        let mut stream = Aes256Ctr::new(&self.key.into(), &iv_buf.into());
        stream.apply_keystream(&mut plain_text);
        Ok(plain_text)
    }

    pub fn encrypt_to_base64(&self, plain_text: &[u8]) -> String {
        STANDARD.encode(self.encrypt(plain_text))
    }

    pub fn decrypt_base64(&self, data: &str) -> Result<Vec<u8>, CryptError> {
        let cipher_text = STANDARD
            .decode(data.trim())
            .map_err(|_| CryptError::InvalidEncoding)?;
        self.decrypt(&cipher_text)
    }
}
