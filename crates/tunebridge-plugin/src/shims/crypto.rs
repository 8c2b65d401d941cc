//! Native backing for the `crypto-js` shim.
//!
//! The JavaScript side models a `WordArray` as a lowercase hex string; every
//! operation here takes and returns hex.

use base64::Engine;
use cbc::cipher::block_padding::{NoPadding, Pkcs7};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};
use hmac::{Hmac, Mac};
use sha2::Digest;

use crate::error::PluginError;

const AES_BLOCK: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    pub fn parse(name: &str) -> Result<Self, PluginError> {
        match name.to_ascii_uppercase().as_str() {
            "MD5" => Ok(Self::Md5),
            "SHA1" => Ok(Self::Sha1),
            "SHA256" => Ok(Self::Sha256),
            "SHA512" => Ok(Self::Sha512),
            other => Err(PluginError::Unsupported(format!("hash algorithm {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMode {
    Cbc,
    Ecb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    Pkcs7,
    None,
}

impl CipherMode {
    pub fn parse(name: &str) -> Result<Self, PluginError> {
        match name.to_ascii_uppercase().as_str() {
            "" | "CBC" => Ok(Self::Cbc),
            "ECB" => Ok(Self::Ecb),
            other => Err(PluginError::Unsupported(format!("cipher mode {other}"))),
        }
    }
}

impl Padding {
    pub fn parse(name: &str) -> Result<Self, PluginError> {
        match name.to_ascii_lowercase().as_str() {
            "" | "pkcs7" => Ok(Self::Pkcs7),
            "nopadding" | "none" => Ok(Self::None),
            other => Err(PluginError::Unsupported(format!("padding {other}"))),
        }
    }
}

fn from_hex(hex_text: &str) -> Result<Vec<u8>, PluginError> {
    hex::decode(hex_text).map_err(|e| PluginError::Execution(format!("invalid hex: {e}")))
}

// ─── Digests ──────────────────────────────────────────────────────────

pub fn digest(alg: HashAlgorithm, data_hex: &str) -> Result<String, PluginError> {
    let data = from_hex(data_hex)?;
    let out = match alg {
        HashAlgorithm::Md5 => md5::Md5::digest(&data).to_vec(),
        HashAlgorithm::Sha1 => sha1::Sha1::digest(&data).to_vec(),
        HashAlgorithm::Sha256 => sha2::Sha256::digest(&data).to_vec(),
        HashAlgorithm::Sha512 => sha2::Sha512::digest(&data).to_vec(),
    };
    Ok(hex::encode(out))
}

fn mac<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, PluginError> {
    let mut m = <M as KeyInit>::new_from_slice(key)
        .map_err(|e| PluginError::Execution(format!("HMAC init failed: {e}")))?;
    m.update(data);
    Ok(m.finalize().into_bytes().to_vec())
}

pub fn hmac(alg: HashAlgorithm, key_hex: &str, data_hex: &str) -> Result<String, PluginError> {
    let key = from_hex(key_hex)?;
    let data = from_hex(data_hex)?;
    let out = match alg {
        HashAlgorithm::Md5 => mac::<Hmac<md5::Md5>>(&key, &data)?,
        HashAlgorithm::Sha1 => mac::<Hmac<sha1::Sha1>>(&key, &data)?,
        HashAlgorithm::Sha256 => mac::<Hmac<sha2::Sha256>>(&key, &data)?,
        HashAlgorithm::Sha512 => mac::<Hmac<sha2::Sha512>>(&key, &data)?,
    };
    Ok(hex::encode(out))
}

// ─── AES ──────────────────────────────────────────────────────────────

/// Expands `$body` with `$cipher` bound to the AES variant for `$key`.
macro_rules! with_aes {
    ($key:expr, $cipher:ident => $body:expr) => {
        match $key.len() {
            16 => {
                type $cipher = aes::Aes128;
                $body
            }
            24 => {
                type $cipher = aes::Aes192;
                $body
            }
            32 => {
                type $cipher = aes::Aes256;
                $body
            }
            n => Err(PluginError::Execution(format!(
                "invalid AES key length {n} (expected 16, 24 or 32 bytes)"
            ))),
        }
    };
}

#[derive(Debug, Clone)]
pub struct AesParams<'a> {
    pub mode: CipherMode,
    pub padding: Padding,
    pub key_hex: &'a str,
    /// Ignored in ECB mode; zero IV when absent in CBC mode.
    pub iv_hex: Option<&'a str>,
}

fn iv_bytes(params: &AesParams<'_>) -> Result<Vec<u8>, PluginError> {
    match params.iv_hex {
        Some(iv) if !iv.is_empty() => {
            let mut bytes = from_hex(iv)?;
            bytes.resize(AES_BLOCK, 0);
            Ok(bytes)
        }
        _ => Ok(vec![0; AES_BLOCK]),
    }
}

fn bad_length(e: impl std::fmt::Display) -> PluginError {
    PluginError::Execution(format!("AES init failed: {e}"))
}

/// OpenSSL `EVP_BytesToKey` with MD5 and one iteration, as crypto-js uses
/// for passphrase keys. Returns `(key_hex, iv_hex)`.
pub fn evp_bytes_to_key(
    password_hex: &str,
    salt_hex: Option<&str>,
    key_len: usize,
    iv_len: usize,
) -> Result<(String, String), PluginError> {
    let password = from_hex(password_hex)?;
    let salt = salt_hex.map(from_hex).transpose()?;
    let mut derived = Vec::with_capacity(key_len + iv_len + 16);
    let mut block = Vec::new();
    while derived.len() < key_len + iv_len {
        let mut hasher = md5::Md5::new();
        hasher.update(&block);
        hasher.update(&password);
        if let Some(salt) = &salt {
            hasher.update(salt);
        }
        block = hasher.finalize().to_vec();
        derived.extend_from_slice(&block);
    }
    let iv = hex::encode(&derived[key_len..key_len + iv_len]);
    derived.truncate(key_len);
    Ok((hex::encode(derived), iv))
}

pub fn aes_encrypt(params: &AesParams<'_>, data_hex: &str) -> Result<String, PluginError> {
    let key = from_hex(params.key_hex)?;
    let data = from_hex(data_hex)?;
    if params.padding == Padding::None && data.len() % AES_BLOCK != 0 {
        return Err(PluginError::Execution(
            "NoPadding requires input aligned to the AES block size".into(),
        ));
    }
    let iv = iv_bytes(params)?;

    let out: Result<Vec<u8>, PluginError> = with_aes!(key, C => {
        match params.mode {
            CipherMode::Cbc => {
                let enc = cbc::Encryptor::<C>::new_from_slices(&key, &iv).map_err(bad_length)?;
                Ok(match params.padding {
                    Padding::Pkcs7 => enc.encrypt_padded_vec_mut::<Pkcs7>(&data),
                    Padding::None => enc.encrypt_padded_vec_mut::<NoPadding>(&data),
                })
            }
            CipherMode::Ecb => {
                let enc = ecb::Encryptor::<C>::new_from_slice(&key).map_err(bad_length)?;
                Ok(match params.padding {
                    Padding::Pkcs7 => enc.encrypt_padded_vec_mut::<Pkcs7>(&data),
                    Padding::None => enc.encrypt_padded_vec_mut::<NoPadding>(&data),
                })
            }
        }
    });
    out.map(hex::encode)
}

pub fn aes_decrypt(params: &AesParams<'_>, data_hex: &str) -> Result<String, PluginError> {
    let key = from_hex(params.key_hex)?;
    let data = from_hex(data_hex)?;
    if data.len() % AES_BLOCK != 0 {
        return Err(PluginError::Execution(
            "ciphertext is not a multiple of the AES block size".into(),
        ));
    }
    let iv = iv_bytes(params)?;
    let unpad = |e: cbc::cipher::block_padding::UnpadError| {
        PluginError::Execution(format!("AES decrypt failed: {e}"))
    };

    let out: Result<Vec<u8>, PluginError> = with_aes!(key, C => {
        match params.mode {
            CipherMode::Cbc => {
                let dec = cbc::Decryptor::<C>::new_from_slices(&key, &iv).map_err(bad_length)?;
                match params.padding {
                    Padding::Pkcs7 => dec.decrypt_padded_vec_mut::<Pkcs7>(&data).map_err(unpad),
                    Padding::None => dec.decrypt_padded_vec_mut::<NoPadding>(&data).map_err(unpad),
                }
            }
            CipherMode::Ecb => {
                let dec = ecb::Decryptor::<C>::new_from_slice(&key).map_err(bad_length)?;
                match params.padding {
                    Padding::Pkcs7 => dec.decrypt_padded_vec_mut::<Pkcs7>(&data).map_err(unpad),
                    Padding::None => dec.decrypt_padded_vec_mut::<NoPadding>(&data).map_err(unpad),
                }
            }
        }
    });
    out.map(hex::encode)
}

// ─── Encoders ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Hex,
    Base64,
    Utf8,
    Latin1,
}

impl Encoding {
    pub fn parse(name: &str) -> Result<Self, PluginError> {
        match name.to_ascii_lowercase().as_str() {
            "hex" => Ok(Self::Hex),
            "base64" => Ok(Self::Base64),
            "utf8" | "utf-8" => Ok(Self::Utf8),
            "latin1" | "binary" => Ok(Self::Latin1),
            other => Err(PluginError::Unsupported(format!("encoding {other}"))),
        }
    }
}

/// Text in `enc` to hex bytes.
pub fn encode_to_hex(enc: Encoding, text: &str) -> Result<String, PluginError> {
    let bytes = match enc {
        Encoding::Hex => from_hex(text)?,
        Encoding::Base64 => decode_base64(text)?,
        Encoding::Utf8 => text.as_bytes().to_vec(),
        Encoding::Latin1 => latin1_bytes(text),
    };
    Ok(hex::encode(bytes))
}

/// Hex bytes to text in `enc`.
pub fn decode_from_hex(enc: Encoding, hex_text: &str) -> Result<String, PluginError> {
    let bytes = from_hex(hex_text)?;
    Ok(match enc {
        Encoding::Hex => hex::encode(bytes),
        Encoding::Base64 => base64::engine::general_purpose::STANDARD.encode(bytes),
        Encoding::Utf8 => String::from_utf8(bytes)
            .map_err(|_| PluginError::Execution("Malformed UTF-8 data".into()))?,
        Encoding::Latin1 => latin1_string(&bytes),
    })
}

/// Standard or URL-safe base64, with or without padding and whitespace.
pub fn decode_base64(text: &str) -> Result<Vec<u8>, PluginError> {
    let compact: String = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            c => c,
        })
        .collect();
    let trimmed = compact.trim_end_matches('=');
    base64::engine::general_purpose::STANDARD_NO_PAD
        .decode(trimmed.as_bytes())
        .map_err(|e| PluginError::Execution(format!("invalid base64: {e}")))
}

/// Each char's code point as one byte (chars above U+00FF keep the low byte).
pub fn latin1_bytes(text: &str) -> Vec<u8> {
    text.chars().map(|c| (c as u32 & 0xff) as u8).collect()
}

pub fn latin1_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| char::from(*b)).collect()
}

/// `atob`: base64 to a binary (latin1) string.
pub fn atob(text: &str) -> Result<String, PluginError> {
    decode_base64(text).map(|b| latin1_string(&b))
}

/// `btoa`: binary string to base64. Rejects chars outside latin1 like browsers do.
pub fn btoa(text: &str) -> Result<String, PluginError> {
    if text.chars().any(|c| c as u32 > 0xff) {
        return Err(PluginError::Execution(
            "btoa: string contains characters outside of the Latin1 range".into(),
        ));
    }
    Ok(base64::engine::general_purpose::STANDARD.encode(latin1_bytes(text)))
}
