/*
* Copyright (C) 2019-2023 EverX. All Rights Reserved.
*
* Licensed under the SOFTWARE EVALUATION License (the "License"); you may not use
* this file except in compliance with the License.
*
* Unless required by applicable law or agreed to in writing, software
* distributed under the License is distributed on an "AS IS" BASIS,
* WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
* See the License for the specific TON DEV software governing permissions and
* limitations under the License.
*/

use crate::{error, fail, Result};
use sha2::Digest;

pub fn sha256_digest(data: impl AsRef<[u8]>) -> [u8; 32] {
    sha2::Sha256::digest(data).into()
}

pub fn base64_encode(input: impl AsRef<[u8]>) -> String {
    base64::encode(input)
}

pub fn base64_decode(input: impl AsRef<[u8]>) -> Result<Vec<u8>> {
    Ok(base64::decode(input)?)
}

pub fn base64_encode_url_safe(input: impl AsRef<[u8]>) -> String {
    base64::encode_config(input, base64::URL_SAFE)
}

pub fn base64_decode_url_safe(input: impl AsRef<[u8]>) -> Result<Vec<u8>> {
    Ok(base64::decode_config(input, base64::URL_SAFE)?)
}

/// Byte-aligns a packed bit string by appending a completion tag: a single
/// `1` bit right after the payload, zeroes to the end of the byte. Aligned
/// input is returned as is.
pub fn append_tag(data: &[u8], bit_len: usize) -> Vec<u8> {
    let mut vec = data[..(bit_len + 7) / 8].to_vec();
    let offset = bit_len % 8;
    if offset != 0 {
        if let Some(last_byte) = vec.last_mut() {
            // keep the payload bits, set the tag, zero the rest
            *last_byte = (*last_byte & (0xFF << (8 - offset))) | (0x80 >> offset);
        }
    }
    vec
}

/// Finds the completion tag in the last byte and returns the payload length
/// in bits. The tag must sit in the low 7 bits of the last byte.
pub fn find_tag(data: &[u8]) -> Result<usize> {
    match data.last() {
        None => Ok(0),
        Some(last_byte) => {
            let trailing = last_byte.trailing_zeros() as usize;
            if trailing >= 7 {
                fail!("Incorrectly augmented bits")
            }
            Ok(data.len() * 8 - trailing - 1)
        }
    }
}

/// Renders `len` bits of `data` as fift-style hex: a trailing `_` marks that
/// the last digit carries a completion tag for a non-nibble-aligned payload.
pub fn to_hex_string(data: impl AsRef<[u8]>, len: usize, lower: bool) -> String {
    if len == 0 {
        return String::new()
    }
    let data = append_tag(data.as_ref(), len);
    let result = if lower {
        hex::encode(data)
    } else {
        hex::encode_upper(data)
    };
    match len % 8 {
        0 => result,
        1..=3 => {
            // tag and payload fit in the first nibble of the last byte
            let mut result = result;
            result.pop();
            result.push('_');
            result
        }
        4 => result[..result.len() - 1].to_string(),
        _ => {
            let mut result = result;
            result.push('_');
            result
        }
    }
}

/// Parses fift-style hex (optionally `_`-suffixed) into packed bits.
/// Returns the byte buffer and the payload length in bits.
pub fn from_hex_string(string: &str) -> Result<(Vec<u8>, usize)> {
    let mut string = string.trim();
    let augmented = match string.strip_suffix('_') {
        Some(stripped) => {
            string = stripped;
            true
        }
        None => false
    };
    let mut data = Vec::with_capacity(string.len() / 2 + 1);
    let mut acc = 0;
    let mut digits = 0;
    for char in string.chars() {
        let nibble = char.to_digit(16)
            .ok_or_else(|| error!("invalid hex character {}", char))? as u8;
        if digits % 2 == 0 {
            acc = nibble << 4;
        } else {
            data.push(acc | nibble);
        }
        digits += 1;
    }
    if digits % 2 != 0 {
        data.push(acc);
    }
    let mut bit_len = digits * 4;
    if augmented {
        loop {
            if bit_len == 0 {
                fail!("Incorrectly augmented bits")
            }
            bit_len -= 1;
            if data[bit_len / 8] & (0x80 >> (bit_len % 8)) != 0 {
                break
            }
        }
        data.truncate((bit_len + 7) / 8);
        if bit_len % 8 != 0 {
            if let Some(last_byte) = data.last_mut() {
                *last_byte &= 0xFF << (8 - bit_len % 8);
            }
        }
    }
    Ok((data, bit_len))
}

#[cfg(test)]
#[path = "tests/test_bits.rs"]
mod tests;
