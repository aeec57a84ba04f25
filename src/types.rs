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

use crate::cell::SliceData;
use num::FromPrimitive;
use std::{fmt, fmt::{LowerHex, UpperHex}, cmp, str, convert::TryInto};

pub type Result<T> = std::result::Result<T, failure::Error>;
pub type Status = Result<()>;

#[macro_export]
macro_rules! error {
    ($error:literal) => {
        failure::err_msg(format!("{} {}:{}", $error, file!(), line!()))
    };
    ($error:expr) => {
        failure::Error::from($error)
    };
    ($fmt:expr, $($arg:tt)+) => {
        failure::err_msg(format!("{} {}:{}", format!($fmt, $($arg)*), file!(), line!()))
    };
}

#[macro_export]
macro_rules! fail {
    ($error:literal) => {
        return Err(failure::err_msg(format!("{} {}:{}", $error, file!(), line!())))
    };
    ($error:expr) => {
        return Err(error!($error))
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err(failure::err_msg(format!("{} {}:{}", format!($fmt, $($arg)*), file!(), line!())))
    };
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct UInt256([u8; 32]);

impl UInt256 {

    pub const fn new() -> Self {
        Self::ZERO
    }
    pub const fn with_array(data: [u8; 32]) -> Self {
        Self(data)
    }

    pub fn is_zero(&self) -> bool {
        for b in &self.0 {
            if b != &0 {
                return false
            }
        }
        true
    }

    pub const fn as_slice(&self) -> &[u8; 32] {
        &self.0
    }

    // Returns solid string like this: a80b23bfe4d301497f3ce11e753f23e8dec32368945ee279d044dbc1f91ace2a
    pub fn to_hex_string(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_str(value: &str) -> Result<Self> {
        let bytes = match value.len() {
            64 => hex::decode(value)?,
            44 => base64::decode(value)?,
            _ => fail!("invalid hash string length (64 expected), got {}", value.len())
        };
        bytes.try_into().map(Self).map_err(|_| error!("invalid hash string {}", value))
    }

    pub fn from_be_bytes(value: &[u8]) -> Self {
        let mut data = [0; 32];
        let len = cmp::min(value.len(), 32);
        let offset = 32 - len;
        (0..len).for_each(|i| data[i + offset] = value[i]);
        Self(data)
    }

    pub fn from_slice(value: &[u8]) -> Result<Self> {
        match value.try_into() {
            Ok(hash) => Ok(Self(hash)),
            Err(_) => fail!("hash must be exactly 32 bytes long, got {}", value.len())
        }
    }

    pub fn rand() -> Self {
        let mut data = [0; 32];
        data.iter_mut().for_each(|byte| *byte = rand::random::<u8>());
        Self(data)
    }

    pub const ZERO: UInt256 = UInt256([0; 32]);
    pub const MAX: UInt256 = UInt256([0xFF; 32]);
    // hash of default cell 0x96a296d224f285c67bee93c30f8a309157f0daa35dc5b87e410b78630a09cfc7;
    pub const DEFAULT_CELL_HASH: UInt256 = UInt256([150, 162, 150, 210, 36, 242, 133, 198, 123, 238, 147,
        195, 15, 138, 48, 145, 87, 240, 218, 163, 93, 197, 184, 126, 65, 11, 120, 99, 10, 9, 207, 199]);
}

impl From<[u8; 32]> for UInt256 {
    fn from(data: [u8; 32]) -> Self {
        UInt256(data)
    }
}

impl From<UInt256> for [u8; 32] {
    fn from(hash: UInt256) -> Self {
        hash.0
    }
}

impl From<&UInt256> for SliceData {
    fn from(hash: &UInt256) -> SliceData {
        SliceData::from_raw(hash.0.to_vec(), 256)
    }
}

impl<'a> From<&'a [u8; 32]> for UInt256 {
    fn from(data: &[u8; 32]) -> Self {
        UInt256(*data)
    }
}

impl PartialEq<Vec<u8>> for UInt256 {
    fn eq(&self, other: &Vec<u8>) -> bool {
        if other.len() == 32 {
            return &self.0 == other.as_slice()
        }
        false
    }
}

impl fmt::Debug for UInt256 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        LowerHex::fmt(self, f)
    }
}

impl fmt::Display for UInt256 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "UInt256[{:X?}]", self.as_slice()
        )
    }
}

impl LowerHex for UInt256 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if f.alternate() {
            write!(f, "0x")?;
        }
        write!(f, "{}", hex::encode(self.0))
    }
}

impl UpperHex for UInt256 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if f.alternate() {
            write!(f, "0x")?;
        }
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

impl AsRef<[u8]> for UInt256 {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

/// Standard internal address: workchain plus 256-bit account id, without
/// the user-facing packed encodings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct StdAddr {
    pub workchain_id: i8,
    pub address: UInt256,
}

impl StdAddr {
    pub const fn with_address(workchain_id: i8, address: UInt256) -> Self {
        Self { workchain_id, address }
    }
}

impl fmt::Display for StdAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{:x}", self.workchain_id, self.address)
    }
}

impl str::FromStr for StdAddr {
    type Err = failure::Error;
    fn from_str(value: &str) -> Result<Self> {
        let (workchain_id, address) = match value.split_once(':') {
            Some((prefix, suffix)) => (prefix.parse::<i8>()?, UInt256::from_str(suffix)?),
            None => fail!("invalid address string {}", value)
        };
        Ok(Self { workchain_id, address })
    }
}

// Exceptions *****************************************************************

#[derive(Clone, Copy, Debug, num_derive::FromPrimitive, PartialEq, Eq, failure::Fail)]
pub enum ExceptionCode {
    #[fail(display = "normal termination")]
    NormalTermination = 0,
    #[fail(display = "alternative termination")]
    AlternativeTermination = 1,
    #[fail(display = "stack underflow")]
    StackUnderflow = 2,
    #[fail(display = "stack overflow")]
    StackOverflow = 3,
    #[fail(display = "integer overflow")]
    IntegerOverflow = 4,
    #[fail(display = "range check error")]
    RangeCheckError = 5,
    #[fail(display = "invalid opcode")]
    InvalidOpcode = 6,
    #[fail(display = "type check error")]
    TypeCheckError = 7,
    #[fail(display = "cell overflow")]
    CellOverflow = 8,
    #[fail(display = "cell underflow")]
    CellUnderflow = 9,
    #[fail(display = "dictionary error")]
    DictionaryError = 10,
    #[fail(display = "unknown error")]
    UnknownError = 11,
    #[fail(display = "fatal error")]
    FatalError = 12,
    #[fail(display = "out of gas")]
    OutOfGas = 13
}

impl ExceptionCode {
    pub fn from_usize(number: usize) -> Option<ExceptionCode> {
        FromPrimitive::from_usize(number)
    }
}

pub trait ByteOrderRead {
    fn read_be_uint(&mut self, bytes: usize) -> std::io::Result<usize>;
    fn read_byte(&mut self) -> std::io::Result<u8>;
    fn read_be_u32(&mut self) -> std::io::Result<u32>;
    fn read_le_u32(&mut self) -> std::io::Result<u32>;
}

impl<T: std::io::Read> ByteOrderRead for T {
    fn read_be_uint(&mut self, bytes: usize) -> std::io::Result<usize> {
        match bytes {
            1 => {
                let mut buf = [0];
                self.read_exact(&mut buf)?;
                Ok(buf[0] as usize)
            }
            2 => {
                let mut buf = [0; 2];
                self.read_exact(&mut buf)?;
                Ok(u16::from_be_bytes(buf) as usize)
            }
            3..=4 => {
                let mut buf = [0; 4];
                self.read_exact(&mut buf[4 - bytes..])?;
                Ok(u32::from_be_bytes(buf) as usize)
            },
            5..=8 => {
                let mut buf = [0; 8];
                self.read_exact(&mut buf[8 - bytes..])?;
                Ok(u64::from_be_bytes(buf) as usize)
            },
            _ => Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "too many bytes to read in usize")),
        }
    }

    fn read_byte(&mut self) -> std::io::Result<u8> {
        self.read_be_uint(1).map(|value| value as u8)
    }

    fn read_be_u32(&mut self) -> std::io::Result<u32> {
        self.read_be_uint(4).map(|value| value as u32)
    }

    fn read_le_u32(&mut self) -> std::io::Result<u32> {
        let mut buf = [0; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }
}

#[cfg(test)]
#[path = "tests/test_types.rs"]
mod tests;
