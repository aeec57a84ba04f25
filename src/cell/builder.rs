/*
* Copyright 2018-2020 TON DEV SOLUTIONS LTD.
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

use std::fmt;

use crate::bits::to_hex_string;
use crate::cell::{Cell, CellType, DataCell, SliceData, MAX_DATA_BITS, MAX_REFERENCES_COUNT, SHA256_SIZE};
use crate::{error, fail};
use crate::types::{ExceptionCode, Result, StdAddr};
use num::{bigint::Sign, BigInt, BigUint, One};
use smallvec::SmallVec;

/// Accumulates data bits and child references, then finalizes them into a
/// `Cell`. Every store operation validates before mutating, so a failed
/// call leaves the builder untouched.
#[derive(Clone)]
pub struct BuilderData {
    data: SmallVec<[u8; 128]>,
    length_in_bits: usize,
    references: Vec<Cell>,
}

// minimal two's complement width, 0 for zero
fn signed_bits_needed(value: &BigInt) -> usize {
    match value.sign() {
        Sign::NoSign => 0,
        Sign::Plus => value.magnitude().bits() as usize + 1,
        Sign::Minus => {
            let magnitude = value.magnitude();
            if magnitude.count_ones() == 1 {
                magnitude.bits() as usize
            } else {
                magnitude.bits() as usize + 1
            }
        }
    }
}

// header width of a var-int with at most max_length - 1 payload bytes
pub(crate) fn var_int_header_bits(max_length: usize) -> usize {
    (usize::BITS - (max_length - 1).leading_zeros()) as usize
}

impl BuilderData {
    pub const fn new() -> Self {
        BuilderData {
            data: SmallVec::new_const(),
            length_in_bits: 0,
            references: Vec::new(),
        }
    }

    /// Wraps ready-made data, truncating it to `length_in_bits` and zeroing
    /// the unused tail bits of the last byte.
    pub fn with_raw(mut data: SmallVec<[u8; 128]>, length_in_bits: usize) -> Result<BuilderData> {
        let used_bytes = (length_in_bits + 7) / 8;
        if data.len() < used_bytes {
            fail!(ExceptionCode::FatalError)
        } else if length_in_bits > BuilderData::bits_capacity() {
            fail!(ExceptionCode::CellOverflow)
        }
        data.truncate(used_bytes);
        if length_in_bits % 8 != 0 {
            let trailing = 8 - length_in_bits % 8;
            if let Some(last_byte) = data.last_mut() {
                *last_byte = (*last_byte >> trailing) << trailing;
            }
        }
        Ok(BuilderData {
            data,
            length_in_bits,
            references: Vec::new(),
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn length_in_bits(&self) -> usize {
        self.length_in_bits
    }

    pub fn references(&self) -> &[Cell] {
        &self.references
    }

    pub fn is_empty(&self) -> bool {
        self.length_in_bits == 0 && self.references.is_empty()
    }

    pub const fn bits_capacity() -> usize {
        MAX_DATA_BITS
    }

    pub fn bits_used(&self) -> usize {
        self.length_in_bits
    }

    pub fn bits_free(&self) -> usize {
        BuilderData::bits_capacity() - self.length_in_bits
    }

    pub const fn references_capacity() -> usize {
        MAX_REFERENCES_COUNT
    }

    pub fn references_used(&self) -> usize {
        self.references.len()
    }

    pub fn references_free(&self) -> usize {
        BuilderData::references_capacity() - self.references.len()
    }

    pub fn check_enough_space(&self, bits: usize) -> bool {
        self.bits_free() >= bits
    }

    pub fn check_enough_refs(&self, count: usize) -> bool {
        self.references_free() >= count
    }

    /// Raw append of `bits` bits taken from the head of `slice`.
    pub fn store_bits(&mut self, slice: &[u8], bits: usize) -> Result<&mut Self> {
        if slice.len() * 8 < bits {
            fail!(ExceptionCode::FatalError)
        } else if !self.check_enough_space(bits) {
            fail!(ExceptionCode::CellOverflow)
        } else if bits != 0 {
            let slice = &slice[..(bits + 7) / 8];
            if self.length_in_bits % 8 == 0 {
                if bits % 8 == 0 {
                    self.append_without_shifting(slice, bits);
                } else {
                    self.append_with_slice_shifting(slice, bits);
                }
            } else {
                self.append_with_double_shifting(slice, bits);
            }
        }
        assert!(self.length_in_bits <= BuilderData::bits_capacity());
        assert!(self.data.len() * 8 <= BuilderData::bits_capacity() + 7);
        Ok(self)
    }

    fn append_without_shifting(&mut self, slice: &[u8], bits: usize) {
        debug_assert!(bits % 8 == 0);
        debug_assert!(self.length_in_bits % 8 == 0);
        self.data.truncate(self.length_in_bits / 8);
        self.data.extend_from_slice(slice);
        self.length_in_bits += bits;
        self.data.truncate(self.length_in_bits / 8);
    }

    fn append_with_slice_shifting(&mut self, slice: &[u8], bits: usize) {
        debug_assert!(bits % 8 != 0);
        debug_assert!(self.length_in_bits % 8 == 0);
        self.data.truncate(self.length_in_bits / 8);
        self.data.extend_from_slice(slice);
        self.length_in_bits += bits;
        self.data.truncate(1 + self.length_in_bits / 8);

        let slice_shift = bits % 8;
        if let Some(last_byte) = self.data.last_mut() {
            *last_byte = (*last_byte >> (8 - slice_shift)) << (8 - slice_shift);
        }
    }

    fn append_with_double_shifting(&mut self, slice: &[u8], bits: usize) {
        let self_shift = self.length_in_bits % 8;
        self.data.truncate(1 + self.length_in_bits / 8);
        self.length_in_bits += bits;

        let last_bits = self.data.pop().map_or(0, |byte| byte >> (8 - self_shift));
        let mut y: u16 = last_bits.into();
        for x in slice.iter() {
            y = (y << 8) | (*x as u16);
            self.data.push((y >> self_shift) as u8);
        }
        self.data.push((y << (8 - self_shift)) as u8);

        let shift = self.length_in_bits % 8;
        if shift == 0 {
            self.data.truncate(self.length_in_bits / 8);
        } else {
            self.data.truncate(self.length_in_bits / 8 + 1);
            if let Some(last_byte) = self.data.last_mut() {
                *last_byte = (*last_byte >> (8 - shift)) << (8 - shift);
            }
        }
    }

    pub fn store_bit(&mut self, bit: bool) -> Result<&mut Self> {
        self.store_bits(&[if bit { 0x80 } else { 0 }], 1)
    }

    pub fn store_uint(&mut self, value: u64, bits: usize) -> Result<&mut Self> {
        if bits > 64 {
            return self.store_big_uint(&BigUint::from(value), bits)
        }
        if bits < 64 && value >= 1 << bits {
            fail!(ExceptionCode::RangeCheckError)
        }
        if bits == 0 {
            return Ok(self)
        }
        let buffer = (value << (64 - bits)).to_be_bytes();
        self.store_bits(&buffer[..(bits + 7) / 8], bits)
    }

    pub fn store_int(&mut self, value: i64, bits: usize) -> Result<&mut Self> {
        if bits > 64 {
            return self.store_big_int(&BigInt::from(value), bits)
        }
        if bits == 0 {
            if value != 0 {
                fail!(ExceptionCode::RangeCheckError)
            }
            return Ok(self)
        }
        if bits < 64 {
            let bound = 1i64 << (bits - 1);
            if value >= bound || value < -bound {
                fail!(ExceptionCode::RangeCheckError)
            }
        }
        let buffer = ((value as u64) << (64 - bits)).to_be_bytes();
        self.store_bits(&buffer[..(bits + 7) / 8], bits)
    }

    pub fn store_big_uint(&mut self, value: &BigUint, bits: usize) -> Result<&mut Self> {
        if value.bits() as usize > bits {
            fail!(ExceptionCode::RangeCheckError)
        }
        if !self.check_enough_space(bits) {
            fail!(ExceptionCode::CellOverflow)
        }
        if bits == 0 {
            return Ok(self)
        }
        // shift so that the top payload bit lands on a byte border
        let aligned = value << ((8 - bits % 8) % 8);
        let buffer = aligned.to_bytes_be();
        let byte_len = (bits + 7) / 8;
        let mut data = vec![0; byte_len - buffer.len()];
        data.extend_from_slice(&buffer);
        self.store_bits(&data, bits)
    }

    pub fn store_big_int(&mut self, value: &BigInt, bits: usize) -> Result<&mut Self> {
        if signed_bits_needed(value) > bits {
            fail!(ExceptionCode::RangeCheckError)
        }
        if bits == 0 {
            return Ok(self)
        }
        let unsigned = match value.sign() {
            Sign::Minus => ((BigInt::one() << bits) + value).magnitude().clone(),
            _ => value.magnitude().clone(),
        };
        self.store_big_uint(&unsigned, bits)
    }

    /// var-int with an unsigned payload: a header of
    /// `ceil(log2(max_length))` bits holds the payload byte count, then the
    /// value in that many bytes. Zero is a bare zero header.
    pub fn store_var_uint(&mut self, value: &BigUint, max_length: usize) -> Result<&mut Self> {
        if max_length == 0 {
            fail!(ExceptionCode::RangeCheckError)
        }
        let header_bits = var_int_header_bits(max_length);
        let size_bytes = (value.bits() as usize + 7) / 8;
        if !self.check_enough_space(header_bits + size_bytes * 8) {
            fail!(ExceptionCode::CellOverflow)
        }
        self.store_uint(size_bytes as u64, header_bits)?;
        if size_bytes != 0 {
            self.store_big_uint(value, size_bytes * 8)?;
        }
        Ok(self)
    }

    pub fn store_var_int(&mut self, value: &BigInt, max_length: usize) -> Result<&mut Self> {
        if max_length == 0 {
            fail!(ExceptionCode::RangeCheckError)
        }
        let header_bits = var_int_header_bits(max_length);
        let size_bytes = (signed_bits_needed(value) + 7) / 8;
        if !self.check_enough_space(header_bits + size_bytes * 8) {
            fail!(ExceptionCode::CellOverflow)
        }
        self.store_uint(size_bytes as u64, header_bits)?;
        if size_bytes != 0 {
            self.store_big_int(value, size_bytes * 8)?;
        }
        Ok(self)
    }

    /// Nanocoin amount, i.e. `VarUInteger 16`.
    pub fn store_coins(&mut self, value: u128) -> Result<&mut Self> {
        self.store_var_uint(&BigUint::from(value), 16)
    }

    pub fn store_bytes(&mut self, data: &[u8]) -> Result<&mut Self> {
        self.store_bits(data, data.len() * 8)
    }

    pub fn store_string(&mut self, string: &str) -> Result<&mut Self> {
        self.store_bytes(string.as_bytes())
    }

    /// `None` writes `addr_none$00`, `Some` writes `addr_std$10` without
    /// anycast.
    pub fn store_address(&mut self, address: Option<&StdAddr>) -> Result<&mut Self> {
        match address {
            None => self.store_bits(&[0x00], 2),
            Some(address) => {
                if !self.check_enough_space(2 + 1 + 8 + SHA256_SIZE * 8) {
                    fail!(ExceptionCode::CellOverflow)
                }
                self.store_bits(&[0x80], 2)?;
                self.store_bit(false)?;
                self.store_int(address.workchain_id as i64, 8)?;
                self.store_bits(address.address.as_slice(), SHA256_SIZE * 8)
            }
        }
    }

    pub fn store_ref(&mut self, cell: Cell) -> Result<&mut Self> {
        self.checked_append_reference(cell)
    }

    pub fn store_refs(&mut self, refs: impl IntoIterator<Item = Cell>) -> Result<&mut Self> {
        let refs: Vec<Cell> = refs.into_iter().collect();
        if !self.check_enough_refs(refs.len()) {
            fail!(ExceptionCode::CellOverflow)
        }
        self.references.extend(refs);
        Ok(self)
    }

    /// Presence bit, then the cell as a reference when it is there.
    pub fn store_maybe_ref(&mut self, cell: Option<Cell>) -> Result<&mut Self> {
        match cell {
            None => self.store_bit(false),
            Some(cell) => {
                if !self.check_enough_space(1) || !self.check_enough_refs(1) {
                    fail!(ExceptionCode::CellOverflow)
                }
                self.store_bit(true)?;
                self.checked_append_reference(cell)
            }
        }
    }

    /// Appends the remainder of `slice`, both bits and references.
    pub fn store_slice(&mut self, slice: &SliceData) -> Result<&mut Self> {
        let bits = slice.remaining_bits();
        let refs_count = slice.remaining_references();
        if !self.check_enough_space(bits) || !self.check_enough_refs(refs_count) {
            fail!(ExceptionCode::CellOverflow)
        }
        self.store_bits(&slice.remaining_data(), bits)?;
        for i in 0..refs_count {
            self.checked_append_reference(slice.reference(i)?)?;
        }
        Ok(self)
    }

    pub fn checked_append_reference(&mut self, cell: Cell) -> Result<&mut Self> {
        if !self.check_enough_refs(1) {
            fail!(ExceptionCode::CellOverflow)
        }
        self.references.push(cell);
        Ok(self)
    }

    pub fn into_cell(self) -> Result<Cell> {
        self.into_cell_with_type(CellType::Ordinary)
    }

    pub fn into_cell_with_type(self, cell_type: CellType) -> Result<Cell> {
        let cell = DataCell::with_params(cell_type, self.data, self.length_in_bits, self.references)?;
        Ok(Cell::from(cell))
    }
}

impl Default for BuilderData {
    fn default() -> Self {
        BuilderData::new()
    }
}

impl PartialEq for BuilderData {
    fn eq(&self, other: &Self) -> bool {
        self.length_in_bits == other.length_in_bits
            && self.data == other.data
            && self.references == other.references
    }
}

impl Eq for BuilderData {}

impl fmt::Debug for BuilderData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "data: {} len: {} reference count: {}",
            hex::encode(&self.data), self.length_in_bits, self.references.len())
    }
}

impl fmt::Display for BuilderData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "x{{{}}}", to_hex_string(&self.data, self.length_in_bits, true))
    }
}

impl fmt::UpperHex for BuilderData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", to_hex_string(&self.data, self.length_in_bits, false))
    }
}

impl fmt::Binary for BuilderData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for index in 0..self.length_in_bits {
            let bit = (self.data[index / 8] >> (7 - index % 8)) & 1;
            write!(f, "{}", bit)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/test_builder.rs"]
mod tests;
