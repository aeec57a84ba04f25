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

use std::cmp;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Bound, Range, RangeBounds};

use crate::bits::{from_hex_string, to_hex_string};
use crate::cell::{builder::var_int_header_bits, BuilderData, Cell, CellType};
use crate::types::{ExceptionCode, Result, Status, StdAddr, UInt256};
use crate::{error, fail};
use num::{BigInt, BigUint, One};
use smallvec::SmallVec;

/// Read cursor over a cell: a window of bits and a window of references.
/// `load_*` consumes from the head, `preload_*` peeks, `skip_*` advances.
/// Cloning shares the underlying cell.
#[derive(Eq, Clone)]
pub struct SliceData {
    cell: Cell,
    data_window: Range<usize>,
    references_window: Range<usize>,
}

impl SliceData {
    pub fn new_empty() -> SliceData {
        SliceData::default()
    }

    pub fn load_cell(cell: Cell) -> Result<SliceData> {
        Ok(cell.into())
    }

    pub fn load_builder(builder: BuilderData) -> Result<SliceData> {
        Ok(builder.into_cell()?.into())
    }

    /// Parses a fift hex literal, e.g. `"77_"` or `"A5"`.
    pub fn from_string(value: &str) -> Result<SliceData> {
        let (data, length_in_bits) = from_hex_string(value)?;
        let builder = BuilderData::with_raw(SmallVec::from_vec(data), length_in_bits)?;
        Ok(builder.into_cell()?.into())
    }

    pub fn from_raw(data: Vec<u8>, length_in_bits: usize) -> SliceData {
        BuilderData::with_raw(SmallVec::from_vec(data), length_in_bits)
            .and_then(|builder| builder.into_cell())
            .expect("raw data does not fit into cell")
            .into()
    }

    pub fn remaining_references(&self) -> usize {
        if self.references_window.start > self.references_window.end {
            return 0;
        }
        self.references_window.end - self.references_window.start
    }

    pub fn remaining_bits(&self) -> usize {
        if self.data_window.start > self.data_window.end {
            return 0;
        }
        self.data_window.end - self.data_window.start
    }

    /// Remaining bits packed into bytes, the last byte left-aligned.
    pub fn remaining_data(&self) -> Vec<u8> {
        self.get_bytestring(0)
    }

    /// shrinks data_window: range - subrange of current window, returns prefix of suffix
    pub fn shrink_data<T: RangeBounds<usize>>(&mut self, range: T) -> SliceData {
        let data_len = self.remaining_bits();
        let start = match range.start_bound() {
            Bound::Included(start) => *start,
            Bound::Excluded(start) => start + 1,
            Bound::Unbounded => 0
        };
        let end = match range.end_bound() {
            Bound::Included(end) => end + 1,
            Bound::Excluded(end) => *end,
            Bound::Unbounded => data_len
        };
        if (start <= end) && (end <= data_len) {
            let mut slice = self.clone();
            if start != 0 { // return prefix
                slice.data_window.end = slice.data_window.start + start;
            } else { // return suffix
                slice.data_window.start += end;
            }
            slice.references_window = 0..0;
            self.data_window.end = self.data_window.start + end;
            self.data_window.start += start;
            slice
        } else {
            SliceData::default()
        }
    }

    /// shrinks references_window: range - subrange of current window, returns shrinked references
    pub fn shrink_references<T: RangeBounds<usize>>(&mut self, range: T) -> Vec<Cell> {
        let refs_count = self.remaining_references();
        let start = match range.start_bound() {
            Bound::Included(start) => *start,
            Bound::Excluded(start) => start + 1,
            Bound::Unbounded => 0
        };
        let end = match range.end_bound() {
            Bound::Included(end) => end + 1,
            Bound::Excluded(end) => *end,
            Bound::Unbounded => refs_count
        };

        let mut vec = vec![];
        if (start <= end) && (end <= refs_count) {
            (0..start).for_each(|i| vec.push(self.reference(i).unwrap()));
            (end..refs_count).for_each(|i| vec.push(self.reference(i).unwrap()));
            self.references_window.end = self.references_window.start + end;
            self.references_window.start += start;
        }
        vec
    }

    pub fn shrink_by_remainder(&mut self, other: &SliceData) {
        if self.data_window.start <= other.data_window.start {
            self.data_window.end = other.data_window.start
        }
        if self.references_window.start <= other.references_window.start {
            self.references_window.end = other.references_window.start
        }
    }

    pub fn reference(&self, i: usize) -> Result<Cell> {
        Ok(self.reference_opt(i).ok_or(ExceptionCode::CellUnderflow)?)
    }

    pub fn reference_opt(&self, i: usize) -> Option<Cell> {
        if self.references_window.start + i < self.references_window.end {
            self.cell.reference(self.references_window.start + i).ok()
        } else {
            None
        }
    }

    /// returns internal cell regardless window settings
    pub fn cell(&self) -> &Cell {
        &self.cell
    }

    pub fn cell_type(&self) -> CellType {
        self.cell.cell_type()
    }

    /// constructs new cell trunking original regarding window settings
    pub fn into_cell(self) -> Cell {
        if self.references_window.start == 0 && self.data_window.start == 0
            && self.references_window.end == self.cell.references_count()
            && self.data_window.end == self.cell.bit_length() {
            self.cell
        } else {
            let mut builder = BuilderData::new();
            builder.store_slice(&self).expect("slice content fits an empty builder");
            builder.into_cell().expect("slice content fits an empty builder")
        }
    }

    /// Returns subslice of current slice
    pub fn get_slice(&self, offset: usize, size: usize) -> Result<SliceData> {
        if offset + size > self.remaining_bits() {
            fail!(ExceptionCode::CellUnderflow)
        }
        let mut slice = self.clone();
        slice.shrink_data(offset..offset + size);
        slice.shrink_references(..0);
        Ok(slice)
    }

    pub fn get_bit_opt(&self, offset: usize) -> Option<bool> {
        if offset >= self.remaining_bits() {
            None
        } else {
            let index = self.data_window.start + offset;
            let q = index / 8;
            let r = index % 8;
            Some((self.cell.data()[q] >> (7 - r) & 1) != 0)
        }
    }

    pub fn get_bit(&self, offset: usize) -> Result<bool> {
        self.get_bit_opt(offset).ok_or_else(|| error!(ExceptionCode::CellUnderflow))
    }

    pub fn get_bits(&self, offset: usize, bits: usize) -> Result<u8> {
        if offset + bits > self.remaining_bits() {
            fail!(ExceptionCode::CellUnderflow)
        }
        if bits == 0 || bits > 8 {
            fail!(ExceptionCode::RangeCheckError)
        }
        let index = self.data_window.start + offset;
        let q = index / 8;
        let r = index % 8;
        if r == 0 {
            Ok(self.cell.data()[q] >> (8 - r - bits))
        } else if bits <= (8 - r) {
            Ok(self.cell.data()[q] >> (8 - r - bits) & ((1 << bits) - 1))
        } else {
            let mut ret = 0u16;
            if q < self.cell.data().len() {
                ret |= (self.cell.data()[q] as u16) << 8;
            }
            if q < self.cell.data().len() - 1 {
                ret |= self.cell.data()[q + 1] as u16;
            }
            Ok(((ret >> (8 - r)) as u8 >> (8 - bits)) as u8)
        }
    }

    pub fn get_byte(&self, offset: usize) -> Result<u8> {
        self.get_bits(offset, 8)
    }

    pub fn get_bytestring(&self, mut offset: usize) -> Vec<u8> {
        let mut ret = Vec::new();
        while (self.data_window.start + offset + 8) <= self.data_window.end {
            ret.push(self.get_byte(offset).unwrap());
            offset += 8
        }
        if (self.data_window.start + offset) < self.data_window.end {
            let remainder = self.data_window.end - self.data_window.start - offset;
            ret.push(self.get_bits(offset, remainder).unwrap() << (8 - remainder));
        }
        ret
    }

    pub fn is_empty(&self) -> bool {
        self.data_window.start >= self.data_window.end
    }

    pub fn move_by(&mut self, offset: usize) -> Status {
        if self.data_window.start + offset <= self.data_window.end {
            self.data_window.start += offset;
            Ok(())
        } else {
            fail!(ExceptionCode::CellUnderflow)
        }
    }

    pub fn pos(&self) -> usize {
        self.data_window.start
    }

    pub fn load_bit(&mut self) -> Result<bool> {
        let bit = self.get_bit(0)?;
        self.move_by(1)?;
        Ok(bit)
    }

    pub fn preload_bit(&self) -> Result<bool> {
        self.get_bit(0)
    }

    /// Takes `bits` bits, packed into bytes with the last byte left-aligned.
    pub fn load_bits(&mut self, bits: usize) -> Result<Vec<u8>> {
        if bits > self.remaining_bits() {
            fail!(ExceptionCode::CellUnderflow)
        }
        let bytes = bits / 8;
        let mut vec = (0..bytes).map(|i| self.get_byte(i * 8).unwrap()).collect::<Vec<_>>();
        let remainder = bits % 8;
        if remainder != 0 {
            let v = self.get_bits(bytes * 8, remainder)?;
            vec.push(v << (8 - remainder));
        }
        self.move_by(bits)?;
        Ok(vec)
    }

    pub fn preload_bits(&self, bits: usize) -> Result<Vec<u8>> {
        self.clone().load_bits(bits)
    }

    pub fn load_uint(&mut self, bits: usize) -> Result<u64> {
        if bits > self.remaining_bits() {
            fail!(ExceptionCode::CellUnderflow)
        }
        if bits == 0 {
            return Ok(0)
        }
        if bits > 64 {
            fail!("too many bits {} > 64", bits)
        }
        let mut value: u64 = 0;
        let bytes = bits / 8;
        for i in 0..bytes {
            value |= (self.get_byte(8 * i)? as u64) << (8 * (7 - i));
        }
        let remainder = bits % 8;
        if remainder != 0 {
            let r = self.get_bits(bytes * 8, remainder)? as u64;
            value |= r << (8 * (7 - bytes) + (8 - remainder));
        }
        self.move_by(bits)?;
        Ok(value >> (64 - bits))
    }

    pub fn preload_uint(&self, bits: usize) -> Result<u64> {
        self.clone().load_uint(bits)
    }

    pub fn load_int(&mut self, bits: usize) -> Result<i64> {
        let value = self.load_uint(bits)?;
        if bits != 0 && bits < 64 && value & (1 << (bits - 1)) != 0 {
            // sign extension
            Ok((value | !((1 << bits) - 1)) as i64)
        } else {
            Ok(value as i64)
        }
    }

    pub fn preload_int(&self, bits: usize) -> Result<i64> {
        self.clone().load_int(bits)
    }

    pub fn load_big_uint(&mut self, bits: usize) -> Result<BigUint> {
        let data = self.load_bits(bits)?;
        Ok(BigUint::from_bytes_be(&data) >> ((8 - bits % 8) % 8))
    }

    pub fn preload_big_uint(&self, bits: usize) -> Result<BigUint> {
        self.clone().load_big_uint(bits)
    }

    pub fn load_big_int(&mut self, bits: usize) -> Result<BigInt> {
        let unsigned = self.load_big_uint(bits)?;
        if bits != 0 && unsigned.bit(bits as u64 - 1) {
            Ok(BigInt::from(unsigned) - (BigInt::one() << bits))
        } else {
            Ok(BigInt::from(unsigned))
        }
    }

    pub fn preload_big_int(&self, bits: usize) -> Result<BigInt> {
        self.clone().load_big_int(bits)
    }

    pub fn load_var_uint(&mut self, max_length: usize) -> Result<BigUint> {
        let size_bytes = self.load_uint(var_int_header_bits(max_length))? as usize;
        self.load_big_uint(size_bytes * 8)
    }

    pub fn preload_var_uint(&self, max_length: usize) -> Result<BigUint> {
        self.clone().load_var_uint(max_length)
    }

    pub fn load_var_int(&mut self, max_length: usize) -> Result<BigInt> {
        let size_bytes = self.load_uint(var_int_header_bits(max_length))? as usize;
        self.load_big_int(size_bytes * 8)
    }

    pub fn preload_var_int(&self, max_length: usize) -> Result<BigInt> {
        self.clone().load_var_int(max_length)
    }

    /// `VarUInteger 16` amount, at most 15 payload bytes so it fits `u128`.
    pub fn load_coins(&mut self) -> Result<u128> {
        let size_bytes = self.load_uint(4)? as usize;
        let mut value = 0u128;
        for _ in 0..size_bytes {
            value = (value << 8) | self.load_uint(8)? as u128;
        }
        Ok(value)
    }

    pub fn preload_coins(&self) -> Result<u128> {
        self.clone().load_coins()
    }

    pub fn load_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        if count * 8 > self.remaining_bits() {
            fail!(ExceptionCode::CellUnderflow)
        }
        let mut vec = Vec::with_capacity(count);
        for _ in 0..count {
            let byte = self.get_byte(0)?;
            self.move_by(8)?;
            vec.push(byte);
        }
        Ok(vec)
    }

    pub fn preload_bytes(&self, count: usize) -> Result<Vec<u8>> {
        self.clone().load_bytes(count)
    }

    /// Takes every whole byte left, leftover bits stay in the slice.
    pub fn load_string(&mut self) -> Result<String> {
        let bytes = self.load_bytes(self.remaining_bits() / 8)?;
        Ok(String::from_utf8(bytes)?)
    }

    pub fn preload_string(&self) -> Result<String> {
        self.clone().load_string()
    }

    /// `addr_none$00` or `addr_std$10` without anycast; any other flag is
    /// malformed.
    pub fn load_address(&mut self) -> Result<Option<StdAddr>> {
        match self.load_uint(2)? {
            0b00 => Ok(None),
            0b10 => {
                self.load_bit()?; // anycast is unused
                let workchain_id = self.load_int(8)? as i8;
                let address = UInt256::from_slice(&self.load_bytes(32)?)?;
                Ok(Some(StdAddr::with_address(workchain_id, address)))
            }
            flag => fail!("bad address flag bits {:02b}", flag)
        }
    }

    pub fn preload_address(&self) -> Result<Option<StdAddr>> {
        self.clone().load_address()
    }

    pub fn load_ref(&mut self) -> Result<Cell> {
        if self.remaining_references() == 0 {
            fail!(ExceptionCode::CellUnderflow)
        }
        self.references_window.start += 1;
        self.cell.reference(self.references_window.start - 1)
    }

    pub fn preload_ref(&self) -> Result<Cell> {
        self.reference(0)
    }

    pub fn load_maybe_ref(&mut self) -> Result<Option<Cell>> {
        if self.load_bit()? {
            Ok(Some(self.load_ref()?))
        } else {
            Ok(None)
        }
    }

    pub fn preload_maybe_ref(&self) -> Result<Option<Cell>> {
        self.clone().load_maybe_ref()
    }

    /// Returns subslice of current slice and moves pointer
    pub fn load_slice(&mut self, size: usize) -> Result<SliceData> {
        let slice = self.get_slice(0, size)?;
        self.shrink_data(size..);
        Ok(slice)
    }

    pub fn skip_bits(&mut self, bits: usize) -> Status {
        self.move_by(bits)
    }

    pub fn skip_refs(&mut self, count: usize) -> Status {
        if count > self.remaining_references() {
            fail!(ExceptionCode::CellUnderflow)
        }
        self.references_window.start += count;
        Ok(())
    }

    pub fn skip_dict(&mut self) -> Status {
        if self.load_bit()? {
            self.skip_refs(1)
        } else {
            Ok(())
        }
    }

    pub fn withdraw(&mut self) -> SliceData {
        std::mem::replace(self, SliceData::new_empty())
    }

    /// returns false if prefix is not fully in self
    pub fn erase_prefix(&mut self, prefix: &SliceData) -> bool {
        if self.is_empty() || (self.remaining_bits() < prefix.remaining_bits()) {
            false
        } else if prefix.is_empty() {
            true
        } else if *self == *prefix {
            self.shrink_data(0..0);
            true
        } else {
            match SliceData::common_prefix(self, prefix) {
                (_, _, Some(_)) => false, // prefix should be fully in self
                (_, Some(remainder), _) => {
                    *self = remainder;
                    true
                }
                (_, None, _) => {
                    log::warn!("unreachable in erase_prefix {} {}", self, prefix);
                    self.shrink_data(0..0);
                    true
                },
            }
        }
    }

    /// Splits both slices into the shared head and the two remainders.
    pub fn common_prefix(a: &SliceData, b: &SliceData) -> (Option<SliceData>, Option<SliceData>, Option<SliceData>) {
        let mut offset = 0;
        let max_possible_prefix_length_in_bits = cmp::min(a.remaining_bits(), b.remaining_bits());
        while (offset + 8) <= max_possible_prefix_length_in_bits {
            if a.get_byte(offset).unwrap() != b.get_byte(offset).unwrap() {
                break;
            }
            offset += 8;
        }
        let (mut prefix, mut rem_a, mut rem_b);
        if offset >= max_possible_prefix_length_in_bits {
            if a.remaining_bits() < b.remaining_bits() {
                prefix = a.clone();
            } else {
                prefix = b.clone();
            }
            prefix.shrink_references(0..0);
            rem_a = a.clone();
            rem_a.shrink_data((max_possible_prefix_length_in_bits)..);
            rem_b = b.clone();
            rem_b.shrink_data((max_possible_prefix_length_in_bits)..);
        } else {
            let mut last_bits_len = max_possible_prefix_length_in_bits - offset;
            if last_bits_len > 8 {
                last_bits_len = 8;
            }
            let a_bits = a.get_bits(offset, last_bits_len).unwrap();
            let b_bits = b.get_bits(offset, last_bits_len).unwrap();
            let diff = (a_bits ^ b_bits) as u8;
            let mut diff = diff.leading_zeros() as usize;
            diff -= 8 - last_bits_len;
            let diff = cmp::min(diff, last_bits_len);

            prefix = a.clone();
            let end = offset + diff;
            prefix.shrink_data(..end);
            prefix.shrink_references(0..0);
            rem_a = a.clone();
            rem_a.shrink_data(offset + diff..);
            rem_b = b.clone();
            rem_b.shrink_data(offset + diff..);
        }

        (
            if prefix.remaining_bits() > 0 { Some(prefix) } else { None },
            if rem_a.remaining_bits() > 0 { Some(rem_a) } else { None },
            if rem_b.remaining_bits() > 0 { Some(rem_b) } else { None },
        )
    }

    pub fn as_hex_string(&self) -> String {
        self.to_hex_string(true)
    }

    pub fn to_hex_string(&self, lower: bool) -> String {
        to_hex_string(self.get_bytestring(0), self.remaining_bits(), lower)
    }
}

impl Default for SliceData {
    fn default() -> Self {
        Self {
            cell: Cell::default(),
            data_window: 0..0,
            references_window: 0..0,
        }
    }
}

impl From<Cell> for SliceData {
    fn from(cell: Cell) -> SliceData {
        SliceData {
            references_window: 0..cell.references_count(),
            data_window: 0..cell.bit_length(),
            cell
        }
    }
}

impl From<&Cell> for SliceData {
    fn from(cell: &Cell) -> SliceData {
        SliceData {
            cell: cell.clone(),
            references_window: 0..cell.references_count(),
            data_window: 0..cell.bit_length(),
        }
    }
}

impl PartialOrd for SliceData {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SliceData {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        match self.remaining_bits().cmp(&other.remaining_bits()) {
            cmp::Ordering::Equal => {
                let vec1 = self.get_bytestring(0);
                let vec2 = other.get_bytestring(0);
                let len = vec1.len();
                for i in 0..len {
                    let ordering = vec1[i].cmp(&vec2[i]);
                    if ordering != cmp::Ordering::Equal {
                        return ordering
                    }
                }
                cmp::Ordering::Equal
            }
            ordering => ordering
        }
    }
}

impl Hash for SliceData {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.get_bytestring(0).hash(state);
        for i in self.references_window.clone() {
            state.write(self.cell.reference(i).unwrap().repr_hash().as_slice());
        }
    }
}

impl PartialEq for SliceData {
    fn eq(&self, slice: &SliceData) -> bool {
        let refs_count = self.remaining_references();
        let bit_len = self.remaining_bits();
        if (bit_len != slice.remaining_bits()) ||
           (refs_count != slice.remaining_references()) {
            return false;
        }
        let mut offset = 0;
        while (offset + 8) <= bit_len {
            if self.get_byte(offset).unwrap() != slice.get_byte(offset).unwrap() {
                return false;
            }
            offset += 8
        }
        if (bit_len > offset) && (self.get_bits(offset, bit_len - offset).unwrap() != slice.get_bits(offset, bit_len - offset).unwrap()) {
            return false;
        }
        for i in 0..refs_count {
            let ref1 = self.reference(i).unwrap();
            let ref2 = slice.reference(i).unwrap();
            if ref1 != ref2 {
                return false;
            }
        }
        true
    }
}

impl fmt::Debug for SliceData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:x}", self)
    }
}

#[rustfmt::skip]
impl fmt::Display for SliceData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "data: {}..{}, references: {}..{}, data slice:{}, cell:{}",
                self.data_window.start,
                self.data_window.end,
                self.references_window.start,
                self.references_window.end,
                hex::encode(self.get_bytestring(0)),
                self.cell)
    }
}

impl fmt::LowerHex for SliceData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_hex_string(true))
    }
}

impl fmt::UpperHex for SliceData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_hex_string(false))
    }
}

#[cfg(test)]
#[path = "tests/test_slice.rs"]
mod tests;
