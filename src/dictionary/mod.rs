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

use crate::cell::{BuilderData, Cell, SliceData};
use crate::types::{ExceptionCode, Result};
use crate::{error, fail, Mask};

pub use self::hashmap::HashmapE;

mod hashmap;

pub type Leaf = Result<Option<SliceData>>;

pub const ADD: u8 = 0x01;
pub const REPLACE: u8 = 0x02;
const EMPTY_LABEL_MARKER: u8 = 0b00_000000;
const LONG_LABEL_PREFIX: u8 = 0b10_000000; // hml_long, binary 10
const SAME_LABEL_PREFIX: u8 = 0b11_000000; // hml_same, binary 11

// n:(#<= m) takes bit_length(m) bits
fn label_length_bits(max: usize) -> usize {
    16 - (max as u16).leading_zeros() as usize
}

// hml_long$10 n:(#<= m) s:n*bit = HmLabel ~n m;
fn hml_long(key: &SliceData, len: usize) -> Result<BuilderData> {
    let mut label = BuilderData::new();
    label.store_bits(&[LONG_LABEL_PREFIX], 2)?;
    label.store_uint(key.remaining_bits() as u64, len)?;
    label.store_bits(&key.remaining_data(), key.remaining_bits())?;
    Ok(label)
}

// hml_short$0 {n:#} len:(Unary ~n) s:n*bit = HmLabel ~n m;
fn hml_short(key: &SliceData) -> Result<BuilderData> {
    let mut label = BuilderData::new();
    label.store_bit(false)?;
    let length = key.remaining_bits();
    for _ in 0..length / 32 {
        label.store_uint(u32::MAX as u64, 32)?;
    }
    let remainder = length % 32;
    if remainder != 0 {
        label.store_uint((1u64 << remainder) - 1, remainder)?;
    }
    label.store_bit(false)?;
    label.store_bits(&key.remaining_data(), length)?;
    Ok(label)
}

// hml_same$11 v:bit n:(#<= m) = HmLabel ~n m;
fn hml_same(key: &SliceData, len: usize) -> Result<Option<BuilderData>> {
    let mut zero_bit_found = false;
    let mut one_bit_found = false;
    let bits = key.remaining_bits();
    for offset in 0..bits {
        match key.get_bit(offset)? {
            false if one_bit_found => return Ok(None),
            false => zero_bit_found = true,
            true if zero_bit_found => return Ok(None),
            true => one_bit_found = true,
        }
    }

    let mut label = BuilderData::new();
    label.store_bits(&[SAME_LABEL_PREFIX], 2)?;
    label.store_bit(!zero_bit_found)?;
    label.store_uint(bits as u64, len)?;
    Ok(Some(label))
}

/// Encodes the shortest of the three label forms for the key.
pub fn hm_label(key: &SliceData, max: usize) -> Result<BuilderData> {
    debug_assert!(max > 0 || key.is_empty());
    if key.is_empty() || max == 0 {
        let mut label = BuilderData::new();
        label.store_bits(&[EMPTY_LABEL_MARKER], 2)?;
        return Ok(label)
    }
    let len = label_length_bits(max);
    let length_of_long = 2 + len + key.remaining_bits();
    let length_of_short = 1 + 2 * key.remaining_bits() + 1;
    let length_of_same = 2 + 1 + len;

    let long_label = hml_long(key, len)?;
    let short_label = hml_short(key)?;
    debug_assert_eq!(length_of_long, long_label.length_in_bits());
    debug_assert_eq!(length_of_short, short_label.length_in_bits());
    if let Some(same_label) = hml_same(key, len)? {
        debug_assert_eq!(length_of_same, same_label.length_in_bits());
        let length = cmp::min(long_label.length_in_bits(), short_label.length_in_bits());
        if same_label.length_in_bits() < length {
            return Ok(same_label)
        }
    }
    if short_label.length_in_bits() <= long_label.length_in_bits() {
        Ok(short_label)
    } else {
        Ok(long_label)
    }
}

// reading hmLabel from SliceData
impl SliceData {
    pub fn get_label(&mut self, max: usize) -> Result<SliceData> {
        if self.is_empty() {
            Ok(SliceData::default())
        } else if !self.load_bit()? {
            // short label
            let mut len = 0;
            while self.load_bit()? {
                len += 1;
            }
            let mut label = self.clone();
            self.shrink_data(len..);
            label.shrink_references(..0);
            label.shrink_data(..len);
            Ok(label)
        } else if !self.load_bit()? {
            // long label
            let len = self.load_uint(label_length_bits(max))? as usize;
            let mut label = self.clone();
            self.shrink_data(len..);
            label.shrink_references(..0);
            label.shrink_data(..len);
            Ok(label)
        } else {
            // same label
            let value = if self.load_bit()? { 0xFF } else { 0 };
            let len = self.load_uint(label_length_bits(max))? as usize;
            let builder = BuilderData::with_raw(smallvec::SmallVec::from_elem(value, len / 8 + 1), len)?;
            SliceData::load_builder(builder)
        }
    }

    /// Cuts the presence bit and the optional root reference out of the
    /// slice, returns them as a dictionary slice.
    pub fn get_dictionary(&mut self) -> Result<SliceData> {
        let mut root = self.clone();
        if !self.load_bit()? {
            root.shrink_references(..0);
        } else {
            self.load_ref()?;
            root.shrink_references(..1);
        }
        root.shrink_data(..1);
        Ok(root)
    }

    pub fn load_dict(&mut self, bit_len: usize) -> Result<HashmapE> {
        let mut dict = HashmapE::with_bit_len(bit_len);
        dict.read_hashmap_data(self)?;
        Ok(dict)
    }

    pub fn preload_dict(&self, bit_len: usize) -> Result<HashmapE> {
        self.clone().load_dict(bit_len)
    }
}

impl BuilderData {
    /// Presence bit, then the dictionary root as a reference.
    pub fn store_dict(&mut self, dict: &HashmapE) -> Result<&mut Self> {
        dict.write_hashmap_data(self)?;
        Ok(self)
    }
}

// difference for different hashmap types
pub trait HashmapType: Sized {
    fn write_hashmap_data(&self, cell: &mut BuilderData) -> Result<()> {
        match self.data() {
            Some(root) => {
                if !cell.check_enough_space(1) || !cell.check_enough_refs(1) {
                    fail!(ExceptionCode::CellOverflow)
                }
                cell.store_bit(true)?;
                cell.checked_append_reference(root.clone())?;
            }
            None => {
                cell.store_bit(false)?;
            }
        }
        Ok(())
    }
    fn read_hashmap_data(&mut self, slice: &mut SliceData) -> Result<()> {
        let root = slice.get_dictionary()?;
        *self.data_mut() = root.reference_opt(0);
        Ok(())
    }
    fn is_empty(&self) -> bool {
        self.data().is_none()
    }

    fn check_key(bit_len: usize, key: &SliceData) -> bool;
    fn check_key_fail(bit_len: usize, key: &SliceData) -> Result<()> {
        match !key.is_empty() && Self::check_key(bit_len, key) {
            true => Ok(()),
            false => fail!("Bad key {} for dict", key)
        }
    }
    fn make_cell_with_label(key: SliceData, max: usize) -> Result<BuilderData>;
    fn make_cell_with_label_and_data(key: SliceData, max: usize, is_leaf: bool, data: &SliceData) -> Result<BuilderData>;
    fn is_fork(slice: &mut SliceData) -> Result<bool>;
    fn is_leaf(slice: &mut SliceData) -> bool;
    fn data(&self) -> Option<&Cell>;
    fn data_mut(&mut self) -> &mut Option<Cell>;
    fn bit_len(&self) -> usize;
    fn bit_len_mut(&mut self) -> &mut usize;

    fn hashmap_get(&self, mut key: SliceData) -> Leaf {
        let mut bit_len = self.bit_len();
        Self::check_key_fail(bit_len, &key)?;
        let mut cursor = match self.data().cloned() {
            Some(root) => SliceData::load_cell(root)?,
            _ => return Ok(None)
        };
        let mut label = cursor.get_label(bit_len)?;
        while key.erase_prefix(&label) && !key.is_empty() {
            if !Self::is_fork(&mut cursor)? {
                return Ok(None)
            }
            let next_index = key.load_bit()? as usize;
            cursor = SliceData::load_cell(cursor.reference(next_index)?)?;
            bit_len -= label.remaining_bits() + 1;
            label = cursor.get_label(bit_len)?;
        }
        if key.is_empty() && Self::is_leaf(&mut cursor) {
            Ok(Some(cursor))
        } else {
            Ok(None)
        }
    }

    fn hashmap_set_with_mode(&mut self, key: SliceData, leaf: &SliceData, mode: u8) -> Leaf {
        let bit_len = self.bit_len();
        Self::check_key_fail(bit_len, &key)?;
        if let Some(mut root) = self.data().cloned() {
            let result = put_to_node_with_mode::<Self>(&mut root, bit_len, key, leaf, mode);
            *self.data_mut() = Some(root);
            result
        } else if mode.bit(ADD) {
            let cell = Self::make_cell_with_label_and_data(key, bit_len, true, leaf)?.into_cell()?;
            *self.data_mut() = Some(cell);
            Ok(None)
        } else {
            Ok(None)
        }
    }

    /// iterate all elements with callback function
    fn iterate_slices<F>(&self, mut p: F) -> Result<bool>
    where F: FnMut(BuilderData, SliceData) -> Result<bool> {
        match self.data() {
            Some(root) => iterate_internal(SliceData::load_cell(root.clone())?, self.bit_len(), &mut p),
            None => Ok(true)
        }
    }

    /// returns count of objects in tree - don't use it - try is_empty()
    fn len(&self) -> Result<usize> {
        let mut count = 0;
        self.iterate_slices(|_, _| {
            count += 1;
            Ok(true)
        })?;
        Ok(count)
    }
    /// counts elements to max counter - can be used as validate
    fn count(&self, max: usize) -> Result<usize> {
        let mut count = 0;
        self.iterate_slices(|_, _| {
            count += 1;
            Ok(count < max)
        })?;
        Ok(count)
    }
}

// depth-first, left edge first, so keys come out in ascending
// unsigned order
fn iterate_internal<F>(root: SliceData, bit_len: usize, found: &mut F) -> Result<bool>
where F: FnMut(BuilderData, SliceData) -> Result<bool> {
    let mut stack = vec![(root, BuilderData::new(), bit_len)];
    while let Some((mut cursor, mut key, bit_len)) = stack.pop() {
        let label = cursor.get_label(bit_len)?;
        let label_length = label.remaining_bits();
        if label_length < bit_len {
            let bit_len = bit_len - label_length - 1;
            for i in (0..2).rev() {
                let mut key = key.clone();
                key.store_bits(&label.remaining_data(), label_length)?;
                key.store_bit(i != 0)?;
                stack.push((SliceData::load_cell(cursor.reference(i)?)?, key, bit_len));
            }
        } else if label_length == bit_len {
            key.store_bits(&label.remaining_data(), label_length)?;
            if !found(key, cursor)? {
                return Ok(false)
            }
        } else {
            fail!(ExceptionCode::DictionaryError)
        }
    }
    Ok(true)
}

/// Puts element to required branch by first bit
fn put_to_fork_with_mode<T: HashmapType>(
    slice: &mut SliceData,
    bit_len: usize,
    mut key: SliceData,
    leaf: &SliceData,
    mode: u8
) -> Leaf {
    debug_assert!(slice.remaining_bits() == 0);
    let result;
    let next_index = key.load_bit()? as usize;
    // hmn_fork#_ {n:#} {X:Type} left:^(Hashmap n X) right:^(Hashmap n X) = HashmapNode (n+1) X;
    let mut builder = BuilderData::new();
    if slice.remaining_references() != 2 {
        fail!(ExceptionCode::CellUnderflow)
    } else {
        if next_index == 1 {
            builder.checked_append_reference(slice.load_ref()?)?;
        }
        let mut cell = slice.load_ref()?;
        result = put_to_node_with_mode::<T>(&mut cell, bit_len - 1, key, leaf, mode);
        builder.checked_append_reference(cell)?;
        if next_index == 0 {
            builder.checked_append_reference(slice.load_ref()?)?;
        }
    }
    *slice = SliceData::load_builder(builder)?;
    result
}

/// Continues or finishes search of place
fn put_to_node_with_mode<T: HashmapType>(
    cell: &mut Cell,
    bit_len: usize,
    key: SliceData,
    leaf: &SliceData,
    mode: u8
) -> Leaf {
    let mut result = Ok(None);
    let mut slice = SliceData::load_cell(cell.clone())?;
    let label = slice.get_label(bit_len)?;
    if label == key {
        // replace existing leaf
        if T::is_leaf(&mut slice) {
            result = Ok(Some(slice));
            if mode.bit(REPLACE) {
                *cell = T::make_cell_with_label_and_data(key, bit_len, true, leaf)?.into_cell()?;
            }
        } else {
            fail!(ExceptionCode::FatalError)
        }
    } else if label.is_empty() {
        // 1-bit edge
        let is_leaf = T::is_leaf(&mut slice);
        match put_to_fork_with_mode::<T>(&mut slice, bit_len, key, leaf, mode)? {
            None => {
                if mode.bit(ADD) {
                    *cell = T::make_cell_with_label_and_data(label, bit_len, is_leaf, &slice)?.into_cell()?;
                }
            }
            Some(val) => {
                if mode.bit(REPLACE) {
                    *cell = T::make_cell_with_label_and_data(label, bit_len, is_leaf, &slice)?.into_cell()?;
                }
                result = Ok(Some(val));
            }
        }
    } else {
        match SliceData::common_prefix(&label, &key) {
            (_, _, None) => { // key is shorter than the edge label
                if mode.bit(ADD) {
                    let is_leaf = T::is_leaf(&mut slice);
                    *cell = T::make_cell_with_label_and_data(label, bit_len, is_leaf, &slice)?.into_cell()?;
                }
            }
            (label_prefix, Some(label_remainder), Some(key_remainder)) => {
                if mode.bit(ADD) {
                    let builder = slice_edge::<T>(
                        slice, bit_len,
                        label_prefix.unwrap_or_default(), label_remainder, key_remainder,
                        leaf
                    )?;
                    *cell = builder.into_cell()?;
                }
            }
            (Some(prefix), None, Some(key_remainder)) => {
                // label is a strict prefix of the key, descend
                let is_leaf = T::is_leaf(&mut slice);
                result = put_to_fork_with_mode::<T>(
                    &mut slice, bit_len - prefix.remaining_bits(), key_remainder, leaf, mode
                );
                let make_cell = match result {
                    Ok(None) => mode.bit(ADD),
                    Ok(Some(_)) => mode.bit(REPLACE),
                    _ => false
                };
                if make_cell {
                    *cell = T::make_cell_with_label_and_data(label, bit_len, is_leaf, &slice)?.into_cell()?;
                }
            }
            error => {
                log::error!("unexpected common prefix split {:?}, label: {}, key: {}", error, label, key);
                fail!(ExceptionCode::FatalError)
            }
        }
    };
    result
}

/// Slices the edge and put new leaf
fn slice_edge<T: HashmapType>(
    mut slice: SliceData,
    bit_len: usize,
    prefix: SliceData,
    mut label: SliceData,
    mut key: SliceData,
    leaf: &SliceData,
) -> Result<BuilderData> {
    key.shrink_data(1..);
    let label_bit = label.load_bit()?;
    let length = bit_len - 1 - prefix.remaining_bits();
    let is_leaf = T::is_leaf(&mut slice);
    // Common prefix
    let mut builder = T::make_cell_with_label(prefix, bit_len)?;
    // Remainder of tree
    let existing_cell = T::make_cell_with_label_and_data(label, length, is_leaf, &slice)?.into_cell()?;
    // Leaf for fork
    let another_cell = T::make_cell_with_label_and_data(key, length, true, leaf)?.into_cell()?;
    if !label_bit {
        builder.checked_append_reference(existing_cell)?;
        builder.checked_append_reference(another_cell)?;
    } else {
        builder.checked_append_reference(another_cell)?;
        builder.checked_append_reference(existing_cell)?;
    };
    Ok(builder)
}

fn remove_node<T: HashmapType>(
    cell: &mut Cell,
    bit_len: usize,
    prefix: SliceData,
    mut key: SliceData,
) -> Leaf {
    if cell.references_count() != 2 {
        debug_assert!(false);
        return Ok(None)
    }
    let length = bit_len - 1 - prefix.remaining_bits();
    let next_index = key.load_bit()? as usize;
    let mut leaf = SliceData::load_cell(cell.reference(next_index)?)?;
    let label = leaf.get_label(length)?;
    if label == key && T::is_leaf(&mut leaf) {
        // the sibling edge absorbs the removed fork
        let result = Some(leaf);
        let mut fork = SliceData::load_cell(cell.reference(1 - next_index)?)?;
        let fork_label = fork.get_label(length)?;
        let mut label = BuilderData::new();
        label.store_bits(&prefix.remaining_data(), prefix.remaining_bits())?;
        label.store_bit(next_index == 0)?;
        label.store_bits(&fork_label.remaining_data(), fork_label.remaining_bits())?;
        let is_leaf = T::is_leaf(&mut fork);
        *cell = T::make_cell_with_label_and_data(
            SliceData::load_builder(label)?, bit_len, is_leaf, &fork
        )?.into_cell()?;
        return Ok(result);
    }
    let mut references = vec![cell.reference(0)?, cell.reference(1)?];
    let result = remove_fork::<T>(&mut references[next_index], length, label, key);

    let mut builder = BuilderData::new();
    builder.store_bits(cell.data(), cell.bit_length())?;
    for reference in references {
        builder.checked_append_reference(reference)?;
    }
    *cell = builder.into_cell()?;

    result
}

// label is empty or fully in key
fn remove_fork<T: HashmapType>(
    cell: &mut Cell,
    bit_len: usize,
    label: SliceData,
    key: SliceData,
) -> Leaf {
    if let (prefix, None, Some(remainder)) = SliceData::common_prefix(&label, &key) {
        remove_node::<T>(cell, bit_len, prefix.unwrap_or_default(), remainder)
    } else {
        Ok(None)
    }
}

pub trait HashmapRemover: HashmapType {
    fn hashmap_remove(&mut self, key: SliceData) -> Leaf {
        let bit_len = self.bit_len();
        Self::check_key_fail(bit_len, &key)?;
        let mut root = match self.data().cloned() {
            Some(root) => root,
            _ => return Ok(None)
        };
        let mut leaf = SliceData::load_cell(root.clone())?;
        let label = leaf.get_label(bit_len)?;
        let result;
        *self.data_mut() = if label == key && Self::is_leaf(&mut leaf) {
            // last node
            result = Ok(Some(leaf));
            None
        } else {
            result = remove_fork::<Self>(&mut root, bit_len, label, key);
            Some(root)
        };
        result
    }
}
