/*
* Copyright 2018-2020 TON DEV SOLUTIONS LTD.
*
* Licensed under the SOFTWARE EVALUATION License (the "License"); you may not use
* this file except in compliance with the License.  You may obtain a copy of the
* License at: https://ton.dev/licenses
*
* Unless required by applicable law or agreed to in writing, software
* distributed under the License is distributed on an "AS IS" BASIS,
* WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
* See the License for the specific TON DEV software governing permissions and
* limitations under the License.
*/

use std::fmt;

use crate::cell::{BuilderData, Cell, SliceData, MAX_DATA_BITS};
use crate::{error, fail};
use crate::types::{ExceptionCode, Result};

use super::{hm_label, HashmapRemover, HashmapType, Leaf, ADD, REPLACE};

///////////////////////////////////////////////
/// Length of key should not exceed bit_len
///
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HashmapE {
    bit_len: usize,
    data: Option<Cell>,
}

impl fmt::Display for HashmapE {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.data() {
            Some(cell) => write!(f, "Hashmap: {}", cell),
            None => write!(f, "Empty Hashmap")
        }
    }
}

impl HashmapE {
    /// constructs with bit_len
    pub const fn with_bit_len(bit_len: usize) -> Self {
        let bit_len = if bit_len > MAX_DATA_BITS { MAX_DATA_BITS } else { bit_len };
        Self {
            bit_len,
            data: None,
        }
    }
    /// construct from dictionary slice: maybe bit, then root as reference
    pub fn with_data(bit_len: usize, data: SliceData) -> Self {
        Self::with_hashmap(bit_len, data.reference_opt(0))
    }
    /// construct with root cell of the tree
    pub fn with_hashmap(bit_len: usize, data: Option<Cell>) -> Self {
        let bit_len = std::cmp::min(bit_len, MAX_DATA_BITS);
        Self {
            bit_len,
            data,
        }
    }
    /// serialize not empty root in current cell
    pub fn write_hashmap_root(&self, cell: &mut BuilderData) -> Result<()> {
        match self.data() {
            Some(root) => {
                cell.store_slice(&SliceData::load_cell(root.clone())?)?;
                Ok(())
            }
            None => fail!(ExceptionCode::CellUnderflow)
        }
    }
    /// serialize hashmap_e to cell as maybe reference
    pub fn write_to_cell(&self, cell: &mut BuilderData) -> Result<()> {
        self.write_hashmap_data(cell)
    }
    /// deserialize not empty root
    pub fn read_hashmap_root(&mut self, slice: &mut SliceData) -> Result<()> {
        let mut root = slice.clone();
        let label = slice.get_label(self.bit_len)?;
        if label.remaining_bits() != self.bit_len { // fork
            slice.shrink_references(2..); // left and right
            root.shrink_by_remainder(slice);
        } else { // single leaf as root
            slice.shrink_data(..0);
            slice.shrink_references(..0);
        }
        self.data = Some(root.into_cell());
        Ok(())
    }
    /// gets value from hashmap, returns None if the key is absent
    pub fn get(&self, key: SliceData) -> Leaf {
        self.hashmap_get(key)
    }
    /// adds new or replaces existing value, returns the old one
    pub fn set(&mut self, key: SliceData, value: &SliceData) -> Leaf {
        self.hashmap_set_with_mode(key, value, ADD | REPLACE)
    }
    /// stores the value only if the key is not yet present
    pub fn add(&mut self, key: SliceData, value: &SliceData) -> Leaf {
        self.hashmap_set_with_mode(key, value, ADD)
    }
    /// stores the value only if the key is already present
    pub fn replace(&mut self, key: SliceData, value: &SliceData) -> Leaf {
        self.hashmap_set_with_mode(key, value, REPLACE)
    }
    /// removes value by key, returns the removed one
    pub fn remove(&mut self, key: SliceData) -> Leaf {
        self.hashmap_remove(key)
    }
}

// hme_empty$0 {n:#} {X:Type} = HashmapE n X;
// hme_root$1 {n:#} {X:Type} root:^(Hashmap n X) = HashmapE n X;
// hm_edge#_ {n:#} {X:Type} {l:#} {m:#} label:(HmLabel ~l n)
// {n = (~m) + l} node:(HashmapNode m X) = Hashmap n X;
// hmn_leaf#_ {X:Type} value:X = HashmapNode 0 X;
// hmn_fork#_ {n:#} {X:Type} left:^(Hashmap n X)
// right:^(Hashmap n X) = HashmapNode (n+1) X;
impl HashmapType for HashmapE {
    fn check_key(bit_len: usize, key: &SliceData) -> bool {
        bit_len == key.remaining_bits()
    }
    fn make_cell_with_label(key: SliceData, max: usize) -> Result<BuilderData> {
        hm_label(&key, max)
    }
    fn make_cell_with_label_and_data(
        key: SliceData,
        max: usize,
        _is_leaf: bool,
        data: &SliceData
    ) -> Result<BuilderData> {
        let mut builder = hm_label(&key, max)?;
        // value must fit the edge cell itself
        builder.store_slice(data)?;
        Ok(builder)
    }
    fn is_fork(slice: &mut SliceData) -> Result<bool> {
        Ok(slice.remaining_references() > 1)
    }
    fn is_leaf(_slice: &mut SliceData) -> bool {
        true
    }
    fn data(&self) -> Option<&Cell> {
        self.data.as_ref()
    }
    fn data_mut(&mut self) -> &mut Option<Cell> {
        &mut self.data
    }
    fn bit_len(&self) -> usize {
        self.bit_len
    }
    fn bit_len_mut(&mut self) -> &mut usize {
        &mut self.bit_len
    }
}

impl HashmapRemover for HashmapE {}

#[cfg(test)]
#[path = "tests/test_hashmap.rs"]
mod tests;
