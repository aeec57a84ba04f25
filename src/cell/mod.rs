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

use crate::{
    bits::{append_tag, sha256_digest, to_hex_string},
    error, fail,
    types::{ExceptionCode, Result, Status, UInt256},
};
use smallvec::SmallVec;
use std::{
    cmp::{max, min},
    fmt::{self, Display, Formatter},
    hash::{Hash, Hasher},
    ops::{BitOr, BitOrAssign},
    sync::Arc,
};

pub const SHA256_SIZE: usize = 32;
pub const DEPTH_SIZE: usize = 2;
pub const MAX_REFERENCES_COUNT: usize = 4;
pub const MAX_DATA_BITS: usize = 1023;
pub const MAX_DATA_BYTES: usize = 128;
pub const MAX_LEVEL: usize = 3;
pub const MAX_LEVEL_MASK: u8 = 7;
pub const MAX_DEPTH: u16 = 1024;

#[derive(Debug, Default, Eq, PartialEq, Clone, Copy, Hash)]
pub enum CellType {
    #[default]
    Ordinary,
    PrunedBranch,
    LibraryReference,
    MerkleProof,
    MerkleUpdate,
}

impl CellType {
    pub fn is_exotic(&self) -> bool {
        self != &CellType::Ordinary
    }

    pub fn is_merkle(&self) -> bool {
        matches!(self, CellType::MerkleProof | CellType::MerkleUpdate)
    }
}

impl TryFrom<u8> for CellType {
    type Error = failure::Error;
    fn try_from(num: u8) -> Result<CellType> {
        let typ = match num {
            1 => CellType::PrunedBranch,
            2 => CellType::LibraryReference,
            3 => CellType::MerkleProof,
            4 => CellType::MerkleUpdate,
            0xff => CellType::Ordinary,
            _ => fail!("unknown cell type {}", num)
        };
        Ok(typ)
    }
}

impl From<CellType> for u8 {
    fn from(ct: CellType) -> u8 {
        match ct {
            CellType::Ordinary => 0xff,
            CellType::PrunedBranch => 1,
            CellType::LibraryReference => 2,
            CellType::MerkleProof => 3,
            CellType::MerkleUpdate => 4,
        }
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match *self {
            CellType::Ordinary => "Ordinary",
            CellType::PrunedBranch => "Pruned branch",
            CellType::LibraryReference => "Library reference",
            CellType::MerkleProof => "Merkle proof",
            CellType::MerkleUpdate => "Merkle update",
        };
        f.write_str(msg)
    }
}

/// Which merkle levels a cell is significant at. The mask's bit `i - 1`
/// answers it for level `i`; level 0 is significant for every cell.
#[derive(Debug, Default, Eq, PartialEq, Clone, Copy, Hash)]
pub struct LevelMask(u8);

impl LevelMask {
    pub fn is_valid(mask: u8) -> bool {
        mask <= MAX_LEVEL_MASK
    }

    pub fn with_mask(mask: u8) -> Self {
        if Self::is_valid(mask) {
            LevelMask(mask)
        } else {
            log::error!("invalid level mask {:#04x} {}:{}", mask, file!(), line!());
            LevelMask(0)
        }
    }

    pub fn for_merkle_cell(children_mask: LevelMask) -> Self {
        LevelMask(children_mask.0 >> 1)
    }

    pub fn mask(&self) -> u8 {
        self.0
    }

    /// Highest set bit position, i.e. the cell's level.
    pub fn level(&self) -> u8 {
        (8 - self.0.leading_zeros()) as u8
    }

    /// Index of the mask's hash in the computed hash row.
    pub fn hash_index(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn hashes_count(&self) -> usize {
        self.hash_index() + 1
    }

    /// Keeps the bits responsible for levels below `level`.
    pub fn apply(&self, level: usize) -> LevelMask {
        if level >= MAX_LEVEL {
            *self
        } else {
            LevelMask(self.0 & ((1 << level) - 1))
        }
    }

    pub fn is_significant(&self, level: usize) -> bool {
        level == 0 || (self.0 >> (level - 1)) & 1 != 0
    }
}

impl BitOr for LevelMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        LevelMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for LevelMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl Display for LevelMask {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:03b}", self.0)
    }
}

// Serialized cell layout:
// [D1] [D2] [data: 0..128 bytes] [4 * refs]
// first byte is so called description byte 1:
// | level mask| store hashes| exotic| refs count|
// |      7 6 5|            4|      3|      2 1 0|
pub(crate) const LEVELMASK_D1_OFFSET: usize = 5;
pub(crate) const HASHES_D1_FLAG: u8 = 16;
pub(crate) const EXOTIC_D1_FLAG: u8 = 8;
pub(crate) const REFS_D1_MASK: u8 = 7;
// description byte 2 holds ceil(bit_len / 8) + floor(bit_len / 8), so its
// low bit doubles as the "data is tag-augmented" flag

#[inline(always)]
pub(crate) fn calc_d1(level_mask: LevelMask, cell_type: CellType, refs_count: usize) -> u8 {
    (level_mask.mask() << LEVELMASK_D1_OFFSET) |
    (cell_type.is_exotic() as u8 * EXOTIC_D1_FLAG) |
    refs_count as u8
}

#[inline(always)]
pub(crate) fn calc_d2(data_bit_len: usize) -> u8 {
    ((data_bit_len / 8) << 1) as u8 + (data_bit_len % 8 != 0) as u8
}

fn validate_ordinary(bit_length: usize, refs_count: usize) -> Status {
    if bit_length > MAX_DATA_BITS {
        fail!("Ordinary cell can't have more than {} bits, got {}", MAX_DATA_BITS, bit_length)
    }
    if refs_count > MAX_REFERENCES_COUNT {
        fail!("Ordinary cell can't have more than {} refs, got {}", MAX_REFERENCES_COUNT, refs_count)
    }
    Ok(())
}

fn validate_pruned_branch(data: &[u8], bit_length: usize, refs_count: usize) -> Status {
    let min_size = 8 + 8 + SHA256_SIZE * 8 + DEPTH_SIZE * 8;
    if bit_length < min_size {
        fail!("Pruned Branch cell can't have less than (8 + 8 + 256 + 16) bits, got {}", bit_length)
    }
    if refs_count != 0 {
        fail!("Pruned Branch cell can't have refs, got {}", refs_count)
    }
    if data[0] as i8 != 1 {
        fail!("Pruned Branch cell type must be exactly 1, got {}", data[0] as i8)
    }
    let mask_byte = data[1];
    let level = 8 - mask_byte.leading_zeros() as usize;
    if !(1..=MAX_LEVEL).contains(&level) {
        fail!("Pruned Branch cell level must be >= 1 and <= 3, got {}", level)
    }
    let stored_count = LevelMask::with_mask(mask_byte).apply(level - 1).hashes_count();
    let size = 8 + 8 + stored_count * (SHA256_SIZE * 8 + DEPTH_SIZE * 8);
    if bit_length != size {
        fail!("Pruned Branch cell with level {} must have exactly {} bits, got {}", level, size, bit_length)
    }
    Ok(())
}

fn validate_library_reference(data: &[u8], bit_length: usize, refs_count: usize) -> Status {
    if bit_length != 8 + SHA256_SIZE * 8 {
        fail!("Library Reference cell must have exactly (8 + 256) bits, got {}", bit_length)
    }
    if refs_count != 0 {
        fail!("Library Reference cell can't have refs, got {}", refs_count)
    }
    if data[0] as i8 != 2 {
        fail!("Library Reference cell type must be exactly 2, got {}", data[0] as i8)
    }
    Ok(())
}

fn validate_merkle_proof(data: &[u8], bit_length: usize, references: &[Cell]) -> Status {
    if bit_length != 8 + (SHA256_SIZE + DEPTH_SIZE) * 8 {
        fail!("Merkle Proof cell must have exactly (8 + 256 + 16) bits, got {}", bit_length)
    }
    if references.len() != 1 {
        fail!("Merkle Proof cell must have exactly 1 ref, got {}", references.len())
    }
    if data[0] as i8 != 3 {
        fail!("Merkle Proof cell type must be exactly 3, got {}", data[0] as i8)
    }
    let proof_hash = UInt256::from_be_bytes(&data[1..1 + SHA256_SIZE]);
    let proof_depth = u16::from_be_bytes([data[1 + SHA256_SIZE], data[2 + SHA256_SIZE]]);
    let ref_hash = references[0].hash(0);
    let ref_depth = references[0].depth(0);
    if proof_hash != ref_hash {
        fail!("Merkle Proof cell ref hash must be exactly {:x}, got {:x}", proof_hash, ref_hash)
    }
    if proof_depth != ref_depth {
        fail!("Merkle Proof cell ref depth must be exactly {}, got {}", proof_depth, ref_depth)
    }
    Ok(())
}

fn validate_merkle_update(data: &[u8], bit_length: usize, references: &[Cell]) -> Status {
    if bit_length != 8 + 2 * (SHA256_SIZE + DEPTH_SIZE) * 8 {
        fail!("Merkle Update cell must have exactly (8 + (2 * (256 + 16))) bits, got {}", bit_length)
    }
    if references.len() != 2 {
        fail!("Merkle Update cell must have exactly 2 refs, got {}", references.len())
    }
    if data[0] as i8 != 4 {
        fail!("Merkle Update cell type must be exactly 4, got {}", data[0] as i8)
    }
    for (i, reference) in references.iter().enumerate() {
        let offset = 1 + i * SHA256_SIZE;
        let proof_hash = UInt256::from_be_bytes(&data[offset..offset + SHA256_SIZE]);
        let offset = 1 + 2 * SHA256_SIZE + i * DEPTH_SIZE;
        let proof_depth = u16::from_be_bytes([data[offset], data[offset + 1]]);
        let ref_hash = reference.hash(0);
        let ref_depth = reference.depth(0);
        if proof_hash != ref_hash {
            fail!("Merkle Update cell ref #{} hash must be exactly {:x}, got {:x}", i, proof_hash, ref_hash)
        }
        if proof_depth != ref_depth {
            fail!("Merkle Update cell ref #{} depth must be exactly {}, got {}", i, proof_depth, ref_depth)
        }
    }
    Ok(())
}

/// Finalized immutable cell. Constructed through `BuilderData` or the BOC
/// reader; hashes and depths for all significant levels are computed once
/// here and never change.
#[derive(Clone, Debug)]
pub struct DataCell {
    cell_type: CellType,
    data: SmallVec<[u8; 128]>,
    bit_length: usize,
    references: Vec<Cell>,
    level_mask: LevelMask,
    hashes_depths: Vec<(UInt256, u16)>,
}

impl Default for DataCell {
    fn default() -> Self {
        Self::new()
    }
}

impl DataCell {
    pub fn new() -> Self {
        Self::with_params(CellType::Ordinary, SmallVec::new(), 0, vec![]).unwrap()
    }

    pub fn with_params(
        cell_type: CellType,
        data: SmallVec<[u8; 128]>, // payload without completion tag
        bit_length: usize,
        references: Vec<Cell>,
    ) -> Result<DataCell> {
        if bit_length > data.len() * 8 {
            fail!(ExceptionCode::FatalError)
        }
        match cell_type {
            CellType::Ordinary => validate_ordinary(bit_length, references.len())?,
            CellType::PrunedBranch => validate_pruned_branch(&data, bit_length, references.len())?,
            CellType::LibraryReference => validate_library_reference(&data, bit_length, references.len())?,
            CellType::MerkleProof => validate_merkle_proof(&data, bit_length, &references)?,
            CellType::MerkleUpdate => validate_merkle_update(&data, bit_length, &references)?,
        }
        let level_mask = match cell_type {
            CellType::Ordinary => references.iter()
                .fold(LevelMask::with_mask(0), |mask, child| mask | child.level_mask()),
            CellType::PrunedBranch => LevelMask::with_mask(data[1]),
            CellType::LibraryReference => LevelMask::with_mask(0),
            CellType::MerkleProof => LevelMask::for_merkle_cell(references[0].level_mask()),
            CellType::MerkleUpdate => LevelMask::for_merkle_cell(
                references[0].level_mask() | references[1].level_mask()
            ),
        };
        let mut cell = DataCell {
            cell_type,
            data,
            bit_length,
            references,
            level_mask,
            hashes_depths: Vec::with_capacity(level_mask.hashes_count()),
        };
        cell.finalize()?;
        Ok(cell)
    }

    // Hashes are calculated from the smallest significant level up. Each
    // computed level hashes the previous level's hash instead of the data,
    // and a pruned branch computes only its top (representation) level.
    fn finalize(&mut self) -> Result<()> {
        let is_merkle = self.cell_type.is_merkle();
        let is_pruned = self.cell_type == CellType::PrunedBranch;
        let hash_index_offset = if is_pruned {
            self.level_mask.hashes_count() - 1
        } else {
            0
        };
        let mut hash_index = 0;
        for level_index in 0..=self.level_mask.level() as usize {
            if !self.level_mask.is_significant(level_index) {
                continue
            }
            if hash_index < hash_index_offset {
                hash_index += 1;
                continue
            }
            if (hash_index == hash_index_offset && level_index != 0 && !is_pruned) ||
                (hash_index != hash_index_offset && level_index == 0 && is_pruned)
            {
                fail!("Can't deserialize cell")
            }
            let data_len = (self.bit_length + 7) / 8;
            let mut representation = Vec::with_capacity(
                2 + max(data_len + 1, SHA256_SIZE) +
                self.references.len() * (DEPTH_SIZE + SHA256_SIZE)
            );
            representation.push(calc_d1(
                self.level_mask.apply(level_index),
                self.cell_type,
                self.references.len()
            ));
            representation.push(calc_d2(self.bit_length));
            if hash_index == hash_index_offset {
                representation.extend_from_slice(&append_tag(&self.data, self.bit_length));
            } else {
                let (previous_hash, _) = &self.hashes_depths[hash_index - hash_index_offset - 1];
                representation.extend_from_slice(previous_hash.as_slice());
            }
            let ref_level = level_index + is_merkle as usize;
            let mut max_child_depth = 0;
            for reference in &self.references {
                let child_depth = reference.depth(ref_level);
                representation.extend_from_slice(&child_depth.to_be_bytes());
                max_child_depth = max(max_child_depth, child_depth);
            }
            for reference in &self.references {
                representation.extend_from_slice(reference.hash(ref_level).as_slice());
            }
            if !self.references.is_empty() && max_child_depth >= MAX_DEPTH {
                fail!("Cell depth can't be more than 1024")
            }
            let depth = max_child_depth + !self.references.is_empty() as u16;
            self.hashes_depths.push((UInt256::from(sha256_digest(&representation)), depth));
            hash_index += 1;
        }
        Ok(())
    }

    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn bit_length(&self) -> usize {
        self.bit_length
    }

    pub fn level_mask(&self) -> LevelMask {
        self.level_mask
    }

    pub fn level(&self) -> u8 {
        self.level_mask.level()
    }

    pub fn references_count(&self) -> usize {
        self.references.len()
    }

    pub fn reference(&self, index: usize) -> Result<Cell> {
        self.references.get(index).cloned().ok_or_else(|| error!(ExceptionCode::CellUnderflow))
    }

    pub fn hash(&self, index: usize) -> UInt256 {
        let hash_index = self.level_mask.apply(min(index, MAX_LEVEL)).hash_index();
        if self.cell_type == CellType::PrunedBranch {
            // pruned cell stores all hashes except the representation in data
            let stored_count = self.level_mask.hash_index();
            if hash_index != stored_count {
                let offset = 2 + hash_index * SHA256_SIZE;
                return UInt256::from_be_bytes(&self.data[offset..offset + SHA256_SIZE])
            }
            return self.hashes_depths[0].0
        }
        self.hashes_depths[hash_index].0
    }

    pub fn depth(&self, index: usize) -> u16 {
        let hash_index = self.level_mask.apply(min(index, MAX_LEVEL)).hash_index();
        if self.cell_type == CellType::PrunedBranch {
            let stored_count = self.level_mask.hash_index();
            if hash_index != stored_count {
                let offset = 2 + stored_count * SHA256_SIZE + hash_index * DEPTH_SIZE;
                return u16::from_be_bytes([self.data[offset], self.data[offset + 1]])
            }
            return self.hashes_depths[0].1
        }
        self.hashes_depths[hash_index].1
    }
}

/// Shared handle over a finalized cell. Cloning is cheap, equality and
/// hashing go by the representation hash.
pub struct Cell(Arc<DataCell>);

lazy_static::lazy_static!{
    pub(crate) static ref CELL_DEFAULT: Cell = Cell(Arc::new(DataCell::new()));
}

impl Clone for Cell {
    fn clone(&self) -> Self {
        Cell(self.0.clone())
    }
}

impl From<DataCell> for Cell {
    fn from(cell: DataCell) -> Self {
        Cell(Arc::new(cell))
    }
}

impl Cell {
    pub fn cell_type(&self) -> CellType {
        self.0.cell_type()
    }

    pub fn data(&self) -> &[u8] {
        self.0.data()
    }

    pub fn bit_length(&self) -> usize {
        self.0.bit_length()
    }

    pub fn level(&self) -> u8 {
        self.0.level()
    }

    pub fn level_mask(&self) -> LevelMask {
        self.0.level_mask()
    }

    pub fn references_count(&self) -> usize {
        self.0.references_count()
    }

    pub fn reference(&self, index: usize) -> Result<Cell> {
        self.0.reference(index)
    }

    pub fn clone_references(&self) -> Vec<Cell> {
        let count = self.0.references_count();
        let mut refs = Vec::with_capacity(count);
        for i in 0..count {
            if let Ok(reference) = self.0.reference(i) {
                refs.push(reference)
            }
        }
        refs
    }

    pub fn is_exotic(&self) -> bool {
        self.cell_type().is_exotic()
    }

    pub fn is_merkle(&self) -> bool {
        self.cell_type().is_merkle()
    }

    pub fn is_pruned(&self) -> bool {
        self.cell_type() == CellType::PrunedBranch
    }

    /// Returns cell's higher hash for given index (last one - representation hash)
    pub fn hash(&self, index: usize) -> UInt256 {
        self.0.hash(index)
    }

    /// Returns cell's depth for given index
    pub fn depth(&self, index: usize) -> u16 {
        self.0.depth(index)
    }

    /// Returns cell's hashes (representation and highers)
    pub fn hashes(&self) -> Vec<UInt256> {
        (0..=MAX_LEVEL)
            .filter(|index| self.level_mask().is_significant(*index))
            .map(|index| self.hash(index))
            .collect()
    }

    /// Returns cell's depths (for current state and each level)
    pub fn depths(&self) -> Vec<u16> {
        (0..=MAX_LEVEL)
            .filter(|index| self.level_mask().is_significant(*index))
            .map(|index| self.depth(index))
            .collect()
    }

    pub fn repr_hash(&self) -> UInt256 {
        self.0.hash(MAX_LEVEL)
    }

    pub fn repr_depth(&self) -> u16 {
        self.0.depth(MAX_LEVEL)
    }

    /// Opens a read cursor over the cell's content.
    pub fn parse(&self) -> Result<SliceData> {
        SliceData::load_cell(self.clone())
    }

    pub fn to_hex_string(&self, lower: bool) -> String {
        to_hex_string(self.data(), self.bit_length(), lower)
    }
}

impl Default for Cell {
    fn default() -> Self {
        CELL_DEFAULT.clone()
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Cell) -> bool {
        self.repr_hash() == other.repr_hash()
    }
}

impl PartialEq<UInt256> for Cell {
    fn eq(&self, other_hash: &UInt256) -> bool {
        &self.repr_hash() == other_hash
    }
}

impl Eq for Cell {}

impl Hash for Cell {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.repr_hash().as_slice().hash(state)
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:x}", self.repr_hash())
    }
}

impl fmt::Display for Cell {
    /// Prints the whole tree in fift style, one `x{..}` line per cell,
    /// children indented under their parent.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut stack = vec![(self.clone(), 0)];
        let mut first_line = true;
        while let Some((cell, indent)) = stack.pop() {
            if !first_line {
                writeln!(f)?;
            }
            first_line = false;
            write!(f, "{:indent$}x{{{}}}", "", cell.to_hex_string(false), indent = indent)?;
            for i in (0..cell.references_count()).rev() {
                if let Ok(child) = cell.reference(i) {
                    stack.push((child, indent + 1));
                }
            }
        }
        Ok(())
    }
}

impl fmt::LowerHex for Cell {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_hex_string(true))
    }
}

impl fmt::UpperHex for Cell {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_hex_string(false))
    }
}

impl fmt::Binary for Cell {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let bit_length = self.bit_length();
        let data = self.data();
        for index in 0..bit_length {
            let bit = (data[index / 8] >> (7 - index % 8)) & 1;
            write!(f, "{}", bit)?;
        }
        Ok(())
    }
}

mod slice;

pub use self::slice::*;

pub mod builder;

pub use self::builder::*;

#[cfg(test)]
#[path = "tests/test_cell.rs"]
mod tests;
