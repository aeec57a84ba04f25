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


use std::collections::{HashMap, VecDeque};
use std::io::{Cursor, Read, Write};

use crc::{Crc, Digest, CRC_32_ISCSI};
use smallvec::SmallVec;

use crate::bits::{append_tag, find_tag, from_hex_string};
use crate::cell::{
    self, BuilderData, Cell, CellType, DataCell, LevelMask,
    DEPTH_SIZE, MAX_DATA_BYTES, MAX_REFERENCES_COUNT, SHA256_SIZE,
};
use crate::types::{ByteOrderRead, Result, Status, UInt256};
use crate::{error, fail};

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

const BOC_INDEXED_TAG: u32 = 0x68ff65f3; // deprecated, is used only for read
const BOC_INDEXED_CRC32_TAG: u32 = 0xacc3a728; // deprecated, is used only for read
const BOC_GENERIC_TAG: u32 = 0xb5ee9c72;

const MAX_ROOTS_COUNT: usize = 1024;

/// Order in which the writer walks the forest before emitting it.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TraverseOrder {
    #[default]
    BreadthFirst,
    DepthFirst,
}

#[derive(Debug)]
pub struct BocWriter {
    cells: Vec<Cell>,
    indexes: HashMap<UInt256, usize>,
    roots_indexes: Vec<usize>,
    data_size: usize,
    references: usize,
}

pub fn write_boc(root_cell: &Cell) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    BocWriter::with_root(root_cell)?.write(&mut buf)?;
    Ok(buf)
}

pub fn read_boc(data: impl AsRef<[u8]>) -> Result<Vec<Cell>> {
    Ok(BocReader::new().read(data.as_ref())?.roots)
}

pub fn read_single_root_boc(data: impl AsRef<[u8]>) -> Result<Cell> {
    BocReader::new().read(data.as_ref())?.withdraw_single_root()
}

impl BocWriter {

    pub fn with_root(root_cell: &Cell) -> Result<Self> {
        Self::with_roots([root_cell.clone()])
    }

    pub fn with_roots(root_cells: impl IntoIterator<Item = Cell>) -> Result<Self> {
        Self::with_traverse_order(root_cells, TraverseOrder::BreadthFirst)
    }

    pub fn with_traverse_order(
        root_cells: impl IntoIterator<Item = Cell>,
        order: TraverseOrder
    ) -> Result<Self> {
        let roots: Vec<Cell> = root_cells.into_iter().collect();
        if roots.is_empty() {
            fail!("roots must not be empty")
        }
        if roots.len() > MAX_ROOTS_COUNT {
            fail!("too many roots")
        }
        let mut roots_set = std::collections::HashSet::new();
        for root in &roots {
            if !roots_set.insert(root.repr_hash()) {
                fail!("roots must be all unique")
            }
        }

        let (cells, indexes) = match order {
            TraverseOrder::BreadthFirst => breadth_first_order(&roots)?,
            TraverseOrder::DepthFirst => depth_first_order(&roots)?,
        };

        let mut roots_indexes = Vec::with_capacity(roots.len());
        for root in &roots {
            let index = indexes.get(&root.repr_hash())
                .ok_or_else(|| error!("Can't find root cell with hash {:x}", root.repr_hash()))?;
            roots_indexes.push(*index);
        }

        let mut data_size = 0;
        let mut references = 0;
        for cell in &cells {
            data_size += 2 + (cell.bit_length() + 7) / 8;
            references += cell.references_count();
        }

        Ok(BocWriter {
            cells,
            indexes,
            roots_indexes,
            data_size,
            references,
        })
    }

    pub fn roots_count(&self) -> usize {
        self.roots_indexes.len()
    }

    pub fn cells_count(&self) -> usize {
        self.cells.len()
    }

    pub fn data_size(&self) -> usize {
        self.data_size
    }

    pub fn references_count(&self) -> usize {
        self.references
    }

    pub fn write<T: Write>(self, dest: &mut T) -> Status {
        self.write_ex(dest, false, true, None, None)
    }

    pub fn write_ex<T: Write>(
        self,
        dest: &mut T,
        include_index: bool,
        include_crc: bool,
        custom_ref_size: Option<usize>,
        custom_offset_size: Option<usize>,
    ) -> Status {
        if include_crc {
            let mut dest_wrapped = IoCrcFilter::new_writer(dest);
            self.write_ex_impl(&mut dest_wrapped, include_index, include_crc, custom_ref_size, custom_offset_size)?;
            dest_wrapped.finalize()
        } else {
            self.write_ex_impl(dest, include_index, include_crc, custom_ref_size, custom_offset_size)
        }
    }

    fn write_ex_impl<T: Write>(
        &self,
        dest: &mut T,
        include_index: bool,
        include_crc: bool,
        custom_ref_size: Option<usize>,
        custom_offset_size: Option<usize>,
    ) -> Status {
        let bytes_total_cells = Self::number_of_bytes_to_fit(self.cells_count());
        let ref_size = custom_ref_size.map_or(bytes_total_cells, |crs| {
            debug_assert!(crs >= bytes_total_cells);
            std::cmp::max(crs, bytes_total_cells)
        });
        let total_cells_size = self.data_size + self.references * ref_size;
        let bytes_total_size = Self::number_of_bytes_to_fit(total_cells_size);
        let offset_size = custom_offset_size.map_or(bytes_total_size, |cos| {
            debug_assert!(cos >= bytes_total_size);
            std::cmp::max(cos, bytes_total_size)
        });

        debug_assert!(ref_size <= 4);
        debug_assert!(offset_size <= 8);

        // Header

        dest.write_all(&BOC_GENERIC_TAG.to_be_bytes())?;

        // has index | has CRC | has cache bits | flags   | ref_size
        // 7         | 6       | 5              | 4 3     | 2 1 0
        dest.write_all(&[(include_index as u8) << 7 | (include_crc as u8) << 6 | ref_size as u8])?;

        dest.write_all(&[offset_size as u8])?; // off_bytes:(## 8) { off_bytes <= 8 }
        dest.write_all(&(self.cells_count() as u64).to_be_bytes()[(8 - ref_size)..8])?;
        dest.write_all(&(self.roots_count() as u64).to_be_bytes()[(8 - ref_size)..8])?;
        dest.write_all(&0_u64.to_be_bytes()[(8 - ref_size)..8])?;
        dest.write_all(&(total_cells_size as u64).to_be_bytes()[(8 - offset_size)..8])?;

        // Root's indexes
        for index in &self.roots_indexes {
            dest.write_all(&(*index as u64).to_be_bytes()[(8 - ref_size)..8])?;
        }

        // Index
        if include_index {
            let mut total_size = 0;
            for cell in &self.cells {
                total_size += 2 + (cell.bit_length() + 7) / 8 + cell.references_count() * ref_size;
                dest.write_all(&(total_size as u64).to_be_bytes()[(8 - offset_size)..8])?;
            }
        }

        // Cells
        for (cell_index, cell) in self.cells.iter().enumerate() {
            let d1 = cell::calc_d1(cell.level_mask(), cell.cell_type(), cell.references_count());
            let d2 = cell::calc_d2(cell.bit_length());
            dest.write_all(&[d1, d2])?;
            dest.write_all(&append_tag(cell.data(), cell.bit_length()))?;
            for i in 0..cell.references_count() {
                let child_hash = cell.reference(i)?.repr_hash();
                let child_index = *self.indexes.get(&child_hash)
                    .ok_or_else(|| error!("Can't find cell with hash {:x}", child_hash))?;
                debug_assert!(child_index > cell_index);
                dest.write_all(&(child_index as u64).to_be_bytes()[(8 - ref_size)..8])?;
            }
        }

        Ok(())
    }

    fn number_of_bytes_to_fit(l: usize) -> usize {
        let mut n = 0;
        let mut l1 = l;

        while l1 != 0 {
            l1 >>= 8;
            n += 1;
        }

        std::cmp::max(n, 1)
    }
}

// Re-seen cells move to the back of the list and their subtrees are walked
// again, so every reference index stays strictly greater than the index of
// the referencing cell.
fn enqueue_cell(
    slots: &mut Vec<Option<Cell>>,
    indexes: &mut HashMap<UInt256, usize>,
    cell: &Cell
) {
    let hash = cell.repr_hash();
    let entry = match indexes.get(&hash) {
        Some(&at) => slots[at].take(),
        None => None,
    };
    slots.push(Some(entry.unwrap_or_else(|| cell.clone())));
    indexes.insert(hash, slots.len() - 1);
}

fn seed_roots(roots: &[Cell]) -> (Vec<Option<Cell>>, HashMap<UInt256, usize>) {
    let mut slots = Vec::with_capacity(roots.len());
    let mut indexes = HashMap::with_capacity(roots.len());
    for (index, root) in roots.iter().enumerate() {
        slots.push(Some(root.clone()));
        indexes.insert(root.repr_hash(), index);
    }
    (slots, indexes)
}

fn compact_order(slots: Vec<Option<Cell>>) -> (Vec<Cell>, HashMap<UInt256, usize>) {
    let mut cells = Vec::with_capacity(slots.len());
    let mut indexes = HashMap::with_capacity(slots.len());
    for cell in slots.into_iter().flatten() {
        indexes.insert(cell.repr_hash(), cells.len());
        cells.push(cell);
    }
    (cells, indexes)
}

fn breadth_first_order(roots: &[Cell]) -> Result<(Vec<Cell>, HashMap<UInt256, usize>)> {
    let (mut slots, mut indexes) = seed_roots(roots);
    let mut queue: VecDeque<Cell> = roots.iter().cloned().collect();
    while let Some(node) = queue.pop_front() {
        for i in 0..node.references_count() {
            let child = node.reference(i)?;
            enqueue_cell(&mut slots, &mut indexes, &child);
            queue.push_back(child);
        }
    }
    Ok(compact_order(slots))
}

fn depth_first_order(roots: &[Cell]) -> Result<(Vec<Cell>, HashMap<UInt256, usize>)> {
    let (mut slots, mut indexes) = seed_roots(roots);
    let mut stack: Vec<Cell> = roots.iter().rev().cloned().collect();
    while let Some(node) = stack.pop() {
        let mut children = Vec::with_capacity(node.references_count());
        for i in 0..node.references_count() {
            let child = node.reference(i)?;
            enqueue_cell(&mut slots, &mut indexes, &child);
            children.push(child);
        }
        // the leftmost subtree must end up on top of the stack
        while let Some(child) = children.pop() {
            stack.push(child);
        }
    }
    Ok(compact_order(slots))
}

struct RawCell {
    cell_type: CellType,
    data: SmallVec<[u8; 128]>,
    bit_length: usize,
    refs: SmallVec<[u32; 4]>,
}

#[derive(Debug)]
pub struct BocHeader {
    pub magic: u32,
    pub roots_count: usize,
    pub ref_size: usize,
    pub index_included: bool,
    pub cells_count: usize,
    pub offset_size: usize,
    pub has_crc: bool,
    pub has_cache_bits: bool,
    pub roots_indexes: Vec<u32>,
    pub tot_cells_size: usize,
}

pub struct BocReaderResult {
    pub roots: Vec<Cell>,
    pub header: BocHeader,
}

impl BocReaderResult {
    pub fn withdraw_single_root(mut self) -> Result<Cell> {
        match self.roots.len() {
            0 => fail!("Error parsing cells tree: empty root"),
            1 => Ok(self.roots.remove(0)),
            r => fail!("Error parsing cells tree: too many roots {}", r)
        }
    }
}

#[derive(Default)]
pub struct BocReader;

impl BocReader {
    pub fn new() -> Self {
        Self
    }

    pub fn read(&self, data: &[u8]) -> Result<BocReaderResult> {
        let mut src = Cursor::new(data);

        let header = Self::read_header(&mut src)?;
        let header_len = src.position();

        Self::precheck_cells_tree_len(&header, header_len, data.len() as u64)?;

        // Skip index
        if header.index_included {
            src.set_position(src.position() + (header.cells_count * header.offset_size) as u64);
        }

        // Read cells
        let cells_start = src.position();
        let mut indexed_cells = Vec::with_capacity(header.cells_count);
        for cell_index in 0..header.cells_count {
            indexed_cells.push(
                Self::read_raw_cell(&mut src, header.ref_size, cell_index, header.cells_count)?
            );
        }
        if src.position() - cells_start != header.tot_cells_size as u64 {
            fail!("actual data size disagrees with the size from header")
        }

        // Resolving references & constructing cells from leaves to roots
        let mut done_cells: Vec<Option<Cell>> = vec![None; header.cells_count];
        while let Some(raw_cell) = indexed_cells.pop() {
            let cell_index = indexed_cells.len();
            let mut references = Vec::with_capacity(raw_cell.refs.len());
            for ref_index in &raw_cell.refs {
                let child = done_cells[*ref_index as usize].clone()
                    .ok_or_else(|| error!("unresolved reference to cell {}", ref_index))?;
                references.push(child);
            }
            let cell = DataCell::with_params(
                raw_cell.cell_type,
                raw_cell.data,
                raw_cell.bit_length,
                references
            )?;
            done_cells[cell_index] = Some(Cell::from(cell));
        }

        let mut roots = Vec::with_capacity(header.roots_count);
        if header.magic == BOC_GENERIC_TAG {
            for index in &header.roots_indexes {
                let root = done_cells[*index as usize].clone()
                    .ok_or_else(|| error!("unresolved root cell {}", index))?;
                roots.push(root);
            }
        } else {
            let root = done_cells[0].clone()
                .ok_or_else(|| error!("unresolved root cell 0"))?;
            roots.push(root);
        }

        if header.has_crc {
            let mut hasher = CASTAGNOLI.digest();
            hasher.update(&data[..data.len() - 4]);
            let crc = hasher.finalize();
            let mut tail = Cursor::new(&data[data.len() - 4..]);
            let read_crc = tail.read_le_u32()?;
            if read_crc != crc {
                fail!("crc not the same, values: {}, {}", read_crc, crc)
            }
        }

        Ok(BocReaderResult { roots, header })
    }

    fn read_header(src: &mut Cursor<&[u8]>) -> Result<BocHeader> {
        let magic = src.read_be_u32()?;
        let first_byte = src.read_byte()?;
        let index_included;
        let mut has_crc = false;
        let mut has_cache_bits = false;
        let ref_size;

        match magic {
            BOC_INDEXED_TAG => {
                ref_size = first_byte as usize;
                index_included = true;
            },
            BOC_INDEXED_CRC32_TAG => {
                ref_size = first_byte as usize;
                index_included = true;
                has_crc = true;
            },
            BOC_GENERIC_TAG => {
                index_included = first_byte & 0b1000_0000 != 0;
                has_crc = first_byte & 0b0100_0000 != 0;
                has_cache_bits = first_byte & 0b0010_0000 != 0;
                let flags = (first_byte & 0b0001_1000) >> 3;
                if flags != 0 {
                    fail!("non-zero flags field is not supported")
                }
                ref_size = (first_byte & 0b0000_0111) as usize;
            },
            _ => fail!("unknown BOC_TAG: {}", magic)
        };

        if has_cache_bits && !index_included {
            fail!("invalid header")
        }

        if ref_size == 0 || ref_size > 4 {
            fail!("ref size has to be more than 0 and less or equal 4, actual value: {}", ref_size)
        }

        let offset_size = src.read_byte()? as usize;
        if offset_size == 0 || offset_size > 8 {
            fail!("offset size has to be less or equal 8, actual value: {}", offset_size)
        }

        let cells_count = src.read_be_uint(ref_size)? as usize; // cells:(##(size * 8))
        let roots_count = src.read_be_uint(ref_size)? as usize; // roots:(##(size * 8))
        let absent_count = src.read_be_uint(ref_size)? as usize; // absent:(##(size * 8)) { roots + absent <= cells }

        if cells_count == 0 {
            fail!("cell count is zero")
        }
        if roots_count == 0 {
            fail!("root cell count is zero")
        }
        if roots_count > MAX_ROOTS_COUNT {
            fail!("too many roots")
        }
        if (magic == BOC_INDEXED_TAG || magic == BOC_INDEXED_CRC32_TAG) && roots_count > 1 {
            fail!("roots count has to be less or equal 1 for TAG: {}, value: {}", magic, offset_size)
        }
        if roots_count + absent_count > cells_count {
            fail!("roots count + absent count has to be less or equal than cells count, roots: {}, \
                absent: {}, cells: {}", roots_count, absent_count, cells_count);
        }
        if absent_count != 0 {
            fail!("absent cells are not supported")
        }

        let tot_cells_size = src.read_be_uint(offset_size)? as usize; // tot_cells_size:(##(off_bytes * 8))

        let max_cell_size =
            2 + // descr bytes
            4 * (DEPTH_SIZE + SHA256_SIZE) + // stored hashes & depths
            MAX_DATA_BYTES +
            MAX_REFERENCES_COUNT * ref_size;
        let min_cell_size = 2; // descr bytes only
        // every cell except roots must be referenced at least once, hence the formula
        let tot_cells_size_minimal = cells_count * (min_cell_size + ref_size) - ref_size * roots_count;
        if tot_cells_size < tot_cells_size_minimal {
            fail!("tot_cells_size is too small with respect to cells_count");
        }
        if tot_cells_size > max_cell_size * cells_count {
            fail!("tot_cells_size is too big with respect to cells_count");
        }

        let roots_indexes = if magic == BOC_GENERIC_TAG {
            // root_list:(roots * ##(size * 8))
            let mut roots_indexes = Vec::with_capacity(roots_count);
            for _ in 0..roots_count {
                let index = src.read_be_uint(ref_size)? as u32;
                if index as usize >= cells_count {
                    fail!("Invalid root index {} (greater than cells count {})", index, cells_count);
                }
                roots_indexes.push(index);
            }
            roots_indexes
        } else {
            Vec::with_capacity(0)
        };

        Ok(BocHeader {
            magic,
            roots_count,
            ref_size,
            index_included,
            cells_count,
            offset_size,
            has_crc,
            has_cache_bits,
            roots_indexes,
            tot_cells_size,
        })
    }

    fn precheck_cells_tree_len(header: &BocHeader, header_len: u64, actual_len: u64) -> Status {
        let index_size = header.index_included as u64 * ((header.cells_count * header.offset_size) as u64);
        let len = header_len + index_size + header.tot_cells_size as u64 + header.has_crc as u64 * 4;
        if actual_len < len {
            fail!("Actual boc length {} is smaller than calculated one {}", actual_len, len);
        }
        if actual_len > len {
            fail!("Actual boc length {} is bigger than calculated one {}", actual_len, len);
        }
        Ok(())
    }

    fn read_raw_cell(
        src: &mut Cursor<&[u8]>,
        ref_size: usize,
        cell_index: usize,
        cells_count: usize,
    ) -> Result<RawCell> {
        let d1 = src.read_byte()?;
        let level_mask = d1 >> cell::LEVELMASK_D1_OFFSET;
        let has_hashes = d1 & cell::HASHES_D1_FLAG != 0;
        let is_exotic = d1 & cell::EXOTIC_D1_FLAG != 0;
        let refs_count = (d1 & cell::REFS_D1_MASK) as usize;

        if refs_count == 7 && has_hashes {
            fail!("absent cells are not supported")
        }
        if refs_count > MAX_REFERENCES_COUNT {
            fail!("refs count has to be less or equal 4, actual value: {}", refs_count)
        }

        let d2 = src.read_byte()?;
        let data_size = ((d2 >> 1) + (d2 & 1)) as usize;
        let tag_completed = d2 & 1 != 0;

        // stored hash blocks carry nothing the repr hash does not, skip them
        if has_hashes {
            let skip = (LevelMask::with_mask(level_mask).level() as usize + 1)
                * (SHA256_SIZE + DEPTH_SIZE);
            let mut buf = [0; (cell::MAX_LEVEL + 1) * (SHA256_SIZE + DEPTH_SIZE)];
            src.read_exact(&mut buf[..skip])?;
        }

        let mut data: SmallVec<[u8; 128]> = SmallVec::from_elem(0, data_size);
        src.read_exact(&mut data)?;

        let bit_length = if tag_completed {
            let bit_length = find_tag(&data)?;
            if bit_length % 8 != 0 {
                if let Some(last_byte) = data.last_mut() {
                    *last_byte &= 0xFF << (8 - bit_length % 8);
                }
            }
            bit_length
        } else {
            data_size * 8
        };

        let cell_type = if !is_exotic {
            CellType::Ordinary
        } else {
            if bit_length < 8 {
                fail!("not enough data for an exotic cell type")
            }
            let cell_type = CellType::try_from(data[0])?;
            if cell_type == CellType::Ordinary {
                fail!("exotic cell can't be of ordinary type")
            }
            cell_type
        };

        let mut refs: SmallVec<[u32; 4]> = SmallVec::with_capacity(refs_count);
        for _ in 0..refs_count {
            let i = src.read_be_uint(ref_size)? as usize;
            if i >= cells_count {
                fail!("reference out of range, cells_count: {}, ref: {}", cells_count, i)
            }
            if i <= cell_index {
                fail!("Topological order is broken")
            }
            refs.push(i as u32);
        }

        Ok(RawCell {
            cell_type,
            data,
            bit_length,
            refs,
        })
    }
}

/// Rebuilds a tree from the textual form the cell printer emits: one
/// `x{..}` per line, children indented deeper than their parent.
pub fn parse_fift_hex(data: &str) -> Result<Vec<Cell>> {
    let mut entries = Vec::new();
    for line in data.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue
        }
        let body = line.trim_start();
        let indent = line.len() - body.len();
        let content = body.strip_prefix("x{")
            .and_then(|rest| rest.strip_suffix('}'))
            .ok_or_else(|| error!("Can't deserialize, bad fift hex: {}", body))?;
        let (data, bit_length) = if content == "_" {
            (Vec::new(), 0)
        } else {
            from_hex_string(content)?
        };
        let builder = BuilderData::with_raw(SmallVec::from_vec(data), bit_length)?;
        entries.push((indent, builder));
    }
    if entries.is_empty() {
        fail!("Can't deserialize an empty fift hex")
    }

    let mut stack: Vec<(usize, BuilderData)> = Vec::new();
    let mut roots = Vec::new();
    for (indent, builder) in entries {
        fold_deeper_entries(&mut stack, &mut roots, indent)?;
        stack.push((indent, builder));
    }
    fold_deeper_entries(&mut stack, &mut roots, 0)?;
    for (_, root) in stack.drain(..) {
        roots.push(root.into_cell()?);
    }

    Ok(roots)
}

// Entries indented at least as deep as the incoming line are completed
// subtrees, attach them to their parents. Top-level entries stay put, they
// are roots of the forest.
fn fold_deeper_entries(
    stack: &mut Vec<(usize, BuilderData)>,
    roots: &mut Vec<Cell>,
    indent: usize
) -> Status {
    while let Some((top_indent, _)) = stack.last() {
        if *top_indent == 0 || *top_indent < indent {
            break
        }
        let (_, child) = stack.pop().ok_or_else(|| error!("fift parser stack underflow"))?;
        match stack.last_mut() {
            Some((_, parent)) => {
                parent.store_ref(child.into_cell()?)?;
            }
            None => roots.push(child.into_cell()?),
        }
    }
    Ok(())
}

/// Wraps a writer and computes CRC32-C of the data passing through
struct IoCrcFilter<'a, T> {
    io_object: &'a mut T,
    hasher: Digest<'a, u32>
}

impl<'a, T: Write> IoCrcFilter<'a, T> {
    pub fn new_writer(io_object: &'a mut T) -> Self {
        IoCrcFilter {
            io_object,
            hasher: CASTAGNOLI.digest()
        }
    }

    pub fn finalize(self) -> Status {
        let crc = self.hasher.finalize();
        self.io_object.write_all(&crc.to_le_bytes())?;
        Ok(())
    }
}

impl<'a, T> Write for IoCrcFilter<'a, T> where T: Write {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.hasher.update(buf);
        self.io_object.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.io_object.flush()
    }
}

#[cfg(test)]
#[path = "tests/test_boc.rs"]
mod tests;
