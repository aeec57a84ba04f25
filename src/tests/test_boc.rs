/*
* Copyright (C) 2019-2023 EverX. All Rights Reserved.
*
* Licensed under the SOFTWARE EVALUATION License (the "License"); you may not use
* this file except in compliance with the License.
*
* Unless required by applicable law or agreed to in writing, software
* distributed under the License is distributed on an "AS IS" BASIS,
* WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
* See the License for the specific EVERX DEV software governing permissions and
* limitations under the License.
*/

use smallvec::SmallVec;

use super::*;
use crate::bits::{base64_decode, base64_encode};
use crate::cell::{BuilderData, Cell};
use crate::types::Result;

fn u8_cell(value: u8) -> Result<Cell> {
    let mut builder = BuilderData::new();
    builder.store_uint(value as u64, 8)?;
    builder.into_cell()
}

fn single_ref_root() -> Result<Cell> {
    let mut child = BuilderData::new();
    child.store_uint(200, 30)?;
    let mut root = BuilderData::new();
    root.store_ref(child.into_cell()?)?;
    root.into_cell()
}

/*
         root
        /    \
       a      b
       |      |
       c      d
       |
       e
*/
fn build_tree() -> Result<Cell> {
    let mut c = BuilderData::new();
    c.store_uint(3, 8)?;
    c.store_ref(u8_cell(5)?)?; // e
    let mut a = BuilderData::new();
    a.store_uint(1, 8)?;
    a.store_ref(c.into_cell()?)?;
    let mut b = BuilderData::new();
    b.store_uint(2, 8)?;
    b.store_ref(u8_cell(4)?)?; // d
    let mut root = BuilderData::new();
    root.store_uint(0, 8)?;
    root.store_ref(a.into_cell()?)?;
    root.store_ref(b.into_cell()?)?;
    root.into_cell()
}

fn with_crc(body: &str) -> Result<Vec<u8>> {
    let mut bytes = hex::decode(body)?;
    let crc = CASTAGNOLI.checksum(&bytes);
    bytes.extend_from_slice(&crc.to_le_bytes());
    Ok(bytes)
}

fn expect_read_error(bytes: Vec<u8>, message: &str) {
    let error = match BocReader::new().read(&bytes) {
        Err(error) => error.to_string(),
        Ok(_) => panic!("expected \"{}\" on {}", message, hex::encode(&bytes)),
    };
    assert!(error.contains(message), "got \"{}\", expected \"{}\"", error, message);
}

#[test]
fn test_write_boc() -> Result<()> {
    let bytes = write_boc(&single_ref_root()?)?;
    assert_eq!(hex::encode(&bytes), "b5ee9c7241010201000900010001000700000322f68653e2");
    assert_eq!(base64_encode(&bytes), "te6cckEBAgEACQABAAEABwAAAyL2hlPi");

    // the trailer is CRC32-C of everything before it, little-endian
    let body_len = bytes.len() - 4;
    assert_eq!(bytes[body_len..], CASTAGNOLI.checksum(&bytes[..body_len]).to_le_bytes());
    Ok(())
}

#[test]
fn test_write_boc_with_coins() -> Result<()> {
    let mut child = BuilderData::new();
    child.store_uint(200, 30)?;
    child.store_coins(1_000_000)?;
    let mut root = BuilderData::new();
    root.store_ref(child.into_cell()?)?;

    let bytes = write_boc(&root.into_cell()?)?;
    assert_eq!(base64_encode(&bytes), "te6cckEBAgEADQABAAEADwAAAyDD0JAgExM09w==");
    Ok(())
}

#[test]
fn test_read_boc() -> Result<()> {
    let bytes = base64_decode("te6cckEBAgEACQABAAEABwAAAyL2hlPi")?;
    let result = BocReader::new().read(&bytes)?;
    assert_eq!(result.roots.len(), 1);

    let header = &result.header;
    assert_eq!(header.magic, BOC_GENERIC_TAG);
    assert_eq!(header.ref_size, 1);
    assert_eq!(header.offset_size, 1);
    assert_eq!(header.cells_count, 2);
    assert_eq!(header.roots_count, 1);
    assert_eq!(header.roots_indexes, [0]);
    assert_eq!(header.tot_cells_size, 9);
    assert!(header.has_crc);
    assert!(!header.index_included);
    assert!(!header.has_cache_bits);

    let root = result.withdraw_single_root()?;
    assert_eq!(
        root.repr_hash().to_hex_string(),
        "5e3573edda7aa9074e83eb706aec33f4ed9ccdd708a82ea92b8eafa947f0ee75"
    );
    assert_eq!(root.bit_length(), 0);
    assert_eq!(root.references_count(), 1);
    assert_eq!(root.reference(0)?.parse()?.load_uint(30)?, 200);
    Ok(())
}

#[test]
fn test_convenience_readers() -> Result<()> {
    let root = single_ref_root()?;
    let bytes = write_boc(&root)?;

    let roots = read_boc(&bytes)?;
    assert_eq!(roots, [root]);
    assert_eq!(read_single_root_boc(&bytes)?, roots[0]);
    Ok(())
}

#[test]
fn test_write_ex_variants() -> Result<()> {
    let root = single_ref_root()?;

    // bare body, neither index nor crc
    let mut bare = Vec::new();
    BocWriter::with_root(&root)?.write_ex(&mut bare, false, false, None, None)?;
    assert_eq!(hex::encode(&bare), "b5ee9c7201010201000900010001000700000322");
    let result = BocReader::new().read(&bare)?;
    assert!(!result.header.has_crc);
    assert!(!result.header.index_included);
    assert_eq!(result.withdraw_single_root()?, root);

    // cumulative index between the root list and the cells
    let mut indexed = Vec::new();
    BocWriter::with_root(&root)?.write_ex(&mut indexed, true, true, None, None)?;
    assert_eq!(indexed, with_crc("b5ee9c72c10102010009000309010001000700000322")?);
    let result = BocReader::new().read(&indexed)?;
    assert!(result.header.has_crc);
    assert!(result.header.index_included);
    assert_eq!(result.withdraw_single_root()?, root);
    Ok(())
}

#[test]
fn test_custom_sizes() -> Result<()> {
    let root = single_ref_root()?;

    let mut bytes = Vec::new();
    BocWriter::with_root(&root)?.write_ex(&mut bytes, false, true, Some(2), Some(4))?;
    assert_eq!(bytes, with_crc("b5ee9c7242040002000100000000000a000001000001000700000322")?);

    let result = BocReader::new().read(&bytes)?;
    assert_eq!(result.header.ref_size, 2);
    assert_eq!(result.header.offset_size, 4);
    assert_eq!(result.header.tot_cells_size, 10);
    assert_eq!(result.withdraw_single_root()?, root);
    Ok(())
}

#[test]
fn test_traverse_orders() -> Result<()> {
    let root = build_tree()?;

    // cells laid out level by level: 0, 1, 2, 3, 4, 5
    let mut bfs = Vec::new();
    BocWriter::with_traverse_order([root.clone()], TraverseOrder::BreadthFirst)?
        .write(&mut bfs)?;
    assert_eq!(
        bfs,
        with_crc("b5ee9c72410106010017000202000102010201030102020401020305000204000205")?
    );

    // left subtree completes before the right one: 0, 1, 2, 3, 5, 4
    let mut dfs = Vec::new();
    BocWriter::with_traverse_order([root.clone()], TraverseOrder::DepthFirst)?
        .write(&mut dfs)?;
    assert_eq!(
        dfs,
        with_crc("b5ee9c72410106010017000202000102010201030102020501020304000205000204")?
    );

    assert_eq!(read_single_root_boc(&bfs)?, root);
    assert_eq!(read_single_root_boc(&dfs)?, root);
    Ok(())
}

#[test]
fn test_writer_accessors() -> Result<()> {
    let writer = BocWriter::with_root(&build_tree()?)?;
    assert_eq!(writer.roots_count(), 1);
    assert_eq!(writer.cells_count(), 6);
    assert_eq!(writer.references_count(), 5);
    // two descriptor bytes plus one data byte per cell
    assert_eq!(writer.data_size(), 18);
    Ok(())
}

#[test]
fn test_shared_cells_dedup() -> Result<()> {
    let shared = u8_cell(42)?;
    let mut left = BuilderData::new();
    left.store_uint(1, 8)?;
    left.store_ref(shared.clone())?;
    let mut right = BuilderData::new();
    right.store_uint(2, 8)?;
    right.store_ref(shared)?;
    let mut root = BuilderData::new();
    root.store_ref(left.into_cell()?)?;
    root.store_ref(right.into_cell()?)?;
    let root = root.into_cell()?;

    let writer = BocWriter::with_root(&root)?;
    assert_eq!(writer.cells_count(), 4);

    let mut bytes = Vec::new();
    writer.write(&mut bytes)?;
    let read_back = read_single_root_boc(&bytes)?;
    assert_eq!(read_back, root);
    assert_eq!(
        read_back.reference(0)?.reference(0)?,
        read_back.reference(1)?.reference(0)?
    );
    Ok(())
}

#[test]
fn test_two_byte_ref_size_round_trip() -> Result<()> {
    let mut cell = u8_cell(0)?;
    for value in 1..300u64 {
        let mut builder = BuilderData::new();
        builder.store_uint(value, 16)?;
        builder.store_ref(cell)?;
        cell = builder.into_cell()?;
    }

    let writer = BocWriter::with_root(&cell)?;
    assert_eq!(writer.cells_count(), 300);
    let mut bytes = Vec::new();
    writer.write(&mut bytes)?;

    let result = BocReader::new().read(&bytes)?;
    assert_eq!(result.header.ref_size, 2);
    assert_eq!(result.header.cells_count, 300);
    assert_eq!(result.withdraw_single_root()?, cell);
    Ok(())
}

#[test]
fn test_max_bit_cell_round_trip() -> Result<()> {
    let mut builder = BuilderData::new();
    for _ in 0..1023 {
        builder.store_bit(true)?;
    }
    let cell = builder.into_cell()?;
    assert_eq!(cell.bit_length(), 1023);

    let bytes = write_boc(&cell)?;
    assert_eq!(read_single_root_boc(&bytes)?, cell);
    Ok(())
}

fn build_random_tree(depth: u16, max_depth: u16) -> Result<Cell> {
    let mut builder = BuilderData::new();
    builder.store_uint(rand::random::<u64>(), 64)?;
    if depth + 1 < max_depth {
        builder.store_ref(build_random_tree(depth + 1, max_depth)?)?;
        builder.store_ref(build_random_tree(depth + 1, max_depth)?)?;
    }
    builder.into_cell()
}

#[test]
fn test_random_tree_round_trip() -> Result<()> {
    let root = build_random_tree(0, 6)?;
    assert_eq!(read_single_root_boc(&write_boc(&root)?)?, root);

    let mut bytes = Vec::new();
    BocWriter::with_traverse_order([root.clone()], TraverseOrder::DepthFirst)?
        .write(&mut bytes)?;
    assert_eq!(read_single_root_boc(&bytes)?, root);
    Ok(())
}

#[test]
fn test_multiple_roots() -> Result<()> {
    let shared = u8_cell(42)?;
    let mut first = BuilderData::new();
    first.store_uint(1, 8)?;
    first.store_ref(shared.clone())?;
    let first = first.into_cell()?;
    let mut second = BuilderData::new();
    second.store_uint(2, 8)?;
    second.store_ref(shared)?;
    let second = second.into_cell()?;

    let writer = BocWriter::with_roots([first.clone(), second.clone()])?;
    assert_eq!(writer.roots_count(), 2);
    assert_eq!(writer.cells_count(), 3);

    let mut bytes = Vec::new();
    writer.write(&mut bytes)?;
    let roots = read_boc(&bytes)?;
    assert_eq!(roots, [first, second]);

    let error = read_single_root_boc(&bytes).unwrap_err();
    assert!(error.to_string().contains("too many roots"));
    Ok(())
}

#[test]
fn test_writer_root_validation() -> Result<()> {
    let error = BocWriter::with_roots(vec![]).unwrap_err();
    assert!(error.to_string().contains("roots must not be empty"));

    let cell = Cell::default();
    let error = BocWriter::with_roots([cell.clone(), cell]).unwrap_err();
    assert!(error.to_string().contains("roots must be all unique"));

    let mut roots = Vec::new();
    for value in 0..1025u64 {
        let mut builder = BuilderData::new();
        builder.store_uint(value, 16)?;
        roots.push(builder.into_cell()?);
    }
    let error = BocWriter::with_roots(roots).unwrap_err();
    assert!(error.to_string().contains("too many roots"));
    Ok(())
}

#[test]
fn test_number_of_bytes_to_fit() {
    assert_eq!(BocWriter::number_of_bytes_to_fit(0), 1);
    assert_eq!(BocWriter::number_of_bytes_to_fit(255), 1);
    assert_eq!(BocWriter::number_of_bytes_to_fit(256), 2);
    assert_eq!(BocWriter::number_of_bytes_to_fit(65535), 2);
    assert_eq!(BocWriter::number_of_bytes_to_fit(65536), 3);
    assert_eq!(BocWriter::number_of_bytes_to_fit(u32::MAX as usize), 4);
}

#[test]
fn test_crc_values() {
    // check values from RFC 3720 appendix B.4
    assert_eq!(CASTAGNOLI.checksum(b"123456789"), 0xe3069283);
    assert_eq!(CASTAGNOLI.checksum(&[0; 32]), 0x8a9136aa);
    assert_eq!(CASTAGNOLI.checksum(&[0xff; 32]), 0x62a8ab43);
}

#[test]
fn test_exotic_cells_round_trip() -> Result<()> {
    let subtree = single_ref_root()?;

    // level 1 stub for the subtree: type byte, mask byte, hash, depth
    let mut data = vec![1u8, 1];
    data.extend_from_slice(subtree.repr_hash().as_slice());
    data.extend_from_slice(&subtree.repr_depth().to_be_bytes());
    let pruned = Cell::from(DataCell::with_params(
        CellType::PrunedBranch,
        SmallVec::from_vec(data),
        288,
        vec![]
    )?);

    let mut data = vec![3u8];
    data.extend_from_slice(pruned.hash(0).as_slice());
    data.extend_from_slice(&pruned.depth(0).to_be_bytes());
    let proof = Cell::from(DataCell::with_params(
        CellType::MerkleProof,
        SmallVec::from_vec(data),
        280,
        vec![pruned]
    )?);

    let bytes = write_boc(&proof)?;
    let read_back = read_single_root_boc(&bytes)?;
    assert_eq!(read_back, proof);
    assert_eq!(read_back.cell_type(), CellType::MerkleProof);
    assert_eq!(read_back.reference(0)?.cell_type(), CellType::PrunedBranch);
    assert_eq!(read_back.reference(0)?.hash(0), subtree.repr_hash());
    Ok(())
}

#[test]
fn test_read_deprecated_indexed_boc() -> Result<()> {
    // a single empty cell behind the older indexed tag, one index entry
    let bytes = hex::decode("68ff65f3010101010002020000")?;
    let result = BocReader::new().read(&bytes)?;
    assert_eq!(result.header.magic, BOC_INDEXED_TAG);
    assert!(result.header.index_included);
    assert!(!result.header.has_crc);
    assert!(result.header.roots_indexes.is_empty());
    assert_eq!(result.withdraw_single_root()?, Cell::default());

    // same layout under the crc flavour of the tag
    let mut bytes = hex::decode("acc3a728010101010002020000")?;
    let crc = CASTAGNOLI.checksum(&bytes);
    bytes.extend_from_slice(&crc.to_le_bytes());
    let result = BocReader::new().read(&bytes)?;
    assert_eq!(result.header.magic, BOC_INDEXED_CRC32_TAG);
    assert!(result.header.has_crc);
    assert_eq!(result.withdraw_single_root()?, Cell::default());
    Ok(())
}

#[test]
fn test_read_boc_rejects_corrupted_data() -> Result<()> {
    let bytes = write_boc(&single_ref_root()?)?;

    // the pristine form parses
    BocReader::new().read(&bytes)?;

    let mut bad = bytes.clone();
    bad[0] ^= 0xff;
    expect_read_error(bad, "unknown BOC_TAG");

    expect_read_error(bytes[..bytes.len() - 5].to_vec(), "is smaller than calculated");

    let mut bad = bytes.clone();
    bad.push(0);
    expect_read_error(bad, "is bigger than calculated");

    let mut bad = bytes.clone();
    bad[4] |= 0b0001_1000;
    expect_read_error(bad, "non-zero flags field is not supported");

    // cache bits require an index
    let mut bad = bytes.clone();
    bad[4] |= 0b0010_0000;
    expect_read_error(bad, "invalid header");

    let mut bad = bytes.clone();
    bad[4] &= !0b0000_0111;
    expect_read_error(bad, "ref size has to be more than 0");

    let mut bad = bytes.clone();
    bad[5] = 0;
    expect_read_error(bad, "offset size has to be less or equal 8");

    let mut bad = bytes.clone();
    bad[6] = 0;
    expect_read_error(bad, "cell count is zero");

    let mut bad = bytes.clone();
    bad[7] = 0;
    expect_read_error(bad, "root cell count is zero");

    let mut bad = bytes.clone();
    bad[8] = 1;
    expect_read_error(bad, "absent cells are not supported");

    let mut bad = bytes.clone();
    bad[8] = 2;
    expect_read_error(bad, "roots count + absent count has to be less or equal");

    // two cells can not fit in four bytes
    let mut bad = bytes.clone();
    bad[9] = 4;
    expect_read_error(bad, "tot_cells_size is too small");

    let mut bad = bytes.clone();
    bad[10] = 5;
    expect_read_error(bad, "Invalid root index");

    let mut bad = bytes;
    let last = bad.len() - 1;
    bad[last] ^= 0xff;
    expect_read_error(bad, "crc not the same");
    Ok(())
}

#[test]
fn test_read_boc_rejects_broken_cells() {
    // root cell referencing itself
    expect_read_error(
        hex::decode("b5ee9c7201010201000900010000000700000322").unwrap(),
        "Topological order is broken"
    );
    // reference index past the cell count
    expect_read_error(
        hex::decode("b5ee9c7201010201000900010002000700000322").unwrap(),
        "reference out of range"
    );
    // second cell is a byte shorter than the declared total
    expect_read_error(
        hex::decode("b5ee9c7201010201000900010001000500002200").unwrap(),
        "actual data size disagrees with the size from header"
    );
    // five references in d1
    expect_read_error(
        hex::decode("b5ee9c72010101010002000500").unwrap(),
        "refs count has to be less or equal 4"
    );
    // absent cell marker, hash flag with seven references
    expect_read_error(
        hex::decode("b5ee9c72010101010002001700").unwrap(),
        "absent cells are not supported"
    );
    // exotic flag over an ordinary type byte
    expect_read_error(
        hex::decode("b5ee9c72010101010003000802ff").unwrap(),
        "exotic cell can't be of ordinary type"
    );
    // exotic flag with a single bit of data
    expect_read_error(
        hex::decode("b5ee9c72010101010003000801c0").unwrap(),
        "not enough data for an exotic cell type"
    );
}

#[test]
fn test_parse_fift_hex() -> Result<()> {
    let root = build_tree()?;
    let parsed = parse_fift_hex(&format!("{}", root))?;
    assert_eq!(parsed, [root]);

    // a forest, the second root carrying the only child
    let roots = parse_fift_hex("x{AA}\nx{BB}\n x{CC_}")?;
    assert_eq!(roots.len(), 2);
    assert_eq!(roots[0], u8_cell(0xaa)?);
    assert_eq!(roots[1].bit_length(), 8);
    assert_eq!(roots[1].references_count(), 1);
    assert_eq!(roots[1].reference(0)?.bit_length(), 5);

    let empty = parse_fift_hex("x{_}")?;
    assert_eq!(empty, [Cell::default()]);

    assert!(parse_fift_hex("").is_err());
    assert!(parse_fift_hex("y{00}").is_err());
    assert!(parse_fift_hex("x{0g}").is_err());
    Ok(())
}
