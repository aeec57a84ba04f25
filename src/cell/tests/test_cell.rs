/*
* Copyright (C) 2019-2022 EverX. All Rights Reserved.
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
use crate::types::Result;

fn uint_cell(value: u64, bits: usize) -> Result<Cell> {
    let mut builder = BuilderData::new();
    builder.store_uint(value, bits)?;
    builder.into_cell()
}

// level 1 stub for `cell`: type byte, mask byte, hash, depth
fn prune(cell: &Cell) -> Result<Cell> {
    let mut data = vec![1u8, 1];
    data.extend_from_slice(cell.repr_hash().as_slice());
    data.extend_from_slice(&cell.repr_depth().to_be_bytes());
    let pruned = DataCell::with_params(
        CellType::PrunedBranch,
        SmallVec::from_vec(data),
        288,
        vec![]
    )?;
    Ok(Cell::from(pruned))
}

fn merkle_proof(child: &Cell) -> Result<Cell> {
    let mut data = vec![3u8];
    data.extend_from_slice(child.hash(0).as_slice());
    data.extend_from_slice(&child.depth(0).to_be_bytes());
    let proof = DataCell::with_params(
        CellType::MerkleProof,
        SmallVec::from_vec(data),
        280,
        vec![child.clone()]
    )?;
    Ok(Cell::from(proof))
}

#[test]
fn test_cell_type_conversions() {
    assert_eq!(CellType::try_from(0xff).unwrap(), CellType::Ordinary);
    assert_eq!(CellType::try_from(1).unwrap(), CellType::PrunedBranch);
    assert_eq!(CellType::try_from(2).unwrap(), CellType::LibraryReference);
    assert_eq!(CellType::try_from(3).unwrap(), CellType::MerkleProof);
    assert_eq!(CellType::try_from(4).unwrap(), CellType::MerkleUpdate);
    assert!(CellType::try_from(0).is_err());
    assert!(CellType::try_from(5).is_err());
    assert!(CellType::try_from(0xfe).is_err());

    assert_eq!(u8::from(CellType::Ordinary), 0xff);
    assert_eq!(u8::from(CellType::PrunedBranch), 1);
    assert_eq!(u8::from(CellType::LibraryReference), 2);
    assert_eq!(u8::from(CellType::MerkleProof), 3);
    assert_eq!(u8::from(CellType::MerkleUpdate), 4);

    assert_eq!(format!("{}", CellType::Ordinary), "Ordinary");
    assert_eq!(format!("{}", CellType::PrunedBranch), "Pruned branch");
    assert_eq!(format!("{}", CellType::LibraryReference), "Library reference");
    assert_eq!(format!("{}", CellType::MerkleProof), "Merkle proof");
    assert_eq!(format!("{}", CellType::MerkleUpdate), "Merkle update");
}

#[test]
fn test_level_mask() {
    let table: [(u8, u8, usize); 8] = [
        (0b000, 0, 1),
        (0b001, 1, 2),
        (0b010, 2, 2),
        (0b011, 2, 3),
        (0b100, 3, 2),
        (0b101, 3, 3),
        (0b110, 3, 3),
        (0b111, 3, 4),
    ];
    for (mask, level, hashes_count) in table {
        let level_mask = LevelMask::with_mask(mask);
        assert_eq!(level_mask.mask(), mask);
        assert_eq!(level_mask.level(), level);
        assert_eq!(level_mask.hashes_count(), hashes_count);
        assert_eq!(level_mask.hash_index(), hashes_count - 1);
    }

    // out of range masks collapse to zero
    assert!(!LevelMask::is_valid(8));
    assert_eq!(LevelMask::with_mask(8).mask(), 0);

    assert_eq!(
        LevelMask::with_mask(0b001) | LevelMask::with_mask(0b010),
        LevelMask::with_mask(0b011)
    );
    assert_eq!(format!("{}", LevelMask::with_mask(0b101)), "101");
}

#[test]
fn test_level_mask_apply() {
    let mask = LevelMask::with_mask(0b101);
    assert_eq!(mask.apply(0), LevelMask::with_mask(0));
    assert_eq!(mask.apply(1), LevelMask::with_mask(0b001));
    assert_eq!(mask.apply(2), LevelMask::with_mask(0b001));
    assert_eq!(mask.apply(3), mask);

    assert!(mask.is_significant(0));
    assert!(mask.is_significant(1));
    assert!(!mask.is_significant(2));
    assert!(mask.is_significant(3));

    assert_eq!(LevelMask::for_merkle_cell(LevelMask::with_mask(0b001)).mask(), 0);
    assert_eq!(LevelMask::for_merkle_cell(LevelMask::with_mask(0b011)).mask(), 0b001);
    assert_eq!(LevelMask::for_merkle_cell(LevelMask::with_mask(0b111)).mask(), 0b011);
}

#[test]
fn test_descriptor_bytes() {
    assert_eq!(calc_d1(LevelMask::with_mask(0), CellType::Ordinary, 0), 0x00);
    assert_eq!(calc_d1(LevelMask::with_mask(0), CellType::Ordinary, 3), 0x03);
    assert_eq!(calc_d1(LevelMask::with_mask(1), CellType::PrunedBranch, 0), 0x28);
    assert_eq!(calc_d1(LevelMask::with_mask(0), CellType::MerkleProof, 1), 0x09);

    assert_eq!(calc_d2(0), 0);
    assert_eq!(calc_d2(8), 2);
    assert_eq!(calc_d2(30), 7);
    assert_eq!(calc_d2(1023), 255);
}

#[test]
fn test_format_cell() -> Result<()> {
    let mut c1 = BuilderData::new();
    c1.store_uint(0xfff1, 32)?;
    c1.store_ref(uint_cell(0xfff3, 32)?)?;
    c1.store_ref(uint_cell(0xfff4, 32)?)?;

    let mut root = BuilderData::new();
    root.store_uint(0xfff0, 32)?;
    root.store_ref(c1.into_cell()?)?;
    root.store_ref(uint_cell(0xfff2, 32)?)?;
    let cell = root.into_cell()?;

    assert_eq!(format!("{}", cell), r#"x{0000FFF0}
 x{0000FFF1}
  x{0000FFF3}
  x{0000FFF4}
 x{0000FFF2}"#);

    // non-aligned payloads carry the completion tag and a trailing underscore
    assert_eq!(format!("{}", uint_cell(200, 30)?), "x{00000322_}");

    let mut bit = BuilderData::new();
    bit.store_bit(true)?;
    assert_eq!(format!("{}", bit.into_cell()?), "x{C_}");

    assert_eq!(format!("{}", Cell::default()), "x{}");
    Ok(())
}

#[test]
fn test_hex_and_binary_format() -> Result<()> {
    let cell = uint_cell(0xabc, 12)?;
    assert_eq!(format!("{:x}", cell), "abc");
    assert_eq!(format!("{:X}", cell), "ABC");
    assert_eq!(format!("{:b}", cell), "101010111100");
    assert_eq!(cell.to_hex_string(true), "abc");
    assert_eq!(format!("{:?}", cell), format!("{:x}", cell.repr_hash()));
    Ok(())
}

#[test]
fn test_default_cell() -> Result<()> {
    let cell = Cell::default();
    assert_eq!(cell.bit_length(), 0);
    assert_eq!(cell.references_count(), 0);
    assert_eq!(cell.cell_type(), CellType::Ordinary);
    assert_eq!(cell.level(), 0);
    assert_eq!(cell.repr_depth(), 0);
    assert_eq!(cell.repr_hash(), UInt256::DEFAULT_CELL_HASH);
    assert_eq!(cell, BuilderData::new().into_cell()?);
    assert!(cell == UInt256::DEFAULT_CELL_HASH);
    Ok(())
}

#[test]
fn test_cell_equality() -> Result<()> {
    let a = uint_cell(77, 16)?;
    let b = uint_cell(77, 16)?;
    let c = uint_cell(78, 16)?;
    assert_eq!(a, b);
    assert_ne!(a, c);
    // same value, different width
    assert_ne!(a, uint_cell(77, 17)?);
    Ok(())
}

#[test]
fn test_cell_data_and_refs() -> Result<()> {
    let mut b = BuilderData::new();
    b.store_uint(0xdead, 16)?;
    b.store_ref(Cell::default())?;
    let cell = b.into_cell()?;

    assert_eq!(cell.data(), &[0xde, 0xad]);
    assert_eq!(cell.bit_length(), 16);
    assert_eq!(cell.references_count(), 1);
    assert_eq!(cell.reference(0)?, Cell::default());
    assert!(cell.reference(1).is_err());
    assert_eq!(cell.clone_references().len(), 1);
    assert_eq!(cell.repr_depth(), 1);

    let mut slice = cell.parse()?;
    assert_eq!(slice.load_uint(16)?, 0xdead);
    Ok(())
}

#[test]
fn test_ordinary_hashes_and_depths() -> Result<()> {
    let leaf = uint_cell(3, 8)?;
    assert_eq!(leaf.hashes(), vec![leaf.repr_hash()]);
    assert_eq!(leaf.depths(), vec![0]);
    assert_eq!(leaf.hash(0), leaf.repr_hash());
    assert_eq!(leaf.hash(3), leaf.repr_hash());

    let mut b = BuilderData::new();
    b.store_ref(leaf)?;
    let parent = b.into_cell()?;
    assert_eq!(parent.repr_depth(), 1);
    assert_eq!(parent.depths(), vec![1]);
    Ok(())
}

#[test]
fn test_with_params_consistency() {
    // declared bit length cannot exceed the data
    assert!(DataCell::with_params(
        CellType::Ordinary, SmallVec::from_slice(&[0u8]), 16, vec![]
    ).is_err());
    // ordinary cells cap at 1023 bits
    assert!(DataCell::with_params(
        CellType::Ordinary, SmallVec::from_elem(0, 128), 1024, vec![]
    ).is_err());
    assert!(DataCell::with_params(
        CellType::Ordinary, SmallVec::from_elem(0, 128), 1023, vec![]
    ).is_ok());
}

#[test]
fn test_pruned_branch() -> Result<()> {
    let hidden = uint_cell(42, 32)?;
    let cell = prune(&hidden)?;

    assert!(cell.is_exotic());
    assert!(cell.is_pruned());
    assert!(!cell.is_merkle());
    assert_eq!(cell.cell_type(), CellType::PrunedBranch);
    assert_eq!(cell.level(), 1);
    assert_eq!(cell.level_mask(), LevelMask::with_mask(1));
    assert_eq!(cell.hashes().len(), 2);

    // the hash and depth of the dropped subtree stay addressable
    assert_eq!(cell.hash(0), hidden.repr_hash());
    assert_eq!(cell.depth(0), hidden.repr_depth());
    assert_eq!(cell.hash(1), cell.repr_hash());
    assert_ne!(cell.repr_hash(), hidden.repr_hash());
    assert_eq!(cell.repr_depth(), 0);
    Ok(())
}

#[test]
fn test_pruned_branch_validation() -> Result<()> {
    let hidden = uint_cell(42, 32)?;
    let mut data = vec![1u8, 1];
    data.extend_from_slice(hidden.repr_hash().as_slice());
    data.extend_from_slice(&hidden.repr_depth().to_be_bytes());

    // refs are forbidden
    assert!(DataCell::with_params(
        CellType::PrunedBranch, SmallVec::from_vec(data.clone()), 288, vec![Cell::default()]
    ).is_err());
    // level 1 stub must be exactly 288 bits
    assert!(DataCell::with_params(
        CellType::PrunedBranch, SmallVec::from_vec(data.clone()), 280, vec![]
    ).is_err());
    // zero mask byte means level 0, which a stub cannot have
    let mut bad = data.clone();
    bad[1] = 0;
    assert!(DataCell::with_params(
        CellType::PrunedBranch, SmallVec::from_vec(bad), 288, vec![]
    ).is_err());
    // first data byte repeats the cell type
    let mut bad = data;
    bad[0] = 2;
    assert!(DataCell::with_params(
        CellType::PrunedBranch, SmallVec::from_vec(bad), 288, vec![]
    ).is_err());
    Ok(())
}

#[test]
fn test_library_reference() -> Result<()> {
    let code = uint_cell(0xc0de, 16)?;
    let mut data = vec![2u8];
    data.extend_from_slice(code.repr_hash().as_slice());

    let cell = Cell::from(DataCell::with_params(
        CellType::LibraryReference, SmallVec::from_vec(data.clone()), 264, vec![]
    )?);
    assert!(cell.is_exotic());
    assert_eq!(cell.cell_type(), CellType::LibraryReference);
    assert_eq!(cell.level(), 0);

    assert!(DataCell::with_params(
        CellType::LibraryReference, SmallVec::from_vec(data.clone()), 256, vec![]
    ).is_err());
    assert!(DataCell::with_params(
        CellType::LibraryReference, SmallVec::from_vec(data), 264, vec![Cell::default()]
    ).is_err());
    Ok(())
}

#[test]
fn test_merkle_proof() -> Result<()> {
    let mut b = BuilderData::new();
    b.store_uint(42, 32)?;
    b.store_ref(uint_cell(43, 32)?)?;
    let child = b.into_cell()?;

    let proof = merkle_proof(&child)?;
    assert!(proof.is_exotic());
    assert!(proof.is_merkle());
    assert!(!proof.is_pruned());
    assert_eq!(proof.cell_type(), CellType::MerkleProof);
    assert_eq!(proof.level(), 0);
    assert_eq!(proof.reference(0)?, child);
    Ok(())
}

#[test]
fn test_merkle_proof_validation() -> Result<()> {
    let child = uint_cell(42, 32)?;
    let mut data = vec![3u8];
    data.extend_from_slice(child.repr_hash().as_slice());
    data.extend_from_slice(&child.repr_depth().to_be_bytes());

    // stored hash disagrees with the child
    let mut bad = data.clone();
    bad[5] ^= 1;
    assert!(DataCell::with_params(
        CellType::MerkleProof, SmallVec::from_vec(bad), 280, vec![child.clone()]
    ).is_err());
    // stored depth disagrees with the child
    let mut bad = data.clone();
    bad[34] ^= 1;
    assert!(DataCell::with_params(
        CellType::MerkleProof, SmallVec::from_vec(bad), 280, vec![child.clone()]
    ).is_err());
    // exactly one ref is required
    assert!(DataCell::with_params(
        CellType::MerkleProof, SmallVec::from_vec(data), 280, vec![]
    ).is_err());
    Ok(())
}

#[test]
fn test_merkle_proof_over_pruned() -> Result<()> {
    let mut b = BuilderData::new();
    b.store_uint(7, 8)?;
    b.store_ref(uint_cell(8, 8)?)?;
    let subtree = b.into_cell()?;

    let pruned = prune(&subtree)?;
    // the stub's level-0 hash is the hidden subtree hash, so the proof
    // built over the stub commits to the original tree
    let proof = merkle_proof(&pruned)?;
    assert_eq!(proof.level(), 0);
    assert_eq!(proof.reference(0)?.hash(0), subtree.repr_hash());
    Ok(())
}

#[test]
fn test_merkle_update() -> Result<()> {
    let old = Cell::default();
    let new = uint_cell(7, 8)?;
    let mut data = vec![4u8];
    data.extend_from_slice(old.hash(0).as_slice());
    data.extend_from_slice(new.hash(0).as_slice());
    data.extend_from_slice(&old.depth(0).to_be_bytes());
    data.extend_from_slice(&new.depth(0).to_be_bytes());

    let update = Cell::from(DataCell::with_params(
        CellType::MerkleUpdate,
        SmallVec::from_vec(data.clone()),
        552,
        vec![old.clone(), new.clone()]
    )?);
    assert!(update.is_exotic());
    assert!(update.is_merkle());
    assert_eq!(update.cell_type(), CellType::MerkleUpdate);
    assert_eq!(update.level(), 0);

    // both sides must be present
    assert!(DataCell::with_params(
        CellType::MerkleUpdate, SmallVec::from_vec(data.clone()), 552, vec![old]
    ).is_err());
    // swapped sides no longer match the stored hashes
    assert!(DataCell::with_params(
        CellType::MerkleUpdate, SmallVec::from_vec(data), 552,
        vec![new, Cell::default()]
    ).is_err());
    Ok(())
}

#[test]
fn test_level_propagation() -> Result<()> {
    let mut b = BuilderData::new();
    b.store_uint(7, 8)?;
    b.store_ref(uint_cell(8, 8)?)?;
    let subtree = b.into_cell()?;
    let pruned = prune(&subtree)?;

    let mut b = BuilderData::new();
    b.store_uint(1, 8)?;
    b.store_ref(pruned)?;
    let parent = b.into_cell()?;

    assert_eq!(parent.level(), 1);
    assert_eq!(parent.level_mask(), LevelMask::with_mask(1));
    assert_eq!(parent.hashes().len(), 2);
    assert_eq!(parent.depths().len(), 2);
    // level 0 sees through the stub into the hidden subtree
    assert_eq!(parent.depth(0), 2);
    assert_eq!(parent.depth(1), 1);
    assert_ne!(parent.hash(0), parent.hash(1));
    assert_eq!(parent.hash(3), parent.repr_hash());
    Ok(())
}

#[test]
fn test_cell_depth_limit() -> Result<()> {
    let mut cell = Cell::default();
    for _ in 0..1024 {
        let mut next = BuilderData::new();
        next.store_ref(cell)?;
        cell = next.into_cell()?;
    }
    assert_eq!(cell.repr_depth(), 1024);

    let mut over = BuilderData::new();
    over.store_ref(cell)?;
    assert!(over.into_cell().is_err());
    Ok(())
}
