//! Binary checkpoint format for evaluation histories.
//!
//! ```text
//! Header:
//!   Magic: "ECPH" (4 bytes)
//!   Version: u16
//!   Entry count: u64
//!
//! Entry (repeated):
//!   Has index: u8, Sequence index: u64
//!   Rank: u32
//!   HOMO, LUMO, Cost: f64
//!   Failed: u8
//!   Components: u32 count, then (origin u32, class u8, value f64)
//!   Regions: u32 count, then (gnorm, gnorm_max, grad_max x3) as f64
//!   Orbital spread: u32 count, then spread records
//!   DMA spread: u32 count, then spread records
//!
//! Spread record:
//!   max, min, average, spread: f64
//!   quantity: i32
//!   label: 10 bytes, zero padded UTF-8
//! ```
//!
//! All integers and floats are little-endian.

use std::io::{self, Read, Write};

use crate::schema::{
    Candidate, Component, ComponentClass, Diagnostics, LABEL_WIDTH, RegionStats, SpreadStats,
};

/// Magic bytes identifying a history checkpoint.
pub const CHECKPOINT_MAGIC: &[u8; 4] = b"ECPH";

/// Current format version.
pub const CHECKPOINT_VERSION: u16 = 1;

/// Write a full history checkpoint.
pub fn write_checkpoint<W: Write>(w: &mut W, entries: &[Candidate]) -> io::Result<()> {
    w.write_all(CHECKPOINT_MAGIC)?;
    w.write_all(&CHECKPOINT_VERSION.to_le_bytes())?;
    w.write_all(&(entries.len() as u64).to_le_bytes())?;
    for entry in entries {
        write_entry(w, entry)?;
    }
    Ok(())
}

/// Read a full history checkpoint.
pub fn read_checkpoint<R: Read>(r: &mut R) -> io::Result<Vec<Candidate>> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if &magic != CHECKPOINT_MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "Invalid ECPH magic bytes",
        ));
    }

    let mut buf2 = [0u8; 2];
    r.read_exact(&mut buf2)?;
    let version = u16::from_le_bytes(buf2);
    if version != CHECKPOINT_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Unsupported ECPH version: {}", version),
        ));
    }

    let count = read_u64(r)?;
    let mut entries = Vec::with_capacity(count.min(4096) as usize);
    for _ in 0..count {
        entries.push(read_entry(r)?);
    }
    Ok(entries)
}

fn write_entry<W: Write>(w: &mut W, entry: &Candidate) -> io::Result<()> {
    match entry.sequence_index {
        Some(index) => {
            w.write_all(&[1])?;
            w.write_all(&index.to_le_bytes())?;
        }
        None => {
            w.write_all(&[0])?;
            w.write_all(&0u64.to_le_bytes())?;
        }
    }
    w.write_all(&entry.rank.to_le_bytes())?;
    w.write_all(&entry.diagnostics.homo.to_le_bytes())?;
    w.write_all(&entry.diagnostics.lumo.to_le_bytes())?;
    w.write_all(&entry.cost.to_le_bytes())?;
    w.write_all(&[entry.failed as u8])?;

    write_len(w, entry.components.len())?;
    for component in &entry.components {
        w.write_all(&component.origin.to_le_bytes())?;
        w.write_all(&[component.class.code()])?;
        w.write_all(&component.value.to_le_bytes())?;
    }

    write_len(w, entry.diagnostics.regions.len())?;
    for region in &entry.diagnostics.regions {
        w.write_all(&region.gnorm.to_le_bytes())?;
        w.write_all(&region.gnorm_max.to_le_bytes())?;
        for g in region.grad_max {
            w.write_all(&g.to_le_bytes())?;
        }
    }

    for spreads in [
        &entry.diagnostics.orbital_spread,
        &entry.diagnostics.dma_spread,
    ] {
        write_len(w, spreads.len())?;
        for spread in spreads {
            write_spread(w, spread)?;
        }
    }
    Ok(())
}

fn read_entry<R: Read>(r: &mut R) -> io::Result<Candidate> {
    let has_index = read_u8(r)? != 0;
    let index = read_u64(r)?;
    let rank = read_u32(r)?;
    let homo = read_f64(r)?;
    let lumo = read_f64(r)?;
    let cost = read_f64(r)?;
    let failed = read_u8(r)? != 0;

    let count = read_u32(r)?;
    let mut components = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let origin = read_u32(r)?;
        let code = read_u8(r)?;
        let class = ComponentClass::from_code(code).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unknown component class code: {}", code),
            )
        })?;
        let value = read_f64(r)?;
        components.push(Component::new(origin, class, value));
    }

    let count = read_u32(r)?;
    let mut regions = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        regions.push(RegionStats {
            gnorm: read_f64(r)?,
            gnorm_max: read_f64(r)?,
            grad_max: [read_f64(r)?, read_f64(r)?, read_f64(r)?],
        });
    }

    let orbital_spread = read_spreads(r)?;
    let dma_spread = read_spreads(r)?;

    Ok(Candidate {
        components,
        cost,
        rank,
        sequence_index: has_index.then_some(index),
        failed,
        diagnostics: Diagnostics {
            regions,
            orbital_spread,
            dma_spread,
            homo,
            lumo,
        },
    })
}

fn write_spread<W: Write>(w: &mut W, spread: &SpreadStats) -> io::Result<()> {
    w.write_all(&spread.max.to_le_bytes())?;
    w.write_all(&spread.min.to_le_bytes())?;
    w.write_all(&spread.average.to_le_bytes())?;
    w.write_all(&spread.spread.to_le_bytes())?;
    w.write_all(&spread.quantity.to_le_bytes())?;
    w.write_all(&encode_label(&spread.label))?;
    Ok(())
}

fn read_spreads<R: Read>(r: &mut R) -> io::Result<Vec<SpreadStats>> {
    let count = read_u32(r)?;
    let mut spreads = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let max = read_f64(r)?;
        let min = read_f64(r)?;
        let average = read_f64(r)?;
        let spread = read_f64(r)?;
        let mut buf4 = [0u8; 4];
        r.read_exact(&mut buf4)?;
        let quantity = i32::from_le_bytes(buf4);
        let mut label = [0u8; LABEL_WIDTH];
        r.read_exact(&mut label)?;
        spreads.push(SpreadStats {
            max,
            min,
            average,
            spread,
            quantity,
            label: decode_label(&label)?,
        });
    }
    Ok(spreads)
}

/// Zero-padded fixed-width label. Longer labels are cut at a char boundary.
pub fn encode_label(label: &str) -> [u8; LABEL_WIDTH] {
    let mut end = label.len().min(LABEL_WIDTH);
    while !label.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = [0u8; LABEL_WIDTH];
    out[..end].copy_from_slice(&label.as_bytes()[..end]);
    out
}

pub fn decode_label(bytes: &[u8; LABEL_WIDTH]) -> io::Result<String> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(LABEL_WIDTH);
    String::from_utf8(bytes[..end].to_vec())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn write_len<W: Write>(w: &mut W, len: usize) -> io::Result<()> {
    let len = u32::try_from(len).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "Array too long for checkpoint")
    })?;
    w.write_all(&len.to_le_bytes())
}

fn read_u8<R: Read>(r: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_f64<R: Read>(r: &mut R) -> io::Result<f64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn sample_entry() -> Candidate {
        Candidate {
            components: vec![
                Component::new(34, ComponentClass::Coefficient, 298.22733),
                Component::new(34, ComponentClass::Exponent, 715.1192),
            ],
            cost: 12.5,
            rank: 2,
            sequence_index: Some(7),
            failed: false,
            diagnostics: Diagnostics {
                regions: vec![
                    RegionStats {
                        gnorm: 0.01,
                        gnorm_max: 0.05,
                        grad_max: [0.1, 0.2, 0.3],
                    };
                    5
                ],
                orbital_spread: vec![SpreadStats {
                    max: 1.0,
                    min: 0.5,
                    average: 0.75,
                    spread: 0.5,
                    quantity: 4,
                    label: "O".to_string(),
                }],
                dma_spread: vec![],
                homo: -0.31,
                lumo: 0.02,
            },
        }
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let entries = vec![sample_entry(), Candidate::default()];

        let mut buf = Vec::new();
        write_checkpoint(&mut buf, &entries).unwrap();

        let mut cursor = Cursor::new(&buf);
        let decoded = read_checkpoint(&mut cursor).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn test_empty_checkpoint() {
        let mut buf = Vec::new();
        write_checkpoint(&mut buf, &[]).unwrap();
        assert_eq!(buf.len(), 4 + 2 + 8);

        let decoded = read_checkpoint(&mut Cursor::new(&buf)).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut buf = Vec::new();
        write_checkpoint(&mut buf, &[sample_entry()]).unwrap();
        buf[0] = b'X';

        let err = read_checkpoint(&mut Cursor::new(&buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut buf = Vec::new();
        write_checkpoint(&mut buf, &[]).unwrap();
        buf[4..6].copy_from_slice(&9u16.to_le_bytes());

        let err = read_checkpoint(&mut Cursor::new(&buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_truncated_checkpoint_fails() {
        let mut buf = Vec::new();
        write_checkpoint(&mut buf, &[sample_entry()]).unwrap();
        buf.truncate(buf.len() - 3);

        let err = read_checkpoint(&mut Cursor::new(&buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_long_label_truncated() {
        let encoded = encode_label("Strontium-88");
        assert_eq!(decode_label(&encoded).unwrap(), "Strontium-");

        // Multi-byte character straddling the limit is dropped whole.
        let encoded = encode_label("abcdefghié");
        assert_eq!(decode_label(&encoded).unwrap(), "abcdefghi");
    }

    fn spread_strategy() -> impl Strategy<Value = SpreadStats> {
        (
            prop::array::uniform4(-1e6..1e6f64),
            any::<i32>(),
            "[A-Za-z]{0,10}",
        )
            .prop_map(|(v, quantity, label)| SpreadStats {
                max: v[0],
                min: v[1],
                average: v[2],
                spread: v[3],
                quantity,
                label,
            })
    }

    fn entry_strategy() -> impl Strategy<Value = Candidate> {
        (
            prop::collection::vec((any::<u32>(), any::<bool>(), -1e4..1e4f64), 0..6),
            prop::collection::vec(prop::array::uniform5(-10.0..10.0f64), 0..6),
            prop::collection::vec(spread_strategy(), 0..3),
            prop::collection::vec(spread_strategy(), 0..3),
            (any::<Option<u64>>(), any::<u32>(), any::<bool>()),
            prop::array::uniform3(-1e6..1e6f64),
        )
            .prop_map(
                |(components, regions, orbital, dma, (index, rank, failed), scalars)| Candidate {
                    components: components
                        .into_iter()
                        .map(|(origin, exponent, value)| {
                            let class = if exponent {
                                ComponentClass::Exponent
                            } else {
                                ComponentClass::Coefficient
                            };
                            Component::new(origin, class, value)
                        })
                        .collect(),
                    cost: scalars[0],
                    rank,
                    sequence_index: index,
                    failed,
                    diagnostics: Diagnostics {
                        regions: regions
                            .into_iter()
                            .map(|r| RegionStats {
                                gnorm: r[0],
                                gnorm_max: r[1],
                                grad_max: [r[2], r[3], r[4]],
                            })
                            .collect(),
                        orbital_spread: orbital,
                        dma_spread: dma,
                        homo: scalars[1],
                        lumo: scalars[2],
                    },
                },
            )
    }

    proptest! {
        #[test]
        fn test_roundtrip_any_history(entries in prop::collection::vec(entry_strategy(), 0..8)) {
            let mut buf = Vec::new();
            write_checkpoint(&mut buf, &entries).unwrap();
            let decoded = read_checkpoint(&mut Cursor::new(&buf)).unwrap();
            prop_assert_eq!(decoded, entries);
        }
    }
}
