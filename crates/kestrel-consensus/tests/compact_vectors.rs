use kestrel_consensus::{compact_to_target, target_to_compact};
use num_bigint::BigInt;
use num_traits::Signed;

#[test]
fn block_300000_vector() {
    let bits = 419_465_580u32;
    let target = compact_to_target(bits);
    let expected = BigInt::parse_bytes(
        b"0000000000000000896c00000000000000000000000000000000000000000000",
        16,
    )
    .unwrap();
    assert_eq!(target, expected);
    assert_eq!(target_to_compact(&expected), bits);
}

#[test]
fn reference_vectors() {
    // (bits, decoded target as signed hex, canonical re-encoding)
    let vectors: &[(u32, &str, u32)] = &[
        (0x0000_0000, "0", 0x0000_0000),
        (0x0012_3456, "0", 0x0000_0000),
        (0x0100_3456, "0", 0x0000_0000),
        (0x0200_0056, "0", 0x0000_0000),
        (0x0300_0000, "0", 0x0000_0000),
        (0x0400_0000, "0", 0x0000_0000),
        (0x0092_3456, "0", 0x0000_0000),
        (0x0180_3456, "0", 0x0000_0000),
        (0x0280_0056, "0", 0x0000_0000),
        (0x0112_3456, "12", 0x0112_0000),
        (0x0200_8000, "80", 0x0200_8000),
        (0x0500_9234, "92340000", 0x0500_9234),
        (0x0492_3456, "-12345600", 0x0492_3456),
        (0x0412_3456, "12345600", 0x0412_3456),
        (0x1d00_ffff, "ffff0000000000000000000000000000000000000000000000000000", 0x1d00_ffff),
        (0x207f_ffff, "7fffff0000000000000000000000000000000000000000000000000000000000", 0x207f_ffff),
    ];

    for &(bits, hex, canonical) in vectors {
        let expected = BigInt::parse_bytes(hex.as_bytes(), 16).unwrap();
        let decoded = compact_to_target(bits);
        assert_eq!(decoded, expected, "decode {bits:#010x}");
        assert_eq!(target_to_compact(&decoded), canonical, "encode {bits:#010x}");
    }
}

#[test]
fn re_encoding_is_stable_across_u32_space() {
    // A prime stride visits every exponent byte and a spread of mantissas.
    let mut bits = 0u32;
    loop {
        let target = compact_to_target(bits);
        let canonical = target_to_compact(&target);
        assert_eq!(compact_to_target(canonical), target, "bits {bits:#010x}");
        // Canonical encodings are fixed points.
        assert_eq!(target_to_compact(&compact_to_target(canonical)), canonical);

        match bits.checked_add(65_521) {
            Some(next) => bits = next,
            None => break,
        }
    }
}

#[test]
fn lossy_encoding_never_raises_the_target() {
    let targets = [
        "123456789abcdef",
        "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        "8000000000000000000000000000000000000000000000000000000000000001",
        "7fffff0000000000000000000000000000000000000000000000000000000001",
        "1",
        "ff",
        "100",
    ];
    for hex in targets {
        let target = BigInt::parse_bytes(hex.as_bytes(), 16).unwrap();
        let bits = target_to_compact(&target);
        let back = compact_to_target(bits);
        assert!(!back.is_negative(), "{hex}");
        assert!(back <= target, "{hex}: {back} > {target}");
    }
}
