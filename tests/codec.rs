//! Integration tests for the binary cursor and writer

#![allow(clippy::unwrap_used)]

use raknet_relay::core::cursor::{hex_dump, Cursor, Writer};
use raknet_relay::error::ProtocolError;

macro_rules! boundary_roundtrip {
    ($($test:ident: $ty:ty => $write:ident / $read:ident;)*) => {
        $(
            #[test]
            fn $test() {
                for value in [0 as $ty, <$ty>::MAX, <$ty>::MAX / 2, <$ty>::MIN] {
                    let mut w = Writer::new();
                    w.$write(value);
                    assert_eq!(w.len(), std::mem::size_of::<$ty>());
                    let bytes = w.into_inner();
                    let mut c = Cursor::new(&bytes);
                    assert_eq!(c.$read().unwrap(), value);
                    assert!(c.is_eof());
                }
            }
        )*
    };
}

boundary_roundtrip! {
    test_u16_be: u16 => write_u16_be / read_u16_be;
    test_u16_le: u16 => write_u16_le / read_u16_le;
    test_i16_be: i16 => write_i16_be / read_i16_be;
    test_i16_le: i16 => write_i16_le / read_i16_le;
    test_u32_be: u32 => write_u32_be / read_u32_be;
    test_u32_le: u32 => write_u32_le / read_u32_le;
    test_i32_be: i32 => write_i32_be / read_i32_be;
    test_i32_le: i32 => write_i32_le / read_i32_le;
    test_u64_be: u64 => write_u64_be / read_u64_be;
    test_u64_le: u64 => write_u64_le / read_u64_le;
    test_i64_be: i64 => write_i64_be / read_i64_be;
    test_i64_le: i64 => write_i64_le / read_i64_le;
}

#[test]
fn test_u8_and_i8_boundaries() {
    let mut w = Writer::new();
    for v in [0u8, u8::MAX, u8::MAX / 2] {
        w.write_u8(v);
    }
    for v in [0i8, i8::MAX, i8::MIN] {
        w.write_i8(v);
    }
    let bytes = w.into_inner();
    let mut c = Cursor::new(&bytes);
    assert_eq!(c.read_u8().unwrap(), 0);
    assert_eq!(c.read_u8().unwrap(), 255);
    assert_eq!(c.read_u8().unwrap(), 127);
    assert_eq!(c.read_i8().unwrap(), 0);
    assert_eq!(c.read_i8().unwrap(), i8::MAX);
    assert_eq!(c.read_i8().unwrap(), i8::MIN);
}

#[test]
fn test_u24_boundaries_both_orders() {
    const MAX: u32 = 0x00ff_ffff;
    for value in [0, MAX, MAX / 2] {
        let mut w = Writer::new();
        w.write_u24_le(value);
        w.write_u24_be(value);
        let bytes = w.into_inner();
        assert_eq!(bytes.len(), 6);
        let mut c = Cursor::new(&bytes);
        assert_eq!(c.read_u24_le().unwrap(), value);
        assert_eq!(c.read_u24_be().unwrap(), value);
    }
}

#[test]
fn test_i24_sign_extends() {
    let mut c = Cursor::new(&[0xff, 0xff, 0xff, 0x80, 0x00, 0x00]);
    assert_eq!(c.read_i24_le().unwrap(), -1);
    assert_eq!(c.read_i24_be().unwrap(), -0x80_0000);
}

#[test]
fn test_u24_le_byte_layout() {
    let mut w = Writer::new();
    w.write_u24_le(0x0a0b0c);
    assert_eq!(w.as_slice(), &[0x0c, 0x0b, 0x0a]);
}

#[test]
fn test_f32_roundtrip() {
    let mut w = Writer::new();
    w.write_f32_be(1.5);
    w.write_f32_le(-0.25);
    let bytes = w.into_inner();
    let mut c = Cursor::new(&bytes);
    assert_eq!(c.read_f32_be().unwrap(), 1.5);
    assert_eq!(c.read_f32_le().unwrap(), -0.25);
}

#[test]
fn test_varint_boundaries() {
    let cases: [(u128, &[u8]); 5] = [
        (0, &[0x00]),
        (127, &[0x7f]),
        (128, &[0x80, 0x01]),
        (16383, &[0xff, 0x7f]),
        (16384, &[0x80, 0x80, 0x01]),
    ];
    for (value, encoded) in cases {
        let mut w = Writer::new();
        w.write_var_u128(value);
        assert_eq!(w.as_slice(), encoded, "encoding {value}");
        let mut c = Cursor::new(encoded);
        assert_eq!(c.read_var_u128().unwrap(), value);
    }
}

#[test]
fn test_varint_beyond_64_bits() {
    let value = (1u128 << 70) + 12345;
    let mut w = Writer::new();
    w.write_var_u128(value);
    let bytes = w.into_inner();
    assert_eq!(Cursor::new(&bytes).read_var_u128().unwrap(), value);
    assert!(matches!(
        Cursor::new(&bytes).read_var_u32(),
        Err(ProtocolError::VarIntOverflow)
    ));
}

#[test]
fn test_negative_varint_writes_zero_byte() {
    let mut w = Writer::new();
    w.write_var_uint(-42);
    assert_eq!(w.as_slice(), &[0x00]);
}

#[test]
fn test_truncated_varint_underruns_without_advancing() {
    let mut c = Cursor::new(&[0x80, 0x80]);
    assert!(c.read_var_u128().unwrap_err().is_underrun());
    assert_eq!(c.position(), 0);
}

#[test]
fn test_underrun_reports_sizes() {
    let mut c = Cursor::new(&[1, 2, 3]);
    c.read_u8().unwrap();
    match c.read_u32_be() {
        Err(ProtocolError::BufferUnderrun { needed, remaining }) => {
            assert_eq!(needed, 4);
            assert_eq!(remaining, 2);
        }
        other => panic!("expected underrun, got {other:?}"),
    }
    assert_eq!(c.remaining(), 2);
}

#[test]
fn test_strings_and_peek() {
    let mut w = Writer::new();
    w.write_var_str("steve").unwrap();
    w.write_short_str("MCPE;Dedicated Server").unwrap();
    w.write_var_bytes(&[9, 8, 7]).unwrap();
    let bytes = w.into_inner();

    let mut c = Cursor::new(&bytes);
    assert_eq!(c.peek_u8().unwrap(), 5);
    assert_eq!(c.read_var_str().unwrap(), "steve");
    assert_eq!(c.read_short_str().unwrap(), "MCPE;Dedicated Server");
    assert_eq!(c.read_var_bytes().unwrap(), &[9, 8, 7]);
    assert!(c.is_eof());
}

#[test]
fn test_invalid_utf8_is_rejected() {
    let mut c = Cursor::new(&[0x02, 0xc3, 0x28]);
    assert!(matches!(c.read_var_str(), Err(ProtocolError::InvalidUtf8)));
}

#[test]
fn test_hex_dump() {
    assert_eq!(hex_dump(&[0x00, 0xff, 0x1a], " "), "00 ff 1a");
    assert_eq!(hex_dump(&[], ":"), "");
}
