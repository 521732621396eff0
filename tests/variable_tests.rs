use meterlink::variable::codec::{decode_uint, encode_uint};
use meterlink::{Encoding, Endian, MeterLinkError, Padding, Session, SymbolTable, Variable, VariableSpec};
use std::sync::Arc;

fn var(width: usize, encoding: Encoding, endian: Endian) -> Variable {
    Variable::new(
        VariableSpec::new("v", width, encoding).with_endian(endian),
        Endian::Big,
    )
}

#[test]
fn test_uint16_both_orders() {
    let mut be = var(2, Encoding::Uint, Endian::Big);
    be.set_bytes(&[0x01, 0x2C]).unwrap();
    assert_eq!(be.get_u16().unwrap(), 300);

    let mut le = var(2, Encoding::Uint, Endian::Little);
    le.set_bytes(&[0x01, 0x2C]).unwrap();
    assert_eq!(le.get_u16().unwrap(), 0x2C01);
}

#[test]
fn test_signed_and_fixed() {
    let mut v = var(2, Encoding::Int, Endian::Big);
    v.set_bytes(&[0xFF, 0xFE]).unwrap();
    assert_eq!(v.get_i16().unwrap(), -2);

    let mut t = var(2, Encoding::Fixed { decimals: 1 }, Endian::Big);
    t.set_bytes(&[0x00, 0xF5]).unwrap();
    assert!((t.get_fixed().unwrap() - 24.5).abs() < 1e-9);
}

#[test]
fn test_wrong_accessor_is_error() {
    let v = var(2, Encoding::Uint, Endian::Big);
    assert!(matches!(
        v.get_string(),
        Err(MeterLinkError::VariableError { .. })
    ));

    let t = var(4, Encoding::Text { padding: Padding::Space }, Endian::Big);
    assert!(t.get_uint().is_err());

    let wide = var(4, Encoding::Uint, Endian::Big);
    assert!(wide.get_u16().is_err());
}

#[test]
fn test_fixed_width_cannot_resize() {
    let mut v = var(2, Encoding::Uint, Endian::Big);
    assert!(v.set_bytes(&[1, 2, 3]).is_err());
    assert!(v.resize(2).is_ok());
    assert!(v.resize(3).is_err());
}

#[test]
fn test_resizable_bounds() {
    let mut v = Variable::new(
        VariableSpec::new("data", 0, Encoding::Bytes).resizable(4),
        Endian::Big,
    );
    assert_eq!(v.width(), 0);
    v.resize(4).unwrap();
    assert_eq!(v.bytes(), &[0, 0, 0, 0]);
    assert!(v.resize(5).is_err());
    v.set_bytes(&[7]).unwrap();
    assert_eq!(v.width(), 1);
    v.clear();
    assert_eq!(v.width(), 0);
}

#[test]
fn test_text_padding() {
    let mut v = var(8, Encoding::Text { padding: Padding::Space }, Endian::Big);
    v.set_string("KWH").unwrap();
    assert_eq!(v.bytes(), b"KWH     ");
    assert_eq!(v.get_string().unwrap(), "KWH");
    assert!(v.set_string("TOO LONG!").is_err());

    let mut n = var(6, Encoding::Text { padding: Padding::Null }, Endian::Big);
    n.set_bytes(b"ab\0cd\0").unwrap();
    assert_eq!(n.get_string().unwrap(), "ab");
}

#[test]
fn test_session_by_name() {
    let mut symbols = SymbolTable::new();
    symbols
        .declare(VariableSpec::new("voltage", 2, Encoding::Fixed { decimals: 1 }))
        .unwrap();
    symbols
        .declare(VariableSpec::new("serial", 4, Encoding::Uint).with_endian(Endian::Big))
        .unwrap();
    assert!(symbols
        .declare(VariableSpec::new("voltage", 1, Encoding::Uint))
        .is_err());

    let mut session = Session::new(Arc::new(symbols), Endian::Little);
    session.variable_mut("voltage").unwrap().set_fixed(230.4).unwrap();
    assert_eq!(session.variable("voltage").unwrap().bytes(), &[0x00, 0x09]);
    assert_eq!(session.variable("serial").unwrap().byte_order(), Endian::Big);
    assert!(matches!(
        session.variable("current"),
        Err(MeterLinkError::UnknownVariable(_))
    ));

    session.reset();
    assert_eq!(session.variable("voltage").unwrap().bytes(), &[0, 0]);
}

#[test]
fn test_codec_width_limits() {
    assert_eq!(encode_uint(0x1_0000, 2, Endian::Big), None);
    assert_eq!(encode_uint(0xABCD, 2, Endian::Little), Some(vec![0xCD, 0xAB]));
    assert_eq!(decode_uint(&[0xCD, 0xAB], Endian::Little), 0xABCD);
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn endian() -> impl Strategy<Value = Endian> {
        prop_oneof![Just(Endian::Big), Just(Endian::Little)]
    }

    proptest! {
        #[test]
        fn prop_uint16_round_trip(value in any::<u16>(), order in endian()) {
            let mut v = var(2, Encoding::Uint, order);
            v.set_uint(value as u64).unwrap();
            prop_assert_eq!(v.get_u16().unwrap(), value);

            let mut copy = var(2, Encoding::Uint, order);
            copy.set_bytes(v.bytes()).unwrap();
            prop_assert_eq!(copy.get_u16().unwrap(), value);
        }

        #[test]
        fn prop_uint32_round_trip(value in any::<u32>(), order in endian()) {
            let mut v = var(4, Encoding::Uint, order);
            v.set_uint(value as u64).unwrap();
            prop_assert_eq!(v.get_u32().unwrap(), value);
        }

        #[test]
        fn prop_uint32_orders_are_mirrors(value in any::<u32>()) {
            let mut be = var(4, Encoding::Uint, Endian::Big);
            let mut le = var(4, Encoding::Uint, Endian::Little);
            be.set_uint(value as u64).unwrap();
            le.set_uint(value as u64).unwrap();
            let mut reversed = be.get_bytes();
            reversed.reverse();
            prop_assert_eq!(reversed, le.get_bytes());
        }

        #[test]
        fn prop_int32_round_trip(value in any::<i32>(), order in endian()) {
            let mut v = var(4, Encoding::Int, order);
            v.set_int(value as i64).unwrap();
            prop_assert_eq!(v.get_i32().unwrap(), value);
        }

        #[test]
        fn prop_fixed_round_trip(raw in -8_000_000i32..8_000_000, decimals in 0u8..4, order in endian()) {
            let scale = 10f64.powi(decimals as i32);
            let value = raw as f64 / scale;
            let mut v = var(4, Encoding::Fixed { decimals }, order);
            v.set_fixed(value).unwrap();
            prop_assert!((v.get_fixed().unwrap() - value).abs() < 1e-9);
        }

        #[test]
        fn prop_string_round_trip(text in "[A-Za-z0-9]{0,12}") {
            let mut v = var(12, Encoding::Text { padding: Padding::Space }, Endian::Big);
            v.set_string(&text).unwrap();
            prop_assert_eq!(v.width(), 12);
            prop_assert_eq!(v.get_string().unwrap(), text);
        }
    }
}
