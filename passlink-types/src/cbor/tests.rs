use super::*;

#[test]
fn map_keys_are_sorted_length_first() {
    let map = MapBuilder::new()
        .insert("authData", vec![0u8])
        .insert("fmt", "none")
        .insert("attStmt", Value::Map(vec![]))
        .build();

    let bytes = to_vec(&map).expect("could not encode");
    let decoded = from_slice(&bytes).expect("could not decode");
    let keys: Vec<_> = decoded
        .as_map()
        .expect("not a map")
        .iter()
        .map(|(k, _)| k.as_text().expect("text key").to_owned())
        .collect();
    assert_eq!(keys, ["fmt", "attStmt", "authData"]);
}

#[test]
fn integer_keys_follow_encoded_order() {
    let map = MapBuilder::new()
        .insert(-3, 3)
        .insert(3, -7)
        .insert(-1, 1)
        .insert(1, 2)
        .insert(-2, 2)
        .build();

    let bytes = to_vec(&map).expect("could not encode");
    // 1, 3, -1, -2, -3 encode as 0x01, 0x03, 0x20, 0x21, 0x22
    assert_eq!(
        bytes,
        [0xa5, 0x01, 0x02, 0x03, 0x26, 0x20, 0x01, 0x21, 0x02, 0x22, 0x03]
    );
}

#[test]
fn nested_maps_are_sorted() {
    let inner = MapBuilder::new().insert("up", true).insert("rk", false).build();
    let outer = MapBuilder::new().insert(7, inner).insert(1, vec![1u8]).build();

    let bytes = to_vec(&outer).expect("could not encode");
    assert_eq!(
        bytes,
        [0xa2, 0x01, 0x41, 0x01, 0x07, 0xa2, 0x62, b'r', b'k', 0xf4, 0x62, b'u', b'p', 0xf5]
    );
}

#[test]
fn insert_opt_skips_absent_members() {
    let map = MapBuilder::new()
        .insert(1, "present")
        .insert_opt(2, None::<bool>)
        .insert_opt(3, Some(true))
        .build();
    let reader = MapReader::from_value(map).expect("not a map");
    assert_eq!(reader.len(), 2);
    assert!(!reader.contains(2));
    assert_eq!(reader.bool(3), Ok(Some(true)));
}

#[test]
fn trailing_and_truncated_input_is_rejected() {
    assert_eq!(from_slice(&[0x01, 0x02]), Err(DecodeError::TrailingBytes(1)));
    assert!(matches!(
        from_slice(&[0xa1, 0x01]),
        Err(DecodeError::Malformed(_))
    ));
}

#[test]
fn reader_reports_missing_and_mistyped_keys() {
    let reader = MapReader::from_slice(&[0xa2, 0x01, 0x63, b'a', b'b', b'c', 0x02, 0x41, 0xff])
        .expect("could not decode");

    assert_eq!(reader.required_text(1), Ok("abc".to_owned()));
    assert_eq!(reader.required_bytes(2), Ok(vec![0xff]));
    assert_eq!(
        reader.required_bytes(3),
        Err(DecodeError::MissingKey("3".into()))
    );
    assert_eq!(
        reader.bytes(1),
        Err(DecodeError::UnexpectedType {
            key: "1".into(),
            expected: "a byte string"
        })
    );
}

#[test]
fn reader_rejects_non_maps() {
    assert!(matches!(
        MapReader::from_slice(&[0x80]),
        Err(DecodeError::UnexpectedType { .. })
    ));
}
