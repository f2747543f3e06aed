use super::*;

#[derive(Debug, PartialEq)]
struct Sample {
    id: u64,
    name: Vec<u8>,
    live: bool,
}

impl Encode for Sample {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.id.encode_to(buf)?;
        self.name.encode_to(buf)?;
        self.live.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for Sample {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (id, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (name, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        let (live, n) = bool::decode_from(&buf[offset..])?;
        offset += n;
        Ok((Self { id, name, live }, offset))
    }
}

#[test]
fn test_struct_roundtrip() {
    let sample = Sample {
        id: 42,
        name: b"stratum".to_vec(),
        live: true,
    };
    let bytes = encode_to_vec(&sample).unwrap();
    let (decoded, consumed) = decode_from_slice::<Sample>(&bytes).unwrap();
    assert_eq!(decoded, sample);
    assert_eq!(consumed, bytes.len());
}

#[test]
fn test_integers_are_little_endian() {
    let bytes = encode_to_vec(&0x0102_0304u32).unwrap();
    assert_eq!(bytes, vec![0x04, 0x03, 0x02, 0x01]);

    let bytes = encode_to_vec(&1u64).unwrap();
    assert_eq!(bytes, vec![1, 0, 0, 0, 0, 0, 0, 0]);
}

#[test]
fn test_bytes_are_length_prefixed() {
    let bytes = encode_to_vec(&b"ab".to_vec()).unwrap();
    assert_eq!(bytes, vec![2, 0, 0, 0, b'a', b'b']);

    let (decoded, consumed) = decode_from_slice::<Vec<u8>>(&bytes).unwrap();
    assert_eq!(decoded, b"ab".to_vec());
    assert_eq!(consumed, 6);
}

#[test]
fn test_vec_of_structs_roundtrip() {
    let samples = vec![
        Sample {
            id: 1,
            name: b"a".to_vec(),
            live: true,
        },
        Sample {
            id: 2,
            name: b"b".to_vec(),
            live: false,
        },
    ];
    let mut buf = Vec::new();
    encode_vec(&samples, &mut buf).unwrap();
    let (decoded, consumed) = decode_vec::<Sample>(&buf).unwrap();
    assert_eq!(decoded, samples);
    assert_eq!(consumed, buf.len());
}

#[test]
fn test_truncated_buffer_is_rejected() {
    let bytes = encode_to_vec(&0xAABBCCDDu32).unwrap();
    let err = decode_from_slice::<u32>(&bytes[..3]).unwrap_err();
    assert!(matches!(err, EncodingError::UnexpectedEof { .. }));
}

#[test]
fn test_truncated_byte_payload_is_rejected() {
    let mut bytes = encode_to_vec(&b"hello".to_vec()).unwrap();
    bytes.truncate(bytes.len() - 2);
    let err = decode_from_slice::<Vec<u8>>(&bytes).unwrap_err();
    assert!(matches!(err, EncodingError::UnexpectedEof { .. }));
}

#[test]
fn test_invalid_bool_byte_is_rejected() {
    let err = decode_from_slice::<bool>(&[0x02]).unwrap_err();
    assert!(matches!(err, EncodingError::InvalidBool(0x02)));
}

#[test]
fn test_oversized_length_is_rejected() {
    // A length prefix far beyond MAX_BYTE_LEN must fail before allocating.
    let mut bytes = Vec::new();
    u32::MAX.encode_to(&mut bytes).unwrap();
    let err = decode_from_slice::<Vec<u8>>(&bytes).unwrap_err();
    assert!(matches!(err, EncodingError::LengthOverflow(_)));
}

#[test]
fn test_oversized_vec_count_is_rejected() {
    let mut bytes = Vec::new();
    u32::MAX.encode_to(&mut bytes).unwrap();
    let err = decode_vec::<u64>(&bytes).unwrap_err();
    assert!(matches!(err, EncodingError::LengthOverflow(_)));
}
