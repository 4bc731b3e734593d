/// Record codec - one record per length-framed binary frame
///
/// Frame: [total_len(4) | id(16) | field_count(4) | {name_len(4) | name | value_len(4) | value}*]
/// All integers big-endian, all text UTF-8. `total_len` counts every byte
/// after itself. No header, no checksum.
///
/// Encoding appends an `_id` field carrying the hyphenated identifier after
/// the user fields. Decoding folds it back into the identifier slot.

use crate::types::{Record, ID_FIELD};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

/// Size of the length prefix
pub const LEN_PREFIX_SIZE: usize = 4;

/// Size of the raw identifier slot
pub const ID_SIZE: usize = 16;

/// Encode a record into a complete frame, length prefix included
pub fn encode(record: &Record) -> Bytes {
    let id_text = record.id.to_string();

    let mut body = BytesMut::new();
    body.put_u32((record.fields.len() + 1) as u32);
    for (name, value) in &record.fields {
        put_text(&mut body, name);
        put_text(&mut body, value);
    }
    put_text(&mut body, ID_FIELD);
    put_text(&mut body, &id_text);

    let mut frame = BytesMut::with_capacity(LEN_PREFIX_SIZE + ID_SIZE + body.len());
    frame.put_u32((ID_SIZE + body.len()) as u32);
    frame.put_slice(record.id.as_bytes());
    frame.put(body);
    frame.freeze()
}

fn put_text(buf: &mut BytesMut, text: &str) {
    buf.put_u32(text.len() as u32);
    buf.put_slice(text.as_bytes());
}

/// Decode a frame payload (everything after the length prefix).
///
/// Returns None on any truncated or malformed payload; callers skip it.
pub fn decode(payload: &[u8]) -> Option<Record> {
    let mut buf = payload;

    if buf.remaining() < ID_SIZE {
        return None;
    }
    let mut id_bytes = [0u8; ID_SIZE];
    buf.copy_to_slice(&mut id_bytes);
    let mut record = Record::new(Uuid::from_bytes(id_bytes));

    if buf.remaining() < 4 {
        return None;
    }
    let field_count = buf.get_u32() as usize;

    for _ in 0..field_count {
        let name = take_text(&mut buf)?;
        let value = take_text(&mut buf)?;
        if name != ID_FIELD {
            record.set(name, value);
        }
    }

    if buf.has_remaining() {
        return None;
    }

    Some(record)
}

fn take_text(buf: &mut &[u8]) -> Option<String> {
    if buf.remaining() < 4 {
        return None;
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return None;
    }
    let text = std::str::from_utf8(&buf[..len]).ok()?.to_string();
    buf.advance(len);
    Some(text)
}

/// Decode a complete frame (length prefix included)
pub fn decode_frame(frame: &[u8]) -> Option<Record> {
    let mut buf = frame;
    if buf.remaining() < LEN_PREFIX_SIZE {
        return None;
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() != len {
        return None;
    }
    decode(buf)
}

/// Identifier slot of a complete frame, read without decoding the fields
pub fn frame_id(frame: &[u8]) -> Option<Uuid> {
    let slot = frame.get(LEN_PREFIX_SIZE..LEN_PREFIX_SIZE + ID_SIZE)?;
    Uuid::from_slice(slot).ok()
}

/// Iterator over the frames of an in-memory byte run.
///
/// Yields one item per complete frame: `Some(record)` when it decodes,
/// `None` when the payload is malformed. Stops at the first frame whose
/// declared length runs past the end of the data.
pub struct Frames<'a> {
    data: &'a [u8],
}

impl<'a> Frames<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for Frames<'a> {
    type Item = Option<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < LEN_PREFIX_SIZE {
            return None;
        }
        let len = (&self.data[..LEN_PREFIX_SIZE]).get_u32() as usize;
        let end = LEN_PREFIX_SIZE.checked_add(len)?;
        if end > self.data.len() {
            return None;
        }
        let payload = &self.data[LEN_PREFIX_SIZE..end];
        self.data = &self.data[end..];
        Some(decode(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> Record {
        Record::new(Uuid::new_v4())
            .with_field("name", "Alice")
            .with_field("age", "30")
    }

    #[test]
    fn test_frame_id_reads_slot() {
        let record = sample();
        assert_eq!(frame_id(&encode(&record)), Some(record.id));
        assert_eq!(frame_id(&[0, 0, 0, 3, 1, 2, 3]), None);
    }

    #[test]
    fn test_frame_layout() {
        let record = Record::new(Uuid::nil()).with_field("a", "bc");
        let frame = encode(&record);

        // len(4) id(16) count(4) "a"(4+1) "bc"(4+2) "_id"(4+3) id text(4+36)
        let expected_len = 16 + 4 + 5 + 6 + 7 + 40;
        assert_eq!(&frame[..4], &(expected_len as u32).to_be_bytes());
        assert_eq!(frame.len(), 4 + expected_len);
        assert_eq!(&frame[4..20], &[0u8; 16]);
        assert_eq!(&frame[20..24], &2u32.to_be_bytes());
        assert_eq!(&frame[24..28], &1u32.to_be_bytes());
        assert_eq!(&frame[28..29], b"a");
    }

    #[test]
    fn test_decode_frame() {
        let record = sample();
        let decoded = decode_frame(&encode(&record)).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_decode_truncated_returns_none() {
        let frame = encode(&sample());
        for cut in [0, 3, 10, 20, 25, frame.len() - 1] {
            assert!(decode_frame(&frame[..cut]).is_none(), "cut at {}", cut);
        }
        assert!(decode(&frame[4..frame.len() - 1]).is_none());
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let frame = encode(&sample());
        let mut payload = frame[4..].to_vec();
        payload.push(0);
        assert!(decode(&payload).is_none());
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let record = Record::new(Uuid::new_v4()).with_field("k", "v");
        let mut frame = encode(&record).to_vec();
        // first byte of the name "k"
        frame[28] = 0xFF;
        assert!(decode_frame(&frame).is_none());
    }

    #[test]
    fn test_frames_iterator_stops_at_short_frame() {
        let a = sample();
        let b = sample();
        let mut data = encode(&a).to_vec();
        data.extend_from_slice(&encode(&b));
        data.extend_from_slice(&encode(&sample())[..10]);

        let records: Vec<_> = Frames::new(&data).collect();
        assert_eq!(records, vec![Some(a), Some(b)]);
    }

    #[test]
    fn test_frames_iterator_yields_none_for_malformed_payload() {
        let a = sample();
        let mut data = vec![0, 0, 0, 3, 1, 2, 3];
        data.extend_from_slice(&encode(&a));

        let records: Vec<_> = Frames::new(&data).collect();
        assert_eq!(records, vec![None, Some(a)]);
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            fields in proptest::collection::vec(("[a-z]{1,8}", "\\PC{0,16}"), 0..8)
        ) {
            let mut record = Record::new(Uuid::new_v4());
            for (name, value) in fields {
                record.set(name, value);
            }
            let decoded = decode_frame(&encode(&record)).unwrap();
            prop_assert_eq!(decoded, record);
        }
    }
}
