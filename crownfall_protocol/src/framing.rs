// Length-delimited frame codec for the Crownfall wire protocol.
//
// Every unit on the stream is one frame, big-endian throughout:
//
//   len: u32 | version: u8 | type: u8 | payload: len-2 bytes
//
// The length counts the version byte, the type byte, and the payload, so
// `len >= 2` always holds. The codec never inspects payload contents; it
// only knows how many bytes belong to the frame. Type-byte interpretation
// lives in `message.rs`, and the session layer decides what to do with an
// unknown type (drop the frame, keep the connection).
//
// A `MAX_FRAME_SIZE` constant (16 MB) protects against unbounded allocation
// from malformed or malicious length prefixes. The initial map transfer is
// the largest expected frame, and map payloads are streamed from/to disk
// (`write_frame_from_file`, `read_payload_to_file`) rather than held in a
// `Vec`, so even those never pin a full copy in memory.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

/// Single-byte protocol revision carried in every frame header.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum allowed frame length (16 MB), counting the version/type pair.
/// Protects against unbounded allocation from hostile length prefixes.
/// Map payloads are the largest expected frames; 16 MB is generous headroom
/// for even very large saves.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Chunk size for disk-streamed payloads.
const FILE_CHUNK: usize = 64 * 1024;

/// A decoded frame header: everything except the payload bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub msg_type: u8,
    /// Remaining bytes on the stream that belong to this frame.
    pub payload_len: u32,
}

/// Write one frame: 4-byte big-endian length, version, type, payload.
pub fn write_frame<W: Write>(writer: &mut W, msg_type: u8, payload: &[u8]) -> io::Result<()> {
    let len = payload
        .len()
        .checked_add(2)
        .filter(|len| *len <= MAX_FRAME_SIZE as usize)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "frame too large: {} payload bytes (max {MAX_FRAME_SIZE})",
                    payload.len()
                ),
            )
        })?;
    #[expect(clippy::cast_possible_truncation)]
    let len_bytes = (len as u32).to_be_bytes();
    writer.write_all(&len_bytes)?;
    writer.write_all(&[PROTOCOL_VERSION, msg_type])?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Write one frame whose payload is streamed from a file on disk.
///
/// The file length is read from metadata up front to produce the length
/// prefix, then the contents are copied through in chunks. Returns
/// `InvalidData` if the file changes size mid-transfer, since the declared
/// length can no longer be honored.
pub fn write_frame_from_file<W: Write>(
    writer: &mut W,
    msg_type: u8,
    path: &Path,
) -> io::Result<()> {
    let file_len = std::fs::metadata(path)?.len();
    let len = file_len
        .checked_add(2)
        .filter(|len| *len <= u64::from(MAX_FRAME_SIZE))
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("file payload too large: {file_len} bytes (max {MAX_FRAME_SIZE})"),
            )
        })?;
    #[expect(clippy::cast_possible_truncation)]
    let len_bytes = (len as u32).to_be_bytes();
    writer.write_all(&len_bytes)?;
    writer.write_all(&[PROTOCOL_VERSION, msg_type])?;

    let mut file = File::open(path)?;
    let copied = copy_exact(&mut file, writer, file_len)?;
    if copied != file_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("file payload changed size mid-transfer: {copied} of {file_len} bytes"),
        ));
    }
    writer.flush()?;
    Ok(())
}

/// Read a frame header: the 4-byte length prefix plus the version/type pair.
///
/// Returns `UnexpectedEof` if the stream closes cleanly before or inside the
/// header, `InvalidData` if the declared length violates the `len >= 2`
/// invariant or exceeds `MAX_FRAME_SIZE`.
pub fn read_header<R: Read>(reader: &mut R) -> io::Result<FrameHeader> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);
    if len < 2 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {len} below minimum of 2"),
        ));
    }
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len} bytes (max {MAX_FRAME_SIZE})"),
        ));
    }
    let mut tag_buf = [0u8; 2];
    reader.read_exact(&mut tag_buf)?;
    Ok(FrameHeader {
        version: tag_buf[0],
        msg_type: tag_buf[1],
        payload_len: len - 2,
    })
}

/// Read one whole frame into memory. Returns the type byte and the payload.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<(u8, Vec<u8>)> {
    let header = read_header(reader)?;
    let mut payload = vec![0u8; header.payload_len as usize];
    reader.read_exact(&mut payload)?;
    Ok((header.msg_type, payload))
}

/// Stream a declared payload into a writer (typically a temp file) without
/// buffering it whole. Consumes exactly `len` bytes from the reader; returns
/// `UnexpectedEof` if the stream ends early.
pub fn read_payload_to_file<R: Read, W: Write>(
    reader: &mut R,
    len: u32,
    out: &mut W,
) -> io::Result<u64> {
    let copied = copy_exact(reader, out, u64::from(len))?;
    if copied != u64::from(len) {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("payload truncated: {copied} of {len} bytes"),
        ));
    }
    out.flush()?;
    Ok(copied)
}

/// Copy up to `limit` bytes in fixed-size chunks. Returns the count copied,
/// which is less than `limit` only if the reader ran dry.
fn copy_exact<R: Read, W: Write>(reader: &mut R, writer: &mut W, limit: u64) -> io::Result<u64> {
    let mut buf = [0u8; FILE_CHUNK];
    let mut copied = 0u64;
    while copied < limit {
        let want = usize::try_from((limit - copied).min(FILE_CHUNK as u64))
            .unwrap_or(FILE_CHUNK);
        let n = reader.read(&mut buf[..want])?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
        copied += n as u64;
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn roundtrip_simple_frame() {
        let mut wire = Vec::new();
        write_frame(&mut wire, 7, b"hello, seat 3").unwrap();

        let mut cursor = Cursor::new(&wire);
        let (msg_type, payload) = read_frame(&mut cursor).unwrap();
        assert_eq!(msg_type, 7);
        assert_eq!(payload, b"hello, seat 3");
    }

    #[test]
    fn roundtrip_empty_payload() {
        // A bare signal frame (e.g. round-over) has len == 2.
        let mut wire = Vec::new();
        write_frame(&mut wire, 16, b"").unwrap();
        assert_eq!(&wire[..4], &2u32.to_be_bytes());

        let mut cursor = Cursor::new(&wire);
        let (msg_type, payload) = read_frame(&mut cursor).unwrap();
        assert_eq!(msg_type, 16);
        assert!(payload.is_empty());
    }

    #[test]
    fn header_carries_version_and_type() {
        let mut wire = Vec::new();
        write_frame(&mut wire, 42, b"xy").unwrap();

        let mut cursor = Cursor::new(&wire);
        let header = read_header(&mut cursor).unwrap();
        assert_eq!(header.version, PROTOCOL_VERSION);
        assert_eq!(header.msg_type, 42);
        assert_eq!(header.payload_len, 2);
    }

    #[test]
    fn rejects_oversized_write() {
        let big = vec![0u8; MAX_FRAME_SIZE as usize];
        let mut wire = Vec::new();
        let err = write_frame(&mut wire, 1, &big).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn rejects_oversized_read() {
        let fake_len = (MAX_FRAME_SIZE + 1).to_be_bytes();
        let mut cursor = Cursor::new(fake_len.to_vec());
        let err = read_header(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn rejects_undersized_length() {
        // len < 2 cannot hold the version/type pair.
        let mut wire = Vec::new();
        wire.extend_from_slice(&1u32.to_be_bytes());
        wire.push(0);
        let mut cursor = Cursor::new(wire);
        let err = read_header(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn read_unexpected_eof() {
        // Only 2 bytes when 4 are needed for the length prefix.
        let mut cursor = Cursor::new(vec![0u8, 1]);
        let err = read_header(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn truncated_payload_is_eof() {
        let mut wire = Vec::new();
        write_frame(&mut wire, 3, b"abcdef").unwrap();
        wire.truncate(wire.len() - 3);

        let mut cursor = Cursor::new(&wire);
        let err = read_frame(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn multiple_frames_in_sequence() {
        let frames: Vec<(u8, &[u8])> = vec![(1, b""), (4, b"batch"), (11, b"hi all")];
        let mut wire = Vec::new();
        for (msg_type, payload) in &frames {
            write_frame(&mut wire, *msg_type, payload).unwrap();
        }

        let mut cursor = Cursor::new(&wire);
        for (msg_type, payload) in &frames {
            let (got_type, got_payload) = read_frame(&mut cursor).unwrap();
            assert_eq!(got_type, *msg_type);
            assert_eq!(got_payload, *payload);
        }
    }

    #[test]
    fn file_payload_roundtrip() {
        let dir = std::env::temp_dir();
        let path = dir.join("crownfall_framing_test_map.bin");
        let contents: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &contents).unwrap();

        let mut wire = Vec::new();
        write_frame_from_file(&mut wire, 3, &path).unwrap();

        let mut cursor = Cursor::new(&wire);
        let header = read_header(&mut cursor).unwrap();
        assert_eq!(header.msg_type, 3);
        assert_eq!(header.payload_len as usize, contents.len());

        let mut out = Vec::new();
        let copied = read_payload_to_file(&mut cursor, header.payload_len, &mut out).unwrap();
        assert_eq!(copied as usize, contents.len());
        assert_eq!(out, contents);

        std::fs::remove_file(&path).ok();
    }
}
