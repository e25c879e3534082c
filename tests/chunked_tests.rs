use webserv::http::{ChunkDecoder, ChunkError};

fn encode_chunked(payload: &[u8], chunk_size: usize) -> Vec<u8> {
    let mut wire = Vec::new();
    for chunk in payload.chunks(chunk_size.max(1)) {
        wire.extend_from_slice(format!("{:X}\r\n", chunk.len()).as_bytes());
        wire.extend_from_slice(chunk);
        wire.extend_from_slice(b"\r\n");
    }
    wire.extend_from_slice(b"0\r\n\r\n");
    wire
}

#[test]
fn test_decode_single_chunk() {
    let mut decoder = ChunkDecoder::new();
    let mut out = Vec::new();

    decoder.feed(b"5\r\nHello\r\n0\r\n\r\n", &mut out).unwrap();

    assert!(decoder.finished());
    assert_eq!(out, b"Hello");
}

#[test]
fn test_decode_multiple_chunks() {
    let mut decoder = ChunkDecoder::new();
    let mut out = Vec::new();

    decoder
        .feed(b"5\r\nHello\r\n7\r\n World!\r\n0\r\n\r\n", &mut out)
        .unwrap();

    assert!(decoder.finished());
    assert_eq!(out, b"Hello World!");
}

#[test]
fn test_roundtrip_arbitrary_bytes() {
    let payload: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();

    for chunk_size in [1, 7, 1024, 65536] {
        let wire = encode_chunked(&payload, chunk_size);
        let mut decoder = ChunkDecoder::new();
        let mut out = Vec::new();
        decoder.feed(&wire, &mut out).unwrap();
        assert!(decoder.finished());
        assert_eq!(out, payload, "chunk size {}", chunk_size);
    }
}

#[test]
fn test_size_line_split_across_reads() {
    let mut decoder = ChunkDecoder::new();
    let mut out = Vec::new();

    // "B\r\n" arrives one byte at a time
    decoder.feed(b"B", &mut out).unwrap();
    decoder.feed(b"\r", &mut out).unwrap();
    decoder.feed(b"\n", &mut out).unwrap();
    assert!(out.is_empty());

    decoder.feed(b"Rust Stream\r\n", &mut out).unwrap();
    assert_eq!(out, b"Rust Stream");
    assert!(!decoder.finished());

    decoder.feed(b"0\r\n\r\n", &mut out).unwrap();
    assert!(decoder.finished());
}

#[test]
fn test_data_split_across_reads() {
    let mut decoder = ChunkDecoder::new();
    let mut out = Vec::new();

    decoder.feed(b"A\r\nHello", &mut out).unwrap();
    assert_eq!(out, b"Hello");

    decoder.feed(b" Rust\r\n0\r\n\r\n", &mut out).unwrap();
    assert!(decoder.finished());
    assert_eq!(out, b"Hello Rust");
}

#[test]
fn test_trailing_crlf_split_across_reads() {
    let mut decoder = ChunkDecoder::new();
    let mut out = Vec::new();

    decoder.feed(b"5\r\nHello\r", &mut out).unwrap();
    assert_eq!(out, b"Hello");
    assert!(!decoder.finished());

    decoder.feed(b"\n0\r\n", &mut out).unwrap();
    assert!(!decoder.finished());

    decoder.feed(b"\r\n", &mut out).unwrap();
    assert!(decoder.finished());
}

#[test]
fn test_trailers_are_ignored() {
    let mut decoder = ChunkDecoder::new();
    let mut out = Vec::new();

    decoder
        .feed(b"3\r\nabc\r\n0\r\nX-Checksum: 99\r\n\r\n", &mut out)
        .unwrap();

    assert!(decoder.finished());
    assert_eq!(out, b"abc");
    assert!(decoder.take_remainder().is_empty());
}

#[test]
fn test_pipelined_bytes_survive_terminator() {
    let mut decoder = ChunkDecoder::new();
    let mut out = Vec::new();

    decoder
        .feed(b"2\r\nhi\r\n0\r\n\r\nGET /next HTTP/1.1\r\n", &mut out)
        .unwrap();

    assert!(decoder.finished());
    assert_eq!(out, b"hi");
    assert_eq!(decoder.take_remainder(), b"GET /next HTTP/1.1\r\n");
}

#[test]
fn test_invalid_size_line() {
    let mut decoder = ChunkDecoder::new();
    let mut out = Vec::new();

    assert_eq!(
        decoder.feed(b"zz\r\ndata\r\n", &mut out),
        Err(ChunkError::InvalidSize)
    );
}

#[test]
fn test_missing_chunk_terminator() {
    let mut decoder = ChunkDecoder::new();
    let mut out = Vec::new();

    // 3-byte chunk followed by garbage instead of CRLF
    assert_eq!(
        decoder.feed(b"3\r\nabcXX", &mut out),
        Err(ChunkError::InvalidFraming)
    );
}

#[test]
fn test_chunk_extension_ignored() {
    let mut decoder = ChunkDecoder::new();
    let mut out = Vec::new();

    decoder.feed(b"5;ext=1\r\nHello\r\n0\r\n\r\n", &mut out).unwrap();

    assert!(decoder.finished());
    assert_eq!(out, b"Hello");
}

#[test]
fn test_hex_sizes_parse() {
    let mut decoder = ChunkDecoder::new();
    let mut out = Vec::new();

    let payload = vec![b'x'; 0x1A];
    let mut wire = b"1A\r\n".to_vec();
    wire.extend_from_slice(&payload);
    wire.extend_from_slice(b"\r\n0\r\n\r\n");

    decoder.feed(&wire, &mut out).unwrap();
    assert_eq!(out, payload);
}
