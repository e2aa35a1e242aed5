// tests/unit_codec_test.rs

use bytes::BytesMut;
use tidemail::TidemailError;
use tidemail::imap::LineCodec;
use tokio_util::codec::{Decoder, Encoder};

#[tokio::test]
async fn test_encode_appends_crlf() {
    let mut codec = LineCodec;
    let mut buf = BytesMut::new();
    codec.encode("t0001 NOOP".to_string(), &mut buf).unwrap();
    assert_eq!(&buf[..], b"t0001 NOOP\r\n");
}

#[tokio::test]
async fn test_encode_rejects_embedded_line_breaks() {
    let mut codec = LineCodec;
    let mut buf = BytesMut::new();
    let err = codec
        .encode("t0001 LOGIN a\r\nt0002 NOOP".to_string(), &mut buf)
        .unwrap_err();
    assert!(matches!(err, TidemailError::InvalidRequest(_)));
    assert!(buf.is_empty());
}

#[tokio::test]
async fn test_decode_single_line() {
    let mut codec = LineCodec;
    let mut buf = BytesMut::from(&b"* OK ready\r\n"[..]);
    let line = codec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(line, "* OK ready");
    assert!(buf.is_empty());
}

#[tokio::test]
async fn test_decode_waits_for_complete_line() {
    let mut codec = LineCodec;
    let mut buf = BytesMut::from(&b"* OK rea"[..]);
    assert!(codec.decode(&mut buf).unwrap().is_none());

    buf.extend_from_slice(b"dy\r\n");
    let line = codec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(line, "* OK ready");
}

#[tokio::test]
async fn test_decode_splits_consecutive_lines() {
    let mut codec = LineCodec;
    let mut buf = BytesMut::from(&b"* 3 EXISTS\r\nt0001 OK done\r\n"[..]);
    assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "* 3 EXISTS");
    assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "t0001 OK done");
    assert!(codec.decode(&mut buf).unwrap().is_none());
}

#[tokio::test]
async fn test_decode_keeps_bare_cr() {
    let mut codec = LineCodec;
    let mut buf = BytesMut::from(&b"a\rb\r\n"[..]);
    assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "a\rb");
}

#[tokio::test]
async fn test_decode_rejects_oversized_line() {
    let mut codec = LineCodec;
    let mut buf = BytesMut::new();
    buf.resize(1024 * 1024 + 1, b'x');
    let err = codec.decode(&mut buf).unwrap_err();
    assert!(matches!(err, TidemailError::Protocol(_)));
}

#[tokio::test]
async fn test_decode_rejects_oversized_terminated_line() {
    // The limit also applies when the terminator arrives in the same read.
    let mut codec = LineCodec;
    let mut buf = BytesMut::new();
    buf.resize(1024 * 1024 + 1, b'x');
    buf.extend_from_slice(b"\r\n");
    let err = codec.decode(&mut buf).unwrap_err();
    assert!(matches!(err, TidemailError::Protocol(_)));
}
