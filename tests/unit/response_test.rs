//! Unit tests for image payload helpers

use imagegen_dispatch::response::base64;

const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];

#[test]
fn test_base64_decode_data_url() {
    let data_url = "data:image/png;base64,SGVsbG8sIFdvcmxkIQ==";
    let decoded = tokio_test::assert_ok!(base64::decode(data_url));

    assert_eq!(b"Hello, World!", decoded.as_slice());
}

#[test]
fn test_base64_decode_rejects_garbage() {
    tokio_test::assert_err!(base64::decode("not valid base64!!!"));
}

#[test]
fn test_sniff_media_type() {
    assert_eq!(base64::sniff_media_type(PNG_HEADER), Some("image/png"));
    assert_eq!(base64::sniff_media_type(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
    assert_eq!(base64::sniff_media_type(b"RIFF\0\0\0\0WEBPVP8 "), Some("image/webp"));
    assert_eq!(base64::sniff_media_type(b"GIF89a.."), Some("image/gif"));
    assert_eq!(base64::sniff_media_type(b"plain text"), None);
}

#[test]
fn test_resolve_media_type_prefers_declared() {
    assert_eq!(base64::resolve_media_type(Some("image/webp"), PNG_HEADER), "image/webp");
    assert_eq!(base64::resolve_media_type(Some("  "), PNG_HEADER), "image/png");
    assert_eq!(base64::resolve_media_type(None, &[0xFF, 0xD8, 0xFF]), "image/jpeg");
    assert_eq!(base64::resolve_media_type(None, b"unknown"), "image/png");
}
