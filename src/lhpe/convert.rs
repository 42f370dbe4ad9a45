//! Endian-explicit accessors over the on-disk bucket byte format.
//!
//! All multi-byte fields in cluster files are stored little-endian; the
//! choice is recorded in the storage configuration so files stay readable
//! across hosts. When the host byte order matches the disk order the
//! accessors are plain memory copies and callers may treat the raw buffer
//! as authoritative instead of keeping decoded shadow fields.

/// True when the host byte order equals the disk byte order, i.e. integer
/// fields can be read and written through the buffer without a shuffle.
pub const fn native_acceleration_used() -> bool {
    cfg!(target_endian = "little")
}

pub fn put_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

pub fn get_u32(buf: &[u8], off: usize) -> u32 {
    let bytes: [u8; 4] = buf
        .get(off..off + 4)
        .unwrap_or_else(|| panic!("u32 read out of bounds at offset {off}"))
        .try_into()
        .unwrap();
    u32::from_le_bytes(bytes)
}

pub fn put_i32(buf: &mut [u8], off: usize, v: i32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

pub fn get_i32(buf: &[u8], off: usize) -> i32 {
    let bytes: [u8; 4] = buf
        .get(off..off + 4)
        .unwrap_or_else(|| panic!("i32 read out of bounds at offset {off}"))
        .try_into()
        .unwrap();
    i32::from_le_bytes(bytes)
}

pub fn put_u64(buf: &mut [u8], off: usize, v: u64) {
    buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

pub fn get_u64(buf: &[u8], off: usize) -> u64 {
    let bytes: [u8; 8] = buf
        .get(off..off + 8)
        .unwrap_or_else(|| panic!("u64 read out of bounds at offset {off}"))
        .try_into()
        .unwrap();
    u64::from_le_bytes(bytes)
}

pub fn put_i64(buf: &mut [u8], off: usize, v: i64) {
    buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

pub fn get_i64(buf: &[u8], off: usize) -> i64 {
    let bytes: [u8; 8] = buf
        .get(off..off + 8)
        .unwrap_or_else(|| panic!("i64 read out of bounds at offset {off}"))
        .try_into()
        .unwrap();
    i64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_at_offsets() {
        let mut buf = vec![0u8; 64];

        put_i32(&mut buf, 3, -123_456);
        put_i64(&mut buf, 11, i64::MIN + 7);
        put_u64(&mut buf, 24, u64::MAX - 1);
        put_u32(&mut buf, 40, 0xDEAD_BEEF);

        assert_eq!(get_i32(&buf, 3), -123_456);
        assert_eq!(get_i64(&buf, 11), i64::MIN + 7);
        assert_eq!(get_u64(&buf, 24), u64::MAX - 1);
        assert_eq!(get_u32(&buf, 40), 0xDEAD_BEEF);
    }

    #[test]
    fn zeroed_buffer_decodes_to_zero() {
        let buf = vec![0u8; 16];
        assert_eq!(get_i64(&buf, 0), 0);
        assert_eq!(get_i32(&buf, 8), 0);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn read_past_end_panics() {
        let buf = vec![0u8; 8];
        let _ = get_i64(&buf, 4);
    }
}
