/// Zeroed, 16-byte aligned backing memory of `bytes` bytes.
pub(crate) fn arena(bytes: usize) -> Vec<u128> {
  vec![0u128; bytes / 16]
}
