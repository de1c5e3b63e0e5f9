/// Byte-wise XOR over a serialized message (header bytes then data bytes)
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, b| acc ^ b)
}

/// Validate a transmitted checksum byte
pub fn verify_xor_checksum(data: &[u8], expected: u8) -> bool {
    xor_checksum(data) == expected
}
