//! Fold-complement checksum (Internet checksum style) over header and payload bytes.
//!
//! This is a transmission-corruption detector, not a tamper-proof hash.

/// Sums the data as big-endian 16 bit words (zero-padding a trailing odd byte), folds the carries
///  back into the low 16 bits and returns the one's complement.
///
/// NB: When computing the checksum for a packet, the checksum field must be zeroed.
pub fn compute(data: &[u8]) -> u16 {
    let mut sum = 0u32;

    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;
        // fold early so the accumulator can never overflow, regardless of the buffer size
        if sum > 0xffff {
            sum = (sum & 0xffff) + (sum >> 16);
        }
    }
    if let [last] = words.remainder() {
        sum += (*last as u32) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

pub fn verify(data: &[u8], checksum: u16) -> bool {
    compute(data) == checksum
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::empty(vec![], 0xffff)]
    #[case::single_zero(vec![0], 0xffff)]
    #[case::odd_byte_padded(vec![0x12], 0xedff)]
    #[case::one_word(vec![0x12, 0x34], 0xedcb)]
    #[case::two_words(vec![0x00, 0x01, 0xf2, 0x03], 0x0dfb)]
    #[case::carry_folded(vec![0xff, 0xff, 0x00, 0x01], 0xfffe)]
    #[case::all_ones(vec![0xff, 0xff, 0xff, 0xff], 0x0000)]
    #[case::rfc1071_example(vec![0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7], 0x220d)]
    fn test_compute(#[case] data: Vec<u8>, #[case] expected: u16) {
        assert_eq!(compute(&data), expected);
    }

    #[rstest]
    #[case::empty(b"".to_vec())]
    #[case::hello(b"HELLO".to_vec())]
    #[case::binary(vec![0, 1, 2, 3, 254, 255, 128, 127])]
    #[case::long((0..=255u8).cycle().take(1500).collect())]
    fn test_verify_own_checksum(#[case] data: Vec<u8>) {
        assert!(verify(&data, compute(&data)));
    }

    #[rstest]
    #[case::hello(b"HELLO".to_vec())]
    #[case::binary(vec![0, 1, 2, 3, 254, 255, 128, 127])]
    #[case::zeros(vec![0; 16])]
    #[case::long((0..=255u8).cycle().take(1500).collect())]
    fn test_single_bit_flip_is_detected(#[case] data: Vec<u8>) {
        let checksum = compute(&data);
        for byte in 0..data.len() {
            for bit in 0..8 {
                let mut corrupted = data.clone();
                corrupted[byte] ^= 1 << bit;
                assert!(!verify(&corrupted, checksum), "flip of bit {} in byte {} was not detected", bit, byte);
            }
        }
    }

    #[rstest]
    #[case::swap_within_word(b"HELLO".to_vec(), 0, 1)]
    #[case::swap_across_words(b"HELLO".to_vec(), 1, 2)]
    #[case::swap_with_padded_byte(b"HELLO".to_vec(), 3, 4)]
    #[case::binary(vec![1, 2, 3, 4, 5, 6], 0, 3)]
    fn test_order_sensitive(#[case] data: Vec<u8>, #[case] a: usize, #[case] b: usize) {
        let mut permuted = data.clone();
        permuted.swap(a, b);
        assert_ne!(permuted, data);
        assert_ne!(compute(&permuted), compute(&data));
    }

    /// Swapping two complete, aligned 16 bit words leaves the sum unchanged - this is inherent in
    ///  the algorithm and the reason it is excluded from the order sensitivity property
    #[test]
    fn test_word_swap_is_not_detected() {
        let data = vec![1, 2, 3, 4];
        let swapped = vec![3, 4, 1, 2];
        assert_eq!(compute(&data), compute(&swapped));
    }
}
