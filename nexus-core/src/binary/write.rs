use byteorder::{ByteOrder, LittleEndian};

/// Записывает отсчёты в `dst` (little-endian). `dst` должен вмещать
/// `2 × samples.len()` байт.
pub fn write_samples_le(
    dst: &mut [u8],
    samples: &[i16],
) {
    LittleEndian::write_i16_into(samples, &mut dst[..samples.len() * 2]);
}

/// Байтовое представление отсчётов.
pub fn samples_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = vec![0u8; samples.len() * 2];
    write_samples_le(&mut out, samples);
    out
}
