use byteorder::{ByteOrder, LittleEndian};

/// Читает отсчёты int16 (little-endian). Нечётный последний байт
/// отбрасывается.
pub fn read_samples_le(src: &[u8]) -> Vec<i16> {
    let even = src.len() & !1;
    let mut out = vec![0i16; even / 2];
    LittleEndian::read_i16_into(&src[..even], &mut out);
    out
}

/// Метка времени из записи буфера меток: первые 8 байт, такты часов.
pub fn read_timestamp(record: &[u8]) -> Option<u64> {
    (record.len() >= 8).then(|| LittleEndian::read_u64(&record[..8]))
}
