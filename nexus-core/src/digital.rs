//! Цифровые сигналы в старшем бите градиентных каналов.
//!
//! ```text
//! бит 15      — цифровой сигнал (строб АЦП / опорный такт / разблокировка RF)
//! биты 0..=14 — аналоговое значение, сдвинутое вправо на 1
//! ```

/// Бит цифрового сигнала.
pub const DIGITAL_BIT: u32 = 15;

/// Упаковывает аналоговый отсчёт `value` и цифровой бит `bit`.
#[inline]
pub fn encode_digital(
    value: i16,
    bit: bool,
) -> i16 {
    (((value as u16) >> 1) | ((bit as u16) << DIGITAL_BIT)) as i16
}

/// Аналоговое значение упакованного отсчёта (младший бит потерян).
#[inline]
pub fn decode_analog(raw: i16) -> i16 {
    ((raw as u16) << 1) as i16
}

/// Цифровой бит упакованного отсчёта.
#[inline]
pub fn decode_digital(raw: i16) -> bool {
    (raw as u16) >> DIGITAL_BIT == 1
}

/// Упаковывает канал целиком.
pub fn pack_channel(
    analog: &[i16],
    digital: &[bool],
) -> Vec<i16> {
    analog
        .iter()
        .zip(digital)
        .map(|(&v, &bit)| encode_digital(v, bit))
        .collect()
}
