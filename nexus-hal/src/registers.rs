//! Карта регистров и команд карт генератора/дигитайзера (семейство M2p).
//! Значения совпадают с заголовками драйвера производителя.

/// Регистр карты.
pub type Register = i32;

// Команды
pub const SPC_M2CMD: Register = 100;
pub const M2CMD_CARD_RESET: i32 = 0x1;
pub const M2CMD_CARD_WRITESETUP: i32 = 0x2;
pub const M2CMD_CARD_START: i32 = 0x4;
pub const M2CMD_CARD_ENABLETRIGGER: i32 = 0x8;
pub const M2CMD_CARD_FORCETRIGGER: i32 = 0x10;
pub const M2CMD_CARD_DISABLETRIGGER: i32 = 0x20;
pub const M2CMD_CARD_STOP: i32 = 0x40;
pub const M2CMD_DATA_STARTDMA: i32 = 0x10000;
pub const M2CMD_DATA_WAITDMA: i32 = 0x20000;
pub const M2CMD_DATA_STOPDMA: i32 = 0x40000;
pub const M2CMD_EXTRA_STARTDMA: i32 = 0x100000;
pub const M2CMD_EXTRA_WAITDMA: i32 = 0x200000;
pub const M2CMD_EXTRA_STOPDMA: i32 = 0x400000;
pub const M2CMD_EXTRA_POLL: i32 = 0x800000;

// Статус
pub const SPC_M2STATUS: Register = 110;
pub const M2STAT_CARD_PRETRIGGER: i32 = 0x1;
pub const M2STAT_CARD_TRIGGER: i32 = 0x2;
pub const M2STAT_CARD_READY: i32 = 0x4;
pub const M2STAT_CARD_SEGMENT_PRETRG: i32 = 0x8;
pub const M2STAT_DATA_BLOCKREADY: i32 = 0x100;
pub const M2STAT_DATA_END: i32 = 0x200;
pub const M2STAT_DATA_OVERRUN: i32 = 0x400;
pub const M2STAT_DATA_ERROR: i32 = 0x800;

// Счётчики DMA буфера данных
pub const SPC_DATA_AVAIL_USER_LEN: Register = 200;
pub const SPC_DATA_AVAIL_USER_POS: Register = 201;
pub const SPC_DATA_AVAIL_CARD_LEN: Register = 202;

// Счётчики буфера меток времени
pub const SPC_TS_AVAIL_USER_LEN: Register = 220;
pub const SPC_TS_AVAIL_USER_POS: Register = 221;
pub const SPC_TS_AVAIL_CARD_LEN: Register = 222;

// Общая настройка
pub const SPC_PCITYP: Register = 2000;
pub const SPC_CARDMODE: Register = 9500;
pub const SPC_REP_FIFO_SINGLE: i32 = 0x800;
pub const SPC_REC_FIFO_GATE: i32 = 0x20;
pub const SPC_SEGMENTSIZE: Register = 10010;
pub const SPC_LOOPS: Register = 10020;
pub const SPC_PRETRIGGER: Register = 10030;
pub const SPC_POSTTRIGGER: Register = 10100;
pub const SPC_CHENABLE: Register = 11000;
pub const SPC_CHCOUNT: Register = 11001;
pub const SPC_SAMPLERATE: Register = 20000;
pub const SPC_CLOCKMODE: Register = 20200;
pub const SPC_CM_INTPLL: i32 = 1;
pub const SPC_TIMEOUT: Register = 295130;

// Каналы
pub const CHANNEL0: i32 = 0x1;
pub const CHANNEL1: i32 = 0x2;
pub const CHANNEL2: i32 = 0x4;
pub const CHANNEL3: i32 = 0x8;

/// Маска включения первых `n` каналов.
pub fn channel_mask(n: usize) -> i32 {
    [CHANNEL0, CHANNEL1, CHANNEL2, CHANNEL3]
        .iter()
        .take(n)
        .fold(0, |acc, ch| acc | ch)
}

// Аналоговые выходы/входы: регистр канала `k` = базовый + 100 * k
pub const SPC_AMP0: Register = 30010;
pub const SPC_FILTER0: Register = 30080;
pub const SPC_ENABLEOUT0: Register = 30091;
pub const SPC_50OHM0: Register = 30030;
pub const SPC_CHANNEL_STRIDE: Register = 100;

/// Регистр канала `channel` по базовому регистру канала 0.
pub fn channel_register(
    base: Register,
    channel: usize,
) -> Register {
    base + SPC_CHANNEL_STRIDE * channel as Register
}

// Триггер
pub const SPC_TRIG_ORMASK: Register = 40410;
pub const SPC_TMASK_SOFTWARE: i32 = 0x1;
pub const SPC_TMASK_EXT1: i32 = 0x4;
pub const SPC_TRIG_EXT1_MODE: Register = 40520;
pub const SPC_TM_POS: i32 = 0x1;

// Метки времени
pub const SPC_TIMESTAMP_CMD: Register = 47000;
pub const SPC_TSMODE_STARTRESET: i32 = 0x4;
pub const SPC_TSCNT_INTERNAL: i32 = 0x100;

/// Размер одной записи метки времени (байт).
pub const TIMESTAMP_RECORD_BYTES: usize = 16;

// Многофункциональные линии X1..X3
pub const SPCM_X1_MODE: Register = 47210;
pub const SPCM_X2_MODE: Register = 47220;
pub const SPCM_X3_MODE: Register = 47230;
pub const SPCM_XMODE_DIGIN: i32 = 0x4;
pub const SPCM_XMODE_DIGOUT: i32 = 0x8;
pub const SPCM_XMODE_DIGOUTSRC_CH1: i32 = 0x0200_0000;
pub const SPCM_XMODE_DIGOUTSRC_CH2: i32 = 0x0400_0000;
pub const SPCM_XMODE_DIGOUTSRC_CH3: i32 = 0x0800_0000;
pub const SPCM_XMODE_DIGOUTSRC_BIT15: i32 = 0x1000_0000;
pub const SPC_DIGMODE0: Register = 47250;
pub const DIGMODEMASK_BIT15: i32 = 0x0000_001F;
pub const SPCM_DIGMODE_X2: i32 = 0x0000_0011;

/// Флаги статуса карты в читаемом виде.
pub fn status_flags(status: i32) -> Vec<&'static str> {
    [
        (M2STAT_CARD_PRETRIGGER, "M2STAT_CARD_PRETRIGGER"),
        (M2STAT_CARD_TRIGGER, "M2STAT_CARD_TRIGGER"),
        (M2STAT_CARD_READY, "M2STAT_CARD_READY"),
        (M2STAT_CARD_SEGMENT_PRETRG, "M2STAT_CARD_SEGMENT_PRETRG"),
        (M2STAT_DATA_BLOCKREADY, "M2STAT_DATA_BLOCKREADY"),
        (M2STAT_DATA_END, "M2STAT_DATA_END"),
        (M2STAT_DATA_OVERRUN, "M2STAT_DATA_OVERRUN"),
        (M2STAT_DATA_ERROR, "M2STAT_DATA_ERROR"),
    ]
    .into_iter()
    .filter(|(bit, _)| status & bit != 0)
    .map(|(_, name)| name)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_mask() {
        assert_eq!(channel_mask(0), 0);
        assert_eq!(channel_mask(2), 0x3);
        assert_eq!(channel_mask(4), 0xF);
        assert_eq!(channel_mask(8), 0xF);
    }

    #[test]
    fn test_channel_register_stride() {
        assert_eq!(channel_register(SPC_AMP0, 0), 30010);
        assert_eq!(channel_register(SPC_AMP0, 3), 30310);
    }

    #[test]
    fn test_status_flags() {
        let flags = status_flags(M2STAT_CARD_READY | M2STAT_DATA_OVERRUN);
        assert_eq!(flags, vec!["M2STAT_CARD_READY", "M2STAT_DATA_OVERRUN"]);
        assert!(status_flags(0).is_empty());
    }
}
