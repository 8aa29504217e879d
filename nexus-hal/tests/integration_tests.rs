use nexus_hal::{
    BufferKind, Card, Direction, HalError, SimulatedRxCard, SimulatedTxCard, ERR_INVALIDPARAM,
    ERR_NOTIFYSIZE, M2CMD_CARD_START, M2CMD_CARD_STOP, M2CMD_DATA_STARTDMA, M2STAT_CARD_READY,
    SPC_SAMPLERATE, SPC_TIMEOUT,
};

// ===========================================================================
// Helpers
// ===========================================================================

fn open_tx(card: SimulatedTxCard) -> Card<SimulatedTxCard> {
    Card::open(card, "/dev/spcm0", "tx").unwrap()
}

// ===========================================================================
// Card wrapper
// ===========================================================================

#[test]
fn test_open_marks_card_open() {
    let card = open_tx(SimulatedTxCard::new());

    assert!(card.hal().registers().is_open());
    assert_eq!(card.name(), "tx");

    let hal = card.close();
    assert!(!hal.registers().is_open());
}

#[test]
fn test_nonzero_code_stops_card() {
    let mut card = open_tx(SimulatedTxCard::new().with_fault(M2CMD_CARD_START, ERR_NOTIFYSIZE));

    let err = card.command(M2CMD_CARD_START).unwrap_err();

    assert!(matches!(
        err,
        HalError::Command {
            code: ERR_NOTIFYSIZE,
            ..
        }
    ));
    // Сразу после ошибки карта получила команду остановки
    let commands = card.hal().registers().commands();
    assert_eq!(commands.last(), Some(&M2CMD_CARD_STOP));
}

#[test]
fn test_wait_dma_timeout_is_recoverable() {
    let mut card = open_tx(SimulatedTxCard::new());
    let mut ring = vec![0u8; 64];

    card.set_i32(SPC_TIMEOUT, 0).unwrap();
    card.define_transfer(BufferKind::Data, Direction::HostToCard, 16, &mut ring)
        .unwrap();
    card.command(M2CMD_DATA_STARTDMA).unwrap();

    // Нечего воспроизводить — таймаут, но карта не остановлена
    let err = card.wait_dma().unwrap_err();
    assert!(err.is_timeout());
    assert!(!card.hal().registers().issued(M2CMD_CARD_STOP));
}

#[test]
fn test_define_transfer_rejects_bad_notify() {
    let mut card = open_tx(SimulatedTxCard::new());
    let mut ring = vec![0u8; 100];

    let err = card
        .define_transfer(BufferKind::Data, Direction::HostToCard, 16, &mut ring)
        .unwrap_err();

    assert_eq!(err.code(), ERR_INVALIDPARAM);
}

#[test]
fn test_register_readback_and_status() {
    let mut card = Card::open(SimulatedRxCard::new(Vec::new()), "/dev/spcm1", "rx").unwrap();

    card.set_i64(SPC_SAMPLERATE, 20_000_000).unwrap();

    assert_eq!(card.get_i64(SPC_SAMPLERATE).unwrap(), 20_000_000);
    assert_ne!(card.status().unwrap() & M2STAT_CARD_READY, 0);
    card.log_status().unwrap();
}
