//! Симуляторы карт генератора и дигитайзера.
//!
//! Карты ведут журнал записей регистров и команд, поддерживают внедрение
//! ошибки драйвера на заданную команду и моделируют DMA поток через
//! собственную копию кольцевого буфера, синхронизируемую `sync_dma`.

pub mod rx;
pub mod tx;

pub use rx::*;
pub use tx::*;

use std::collections::HashMap;

use crate::{ErrorCode, Register, ERR_OK, SPC_CHENABLE, SPC_M2CMD};

/// Регистры симулятора с журналом.
#[derive(Debug, Default, Clone)]
pub struct SimRegisters {
    values: HashMap<Register, i64>,
    writes: Vec<(Register, i64)>,
    commands: Vec<i32>,
    fault: Option<(i32, ErrorCode)>,
    open: bool,
}

impl SimRegisters {
    pub fn get(
        &self,
        register: Register,
    ) -> i64 {
        self.values.get(&register).copied().unwrap_or(0)
    }

    /// Записывает регистр. Команды уходят в журнал команд.
    pub fn set(
        &mut self,
        register: Register,
        value: i64,
    ) {
        self.writes.push((register, value));

        if register == SPC_M2CMD {
            self.commands.push(value as i32);
        } else {
            self.values.insert(register, value);
        }
    }

    /// Код ошибки, если команда попадает под внедрённую ошибку.
    pub fn fault_for(
        &self,
        mask: i32,
    ) -> ErrorCode {
        match self.fault {
            Some((fault_mask, code)) if mask & fault_mask != 0 => code,
            _ => ERR_OK,
        }
    }

    /// Количество включённых каналов.
    pub fn channel_count(&self) -> usize {
        (self.get(SPC_CHENABLE) as u32).count_ones() as usize
    }

    pub fn writes(&self) -> &[(Register, i64)] {
        &self.writes
    }

    pub fn commands(&self) -> &[i32] {
        &self.commands
    }

    /// Была ли выполнена команда, содержащая все биты `mask`.
    pub fn issued(
        &self,
        mask: i32,
    ) -> bool {
        self.commands.iter().any(|c| c & mask == mask)
    }

    /// Последнее записанное значение регистра.
    pub fn last_write(
        &self,
        register: Register,
    ) -> Option<i64> {
        self.writes
            .iter()
            .rev()
            .find(|(r, _)| *r == register)
            .map(|(_, v)| *v)
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    fn set_open(
        &mut self,
        open: bool,
    ) {
        self.open = open;
    }

    fn inject_fault(
        &mut self,
        mask: i32,
        code: ErrorCode,
    ) {
        self.fault = Some((mask, code));
    }
}

/// Копирует `src` в кольцо `ring` начиная с `pos` с переходом через конец.
fn ring_write(
    ring: &mut [u8],
    pos: usize,
    src: &[u8],
) {
    if ring.is_empty() {
        return;
    }

    let pos = pos % ring.len();
    let first = src.len().min(ring.len() - pos);
    ring[pos..pos + first].copy_from_slice(&src[..first]);
    let rest = &src[first..];
    ring[..rest.len()].copy_from_slice(rest);
}

/// Читает `len` байт из кольца `ring` начиная с `pos`.
fn ring_read(
    ring: &[u8],
    pos: usize,
    len: usize,
) -> Vec<u8> {
    if ring.is_empty() {
        return Vec::new();
    }

    let pos = pos % ring.len();
    let first = len.min(ring.len() - pos);
    let mut out = Vec::with_capacity(len);
    out.extend_from_slice(&ring[pos..pos + first]);
    out.extend_from_slice(&ring[..len - first]);
    out
}
