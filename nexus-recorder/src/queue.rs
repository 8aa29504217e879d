use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use nexus_types::Gate;

use crate::{RecorderError, RecorderResult};

/// Шаг опроса флага остановки при блокирующих операциях очереди.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Создаёт очередь окон: производитель для рабочего потока и потребитель
/// для оркестратора. Оба отменяются флагом `stop_flag`.
pub fn gate_channel(
    capacity: usize,
    stop_flag: Arc<AtomicBool>,
) -> (GateProducer, GateQueue) {
    let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));

    (
        GateProducer {
            sender,
            stop_flag: stop_flag.clone(),
        },
        GateQueue {
            receiver,
            stop_flag,
        },
    )
}

/// Сторона рабочего потока. Окна попадают в очередь строго в порядке
/// завершения их меток времени.
pub struct GateProducer {
    sender: Sender<Gate>,
    stop_flag: Arc<AtomicBool>,
}

/// Сторона потребителя: блокирующее извлечение с отменой по флагу.
///
/// Когда производитель завершился, извлечение возвращает оставшиеся окна
/// и затем `None` без ожидания таймаута.
pub struct GateQueue {
    receiver: Receiver<Gate>,
    stop_flag: Arc<AtomicBool>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl GateProducer {
    /// Кладёт окно, ожидая места. При остановке с полной очередью окно
    /// теряется и возвращается ошибка.
    pub fn push(
        &self,
        mut gate: Gate,
    ) -> RecorderResult<()> {
        loop {
            match self.sender.send_timeout(gate, POLL_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(g)) => {
                    if self.stop_flag.load(Ordering::Relaxed) {
                        return Err(RecorderError::queue(format!(
                            "stopped with full queue, gate {} dropped",
                            g.index
                        )));
                    }
                    gate = g;
                }
                Err(SendTimeoutError::Disconnected(g)) => {
                    return Err(RecorderError::queue(format!(
                        "consumer closed, gate {} dropped",
                        g.index
                    )));
                }
            }
        }
    }
}

impl GateQueue {
    /// Ждёт следующее окно не дольше `timeout`.
    ///
    /// `None`: истёк таймаут, выставлен флаг остановки при пустой очереди,
    /// либо производитель завершился и очередь пуста.
    pub fn pop(
        &self,
        timeout: Duration,
    ) -> Option<Gate> {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let step = remaining.min(POLL_INTERVAL);

            match self.receiver.recv_timeout(step) {
                Ok(gate) => return Some(gate),
                Err(RecvTimeoutError::Disconnected) => return None,
                Err(RecvTimeoutError::Timeout) => {
                    if remaining.is_zero() || self.stop_flag.load(Ordering::Relaxed) {
                        return self.receiver.try_recv().ok();
                    }
                }
            }
        }
    }

    /// Собирает до `count` окон за общее время `timeout`.
    pub fn collect(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Vec<Gate> {
        let deadline = Instant::now() + timeout;
        let mut gates = Vec::with_capacity(count);

        while gates.len() < count {
            let remaining = deadline.saturating_duration_since(Instant::now());

            match self.pop(remaining) {
                Some(gate) => gates.push(gate),
                None => break,
            }
        }

        gates
    }

    /// Забирает всё, что уже лежит в очереди.
    pub fn drain(&self) -> Vec<Gate> {
        self.receiver.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn gate(index: usize) -> Gate {
        Gate {
            index,
            ..Default::default()
        }
    }

    #[test]
    fn test_fifo_order() {
        let stop = Arc::new(AtomicBool::new(false));
        let (producer, queue) = gate_channel(8, stop);

        for i in 0..5 {
            producer.push(gate(i)).unwrap();
        }

        let gates = queue.collect(5, Duration::from_millis(100));
        let order: Vec<usize> = gates.iter().map(|g| g.index).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_pop_returns_after_producer_exit() {
        let stop = Arc::new(AtomicBool::new(false));
        let (producer, queue) = gate_channel(4, stop);

        let handle = thread::spawn(move || {
            producer.push(gate(7)).unwrap();
        });
        handle.join().unwrap();

        let start = Instant::now();
        assert_eq!(queue.pop(Duration::from_secs(5)).map(|g| g.index), Some(7));
        assert!(queue.pop(Duration::from_secs(5)).is_none());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_stop_cancels_blocked_push() {
        let stop = Arc::new(AtomicBool::new(false));
        let (producer, queue) = gate_channel(1, stop.clone());

        producer.push(gate(0)).unwrap();
        stop.store(true, Ordering::Relaxed);

        assert!(matches!(
            producer.push(gate(1)),
            Err(RecorderError::Queue(_))
        ));
        assert_eq!(queue.drain().len(), 1);
    }

    #[test]
    fn test_stop_cancels_pop() {
        let stop = Arc::new(AtomicBool::new(true));
        let (_producer, queue) = gate_channel(1, stop);

        let start = Instant::now();
        assert!(queue.pop(Duration::from_secs(5)).is_none());
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
