use nexus_types::{ConsoleError, ConsoleResult};

/// Кольцевой буфер хоста для DMA передачи.
///
/// Размер кратен notify и размеру кадра (`2 × каналы`). Счётчик
/// переданных байт только растёт; позиция в кольце равна счётчику по
/// модулю размера. Буфером владеет один движок.
#[derive(Debug)]
pub struct RingBuffer {
    data: Box<[u8]>,
    notify_size: usize,
    transferred: u64,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl RingBuffer {
    pub fn new(
        size: usize,
        notify_size: usize,
        frame_bytes: usize,
    ) -> ConsoleResult<Self> {
        Self::check_geometry(size, notify_size, frame_bytes)?;

        Ok(Self {
            data: vec![0u8; size].into_boxed_slice(),
            notify_size,
            transferred: 0,
        })
    }

    /// Проверяет размеры кольца без выделения памяти.
    pub fn check_geometry(
        size: usize,
        notify_size: usize,
        frame_bytes: usize,
    ) -> ConsoleResult<()> {
        if size == 0 || notify_size == 0 || frame_bytes == 0 {
            return Err(ConsoleError::buffer_alignment(format!(
                "sizes must be non-zero (buffer {size}, notify {notify_size}, frame {frame_bytes})"
            )));
        }

        if size % notify_size != 0 {
            return Err(ConsoleError::buffer_alignment(format!(
                "buffer size {size} is not a multiple of notify size {notify_size}"
            )));
        }

        if size % frame_bytes != 0 || notify_size % frame_bytes != 0 {
            return Err(ConsoleError::buffer_alignment(format!(
                "buffer size {size} / notify size {notify_size} not a multiple of frame size {frame_bytes}"
            )));
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn notify_size(&self) -> usize {
        self.notify_size
    }

    /// Всего передано байт.
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// Текущая позиция в кольце.
    pub fn position(&self) -> usize {
        (self.transferred % self.data.len() as u64) as usize
    }

    pub fn advance(
        &mut self,
        bytes: usize,
    ) {
        self.transferred += bytes as u64;
    }

    pub fn reset(&mut self) {
        self.transferred = 0;
    }

    /// Пишет `src` с позиции `offset`. Возвращает `true`, если запись
    /// разбита на две части на конце кольца.
    pub fn write_at(
        &mut self,
        offset: usize,
        src: &[u8],
    ) -> bool {
        let size = self.data.len();
        let offset = offset % size;
        let first = src.len().min(size - offset);

        self.data[offset..offset + first].copy_from_slice(&src[..first]);

        let rest = &src[first..];
        self.data[..rest.len()].copy_from_slice(rest);

        !rest.is_empty()
    }

    /// Дописывает `len` байт с позиции `offset` в `dst`. Возвращает `true`
    /// при разбиении чтения.
    pub fn read_at(
        &self,
        offset: usize,
        len: usize,
        dst: &mut Vec<u8>,
    ) -> bool {
        let size = self.data.len();
        let offset = offset % size;
        let first = len.min(size - offset);

        dst.extend_from_slice(&self.data[offset..offset + first]);
        dst.extend_from_slice(&self.data[..len - first]);

        len > first
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Заполняет `dst` байтами бесконечного кругового источника `src`,
/// начиная с логической позиции `offset`.
pub fn copy_circular(
    src: &[u8],
    offset: u64,
    dst: &mut [u8],
) {
    if src.is_empty() {
        dst.fill(0);
        return;
    }

    let mut pos = (offset % src.len() as u64) as usize;
    let mut written = 0;

    while written < dst.len() {
        let n = (src.len() - pos).min(dst.len() - written);
        dst[written..written + n].copy_from_slice(&src[pos..pos + n]);
        written += n;
        pos = (pos + n) % src.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_errors() {
        assert!(RingBuffer::new(1024, 128, 8).is_ok());
        assert!(matches!(
            RingBuffer::new(1000, 128, 8),
            Err(ConsoleError::BufferAlignment(_))
        ));
        assert!(matches!(
            RingBuffer::new(1024, 128, 6),
            Err(ConsoleError::BufferAlignment(_))
        ));
        assert!(RingBuffer::new(0, 128, 8).is_err());
    }

    #[test]
    fn test_geometry_check_matches_constructor() {
        // Такой буфер не выделить: проверка обходится без памяти
        let huge = 1usize << (usize::BITS - 4);
        assert!(RingBuffer::check_geometry(huge, 1 << 20, 8).is_ok());
        assert!(matches!(
            RingBuffer::check_geometry(huge + 4, 1 << 20, 8),
            Err(ConsoleError::BufferAlignment(_))
        ));

        for (size, notify, frame) in [(1024, 128, 8), (1000, 128, 8), (1024, 128, 6), (0, 128, 8)] {
            assert_eq!(
                RingBuffer::check_geometry(size, notify, frame).is_ok(),
                RingBuffer::new(size, notify, frame).is_ok()
            );
        }
    }

    #[test]
    fn test_write_wraps_around() {
        let mut ring = RingBuffer::new(8, 4, 2).unwrap();

        assert!(!ring.write_at(0, &[1, 2, 3, 4]));
        assert!(ring.write_at(6, &[5, 6, 7, 8]));
        assert_eq!(ring.as_slice(), &[7, 8, 3, 4, 0, 0, 5, 6]);

        let mut out = Vec::new();
        assert!(ring.read_at(6, 4, &mut out));
        assert_eq!(out, vec![5, 6, 7, 8]);
    }

    #[test]
    fn test_transferred_is_monotonic_and_position_in_range() {
        let mut ring = RingBuffer::new(1024, 128, 8).unwrap();
        let mut last = 0;

        for step in [128, 128, 512, 256, 128, 1024, 128] {
            ring.advance(step);
            assert!(ring.transferred() >= last);
            assert!(ring.position() < ring.len());
            last = ring.transferred();
        }

        assert_eq!(ring.transferred(), 2304);
        assert_eq!(ring.position(), 256);
    }

    #[test]
    fn test_copy_circular() {
        let src = [1u8, 2, 3];
        let mut dst = [0u8; 7];
        copy_circular(&src, 2, &mut dst);

        assert_eq!(dst, [3, 1, 2, 3, 1, 2, 3]);
    }
}
