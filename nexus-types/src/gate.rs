/// Одно окно захвата, ограниченное двумя аппаратными метками времени.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Gate {
    /// Порядковый номер окна в сессии
    pub index: usize,
    /// Метка начала (секунды часов устройства)
    pub t_start: f64,
    /// Метка конца (секунды часов устройства)
    pub t_end: f64,
    /// Ожидаемое количество отсчётов на канал
    pub sample_count: usize,
    /// Отсчёты по каналам после отбрасывания pre-trigger
    pub channels: Vec<Vec<i16>>,
    /// Окно оборвано до получения всех отсчётов
    pub truncated: bool,
}

impl Gate {
    /// Длина окна в отсчётах (фактически полученных).
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Длительность окна по меткам времени (секунды)
    pub fn duration(&self) -> f64 {
        self.t_end - self.t_start
    }

    /// Собирает окно из чередующихся отсчётов `[ch0, ch1, ..., ch0, ...]`.
    /// Неполный последний кадр отбрасывается.
    pub fn from_interleaved(
        index: usize,
        t_start: f64,
        t_end: f64,
        sample_count: usize,
        interleaved: &[i16],
        num_channels: usize,
    ) -> Self {
        let frames = interleaved.len() / num_channels.max(1);
        let mut channels = vec![Vec::with_capacity(frames); num_channels];

        for frame in interleaved.chunks_exact(num_channels.max(1)) {
            for (ch, &v) in frame.iter().enumerate() {
                channels[ch].push(v);
            }
        }

        Self {
            index,
            t_start,
            t_end,
            sample_count,
            channels,
            truncated: frames < sample_count,
        }
    }
}
