use num_complex::Complex64;
use rustfft::FftPlanner;

/// Передискретизация комплексного сигнала через спектр (как периодического).
///
/// Спектр обрезается или дополняется нулями до длины `target`; бин
/// Найквиста при чётной длине делится пополам. Постоянный сигнал остаётся
/// постоянным, при равных длинах вход возвращается без изменений.
pub fn fourier_resample(
    signal: &[Complex64],
    target: usize,
) -> Vec<Complex64> {
    let len = signal.len();

    if target == len {
        return signal.to_vec();
    }
    if len == 0 || target == 0 {
        return vec![Complex64::new(0.0, 0.0); target];
    }

    let mut planner = FftPlanner::<f64>::new();

    let mut spectrum = signal.to_vec();
    planner.plan_fft_forward(len).process(&mut spectrum);

    let n = len.min(target);
    let half = n / 2;
    let mut out = vec![Complex64::new(0.0, 0.0); target];

    out[0] = spectrum[0];
    for k in 1..(n + 1) / 2 {
        out[k] = spectrum[k];
        out[target - k] = spectrum[len - k];
    }

    if n % 2 == 0 {
        if target > len {
            let nyquist = spectrum[half] * 0.5;
            out[half] += nyquist;
            out[target - half] += nyquist;
        } else {
            out[half] = spectrum[half] + spectrum[len - half];
        }
    }

    planner.plan_fft_inverse(target).process(&mut out);

    let scale = 1.0 / len as f64;
    out.iter_mut().for_each(|v| *v *= scale);
    out
}

/// `n` равноотстоящих точек от `start` до `end` включительно.
pub fn linspace(
    start: f64,
    end: f64,
    n: usize,
) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n)
                .map(|i| {
                    if i == n - 1 {
                        end
                    } else {
                        start + step * i as f64
                    }
                })
                .collect()
        }
    }
}

/// Линейная интерполяция `fp(xp)` в точках `x`. За краями `xp`
/// используются крайние значения. Для невозрастающей `xp` результат
/// не определён, но паники нет.
pub fn interp(
    x: &[f64],
    xp: &[f64],
    fp: &[f64],
) -> Vec<f64> {
    let len = xp.len().min(fp.len());

    if len == 0 {
        return vec![0.0; x.len()];
    }

    x.iter()
        .map(|&xv| {
            // NaN тоже попадает сюда
            if !(xv > xp[0]) {
                return fp[0];
            }
            if xv >= xp[len - 1] {
                return fp[len - 1];
            }

            // Первая точка xp строго больше xv; len >= 2
            let hi = xp[..len].partition_point(|&p| p <= xv).clamp(1, len - 1);
            let lo = hi - 1;
            let span = xp[hi] - xp[lo];

            if span <= 0.0 {
                return fp[lo];
            }

            fp[lo] + (fp[hi] - fp[lo]) * (xv - xp[lo]) / span
        })
        .collect()
}
