use num_traits::{Float, FromPrimitive};

/// Returns `start, start + step, ...` up to and including `end`.
///
/// Values are computed by index multiplication so that long ranges
/// do not accumulate rounding drift. If the last regular value stops
/// short of `end`, `end` itself is appended.
///
/// Callers validate `start <= end` and `step > 0`.
pub fn discretize<T>(start: T, end: T, step: T) -> Vec<T>
where
    T: Float + FromPrimitive,
{
    let eps = T::from_f64(1e-9).unwrap_or_else(T::epsilon);
    let span = end - start;
    let n = (span / step + eps).floor().to_usize().unwrap_or(0);
    let mut values: Vec<T> = (0..=n)
        .map(|i| start + T::from_usize(i).unwrap_or_else(T::zero) * step)
        .collect();
    if let Some(&last) = values.last() {
        if end - last > eps {
            values.push(end);
        }
    }
    values
}
