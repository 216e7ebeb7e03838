//! The rate deriver (spec §4.B): turns a monotonically increasing byte
//! counter into a per-second rate.

/// Converts successive readings of one monotonic counter into a
/// per-second rate.
///
/// Policy: if the counter went backwards (wrap or reset) or the elapsed
/// time is non-positive, yields `0` and logs a warning; otherwise yields
/// `(cur - prev) / dt`. On the first observation there is no prior value,
/// so `0` is returned without a warning (spec §4.B: "On first observation
/// there is no prior; emit 0 until the second tick").
#[derive(Debug, Default)]
pub struct RateDeriver {
    prev: Option<(u64, i64)>,
}

impl RateDeriver {
    /// Creates a fresh deriver with no prior observation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives the rate for a raw counter reading at time `now`. `counter`
    /// being absent this tick (a transient platform read error) is treated
    /// like a missing observation: the internal state is left untouched
    /// and `0` is returned for this tick.
    pub fn derive_from_counter(&mut self, counter: Option<u64>, now: i64) -> f64 {
        let Some(cur) = counter else {
            return 0.0;
        };
        let rate = match self.prev {
            None => 0.0,
            Some((prev, prev_ts)) => Self::derive(prev, cur, (now - prev_ts) as f64),
        };
        self.prev = Some((cur, now));
        rate
    }

    /// Pure derivation: `derive(prev_counter, cur_counter, dt_seconds) ->
    /// bytes_per_second` (spec §4.B contract).
    pub fn derive(prev_counter: u64, cur_counter: u64, dt_seconds: f64) -> f64 {
        if dt_seconds <= 0.0 {
            tracing::warn!(dt_seconds, "non-positive tick interval, rate forced to 0");
            return 0.0;
        }
        if cur_counter < prev_counter {
            tracing::warn!(prev_counter, cur_counter, "counter went backwards (wrap or reset), rate forced to 0");
            return 0.0;
        }
        (cur_counter - prev_counter) as f64 / dt_seconds
    }
}
