//! Progress reporting for the per-cell run (feature `progress`).
//!
//! Components
//! -----------------
//! * [`IterTimer`] – Tracks the time between completed cells and keeps a smoothed
//!   **exponential moving average** (EMA) of it, so the displayed per-cell time
//!   stays readable when cells have very different populations.
//! * [`CellProgress`] – An `indicatif` bar over the cells of a run, safe to tick
//!   from the worker threads.
//! * [`fmt_dur`] – Human-readable [`Duration`] formatter (`"253µs"`, `"42ms"`,
//!   `"3.14s"`).
//!
//! The EMA update rule is `ema ← α·dt + (1–α)·ema` with `α ∈ (0,1]`; the first tick
//! initializes the average to the first duration.
use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

use indicatif::{ProgressBar, ProgressStyle};

pub struct IterTimer {
    last: Instant,
    ema_ns: f64,
    alpha: f64,
    count: u64,
}

impl IterTimer {
    pub fn new(alpha: f64) -> Self {
        Self {
            last: Instant::now(),
            ema_ns: 0.0,
            alpha,
            count: 0,
        }
    }

    #[inline]
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let dt = now.duration_since(self.last);
        self.last = now;
        self.count += 1;

        let dt_ns = dt.as_nanos() as f64;
        self.ema_ns = if self.count == 1 {
            dt_ns
        } else {
            self.alpha * dt_ns + (1.0 - self.alpha) * self.ema_ns
        };

        dt
    }

    #[inline]
    pub fn avg(&self) -> Duration {
        if self.count == 0 {
            Duration::from_nanos(0)
        } else {
            Duration::from_nanos(self.ema_ns as u64)
        }
    }
}

#[inline]
pub fn fmt_dur(d: Duration) -> String {
    let us = d.as_micros();
    if us < 1_000 {
        format!("{us}µs")
    } else {
        let ms = d.as_millis();
        if ms < 1_000 {
            format!("{ms}ms")
        } else {
            let s = d.as_secs_f32();
            format!("{s:.2}s")
        }
    }
}

/// Progress bar over the cells of one run.
pub struct CellProgress {
    bar: ProgressBar,
    timer: Mutex<IterTimer>,
}

impl CellProgress {
    pub fn new(total_cells: usize) -> Self {
        let bar = ProgressBar::new((total_cells as u64).max(1));
        if let Ok(style) = ProgressStyle::with_template(
            "{bar:40.cyan/blue} {pos}/{len} cells ({percent:>3}%) \
             | {per_sec} | ETA {eta_precise} | {msg}",
        ) {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(200));
        CellProgress {
            bar,
            timer: Mutex::new(IterTimer::new(0.2)),
        }
    }

    /// Record one finished cell.
    pub fn cell_done(&self) {
        if let Ok(mut timer) = self.timer.lock() {
            let last = timer.tick();
            self.bar.set_message(format!(
                "last: {}, avg: {}",
                fmt_dur(last),
                fmt_dur(timer.avg())
            ));
        }
        self.bar.inc(1);
    }

    pub fn finish(&self) {
        self.bar.disable_steady_tick();
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod progress_bar_test {
    use super::*;

    #[test]
    fn test_fmt_dur_scales() {
        assert_eq!(fmt_dur(Duration::from_micros(253)), "253µs");
        assert_eq!(fmt_dur(Duration::from_millis(42)), "42ms");
        assert_eq!(fmt_dur(Duration::from_millis(3140)), "3.14s");
    }

    #[test]
    fn test_timer_average() {
        let mut timer = IterTimer::new(0.5);
        assert_eq!(timer.avg(), Duration::ZERO);
        let first = timer.tick();
        assert_eq!(timer.avg().as_nanos(), first.as_nanos());
    }

    #[test]
    fn test_cell_progress_counts() {
        let progress = CellProgress::new(3);
        progress.cell_done();
        progress.cell_done();
        assert_eq!(progress.bar.position(), 2);
        progress.finish();
    }
}
