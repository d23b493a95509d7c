//! Tunable knobs for the supervisor and its collaborators.

use std::time::Duration;

/// Runtime configuration shared by the Supervisor, Continuation Engine,
/// PTY Manager, and Synthesis Orchestrator.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Quiet period before the continuation engine re-engages a session.
    pub quiet_delay: Duration,
    /// Floor on `quiet_delay`; values below this are rejected.
    pub min_quiet_delay: Duration,
    /// Default iteration cap for a continuation loop.
    pub default_max_iterations: u32,
    /// Inclusive clamp range for `maxIterations`.
    pub max_iterations_range: (u32, u32),
    /// Output buffer cap before trimming.
    pub output_buffer_cap: usize,
    /// Size the buffer is trimmed down to on overflow.
    pub output_buffer_trim_to: usize,
    /// Default number of parallel runs for synthesis.
    pub default_synthesis_n: u32,
    /// Inclusive clamp range for synthesis `n`.
    pub synthesis_n_range: (u32, u32),
    /// Per-run watchdog timeout for a hidden synthesis run.
    pub synthesis_run_timeout: Duration,
    /// Delay after the last PTY output before an idle desktop notification fires.
    pub idle_notify_delay: Duration,
    /// Default PTY size.
    pub default_pty_size: (u16, u16),
    /// Inclusive clamp range for PTY `cols`.
    pub cols_range: (u16, u16),
    /// Inclusive clamp range for PTY `rows`.
    pub rows_range: (u16, u16),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            quiet_delay: Duration::from_millis(12_000),
            min_quiet_delay: Duration::from_millis(250),
            default_max_iterations: 20,
            max_iterations_range: (1, 100),
            output_buffer_cap: 50_000,
            output_buffer_trim_to: 20_000,
            default_synthesis_n: 5,
            synthesis_n_range: (1, 12),
            synthesis_run_timeout: Duration::from_secs(10 * 60),
            idle_notify_delay: Duration::from_secs(5),
            default_pty_size: (120, 30),
            cols_range: (1, 500),
            rows_range: (1, 200),
        }
    }
}

impl AppConfig {
    /// Clamp `maxIterations` into `max_iterations_range`, defaulting when `None`.
    pub fn clamp_max_iterations(&self, value: Option<u32>) -> u32 {
        let (lo, hi) = self.max_iterations_range;
        value.unwrap_or(self.default_max_iterations).clamp(lo, hi)
    }

    /// Clamp synthesis `n` into `synthesis_n_range`, defaulting when `None`.
    pub fn clamp_synthesis_n(&self, value: Option<u32>) -> u32 {
        let (lo, hi) = self.synthesis_n_range;
        value.unwrap_or(self.default_synthesis_n).clamp(lo, hi)
    }

    /// Validate PTY `cols`/`rows`, returning `None` when out of range.
    pub fn validate_pty_size(&self, cols: u16, rows: u16) -> Option<(u16, u16)> {
        let (c_lo, c_hi) = self.cols_range;
        let (r_lo, r_hi) = self.rows_range;
        if (c_lo..=c_hi).contains(&cols) && (r_lo..=r_hi).contains(&rows) {
            Some((cols, rows))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_max_iterations() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.clamp_max_iterations(None), 20);
        assert_eq!(cfg.clamp_max_iterations(Some(0)), 1);
        assert_eq!(cfg.clamp_max_iterations(Some(500)), 100);
        assert_eq!(cfg.clamp_max_iterations(Some(50)), 50);
    }

    #[test]
    fn clamps_synthesis_n() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.clamp_synthesis_n(None), 5);
        assert_eq!(cfg.clamp_synthesis_n(Some(0)), 1);
        assert_eq!(cfg.clamp_synthesis_n(Some(99)), 12);
    }

    #[test]
    fn validates_pty_size() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.validate_pty_size(120, 30), Some((120, 30)));
        assert_eq!(cfg.validate_pty_size(0, 30), None);
        assert_eq!(cfg.validate_pty_size(120, 500), None);
    }
}
