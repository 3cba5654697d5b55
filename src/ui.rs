//! Progress reporting for `hold_detect` on stderr.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

/// How the CLI reports capture and detection steps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum UiMode {
    /// Spinners when stderr is a terminal and stdout is not piped.
    #[default]
    Auto,
    Plain,
    Pretty,
}

impl UiMode {
    fn spinners(self, stderr_is_tty: bool, stdout_piped: bool) -> bool {
        if !stderr_is_tty {
            return false;
        }
        match self {
            UiMode::Pretty => true,
            UiMode::Auto => !stdout_piped,
            UiMode::Plain => false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ui {
    spinners: bool,
}

impl Ui {
    /// `stdout_piped` keeps `Auto` plain when results go to another program.
    pub fn new(mode: UiMode, stderr_is_tty: bool, stdout_piped: bool) -> Self {
        Self {
            spinners: mode.spinners(stderr_is_tty, stdout_piped),
        }
    }

    /// Report a step until the returned value is dropped.
    pub fn stage(&self, label: &str) -> Stage {
        let spinner = self.spinners.then(|| step_spinner(label));
        if spinner.is_none() {
            eprintln!("hold_detect: {label}");
        }
        Stage {
            label: label.to_string(),
            started: Instant::now(),
            spinner,
        }
    }
}

fn step_spinner(label: &str) -> ProgressBar {
    let spinner = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(label.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// One reported step of a `hold_detect` run.
pub struct Stage {
    label: String,
    started: Instant,
    spinner: Option<ProgressBar>,
}

impl Drop for Stage {
    fn drop(&mut self) {
        let line = format!("{} finished in {}", self.label, elapsed_label(self.started.elapsed()));
        match self.spinner.take() {
            Some(spinner) => spinner.finish_with_message(line),
            None => eprintln!("hold_detect: {line}"),
        }
    }
}

fn elapsed_label(elapsed: Duration) -> String {
    match elapsed.as_millis() {
        ms if ms < 1000 => format!("{ms}ms"),
        _ => format!("{:.1}s", elapsed.as_secs_f32()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spinners_only_on_a_terminal() {
        assert!(!UiMode::Pretty.spinners(false, false));
        assert!(UiMode::Pretty.spinners(true, true));
        assert!(UiMode::Auto.spinners(true, false));
        assert!(!UiMode::Auto.spinners(true, true));
        assert!(!UiMode::Plain.spinners(true, false));
    }

    #[test]
    fn elapsed_label_switches_to_seconds() {
        assert_eq!(elapsed_label(Duration::from_millis(999)), "999ms");
        assert_eq!(elapsed_label(Duration::from_millis(2400)), "2.4s");
    }
}
