use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Controls how progress output is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Spinners on stderr.
    Normal,
    /// Spinners, plus debug tracing on stderr.
    Verbose,
    /// No spinners; prompts are answered non-interactively.
    Quiet,
    /// No ANSI: plain `eprintln!` lines (for piped/non-TTY).
    Plain,
    /// Nothing at all.
    Silent,
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .expect("valid spinner template")
}

fn done_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("\u{2713} {msg:.green}")
        .expect("valid spinner template")
}

fn failed_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("\u{2717} {msg:.red}")
        .expect("valid spinner template")
}

/// Show `label` with a spinner while `fut` runs, then a checkmark or a cross
/// depending on the result.
pub async fn scoped<Fut, T, E>(mode: OutputMode, label: &str, fut: Fut) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
{
    match mode {
        OutputMode::Silent | OutputMode::Quiet => return fut.await,
        OutputMode::Plain => {
            eprintln!("{label}...");
            let result = fut.await;
            let verdict = if result.is_ok() { "done" } else { "failed" };
            eprintln!("{label}...{verdict}.");
            return result;
        }
        OutputMode::Normal | OutputMode::Verbose => {}
    }

    let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
    bar.set_style(spinner_style());
    bar.set_message(label.to_string());
    bar.enable_steady_tick(Duration::from_millis(80));

    let result = fut.await;

    bar.set_style(if result.is_ok() { done_style() } else { failed_style() });
    bar.finish_with_message(label.to_string());
    result
}

/// An unbounded spinner for waits driven by the caller (key propagation).
pub struct Waiting {
    bar: Option<ProgressBar>,
}

impl Waiting {
    pub fn start(mode: OutputMode, label: &str) -> Self {
        let bar = match mode {
            OutputMode::Normal | OutputMode::Verbose => {
                let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
                bar.set_style(spinner_style());
                bar.set_message(label.to_string());
                bar.enable_steady_tick(Duration::from_millis(80));
                Some(bar)
            }
            OutputMode::Plain => {
                eprintln!("{label}...");
                None
            }
            OutputMode::Quiet | OutputMode::Silent => None,
        };
        Self { bar }
    }

    pub fn finish(self) {
        if let Some(bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}
