use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl UiMode {
    pub fn parse(flag: &str) -> Self {
        match flag {
            "plain" => UiMode::Plain,
            "pretty" => UiMode::Pretty,
            _ => UiMode::Auto,
        }
    }
}

/// Progress steps on stderr and text rendering for report output.
#[derive(Clone, Debug)]
pub struct Ui {
    pretty: bool,
}

impl Ui {
    /// Spinners need a terminal on stderr; `Auto` also stays plain when
    /// stdout is piped so captured reports carry no escape codes.
    pub fn new(mode: UiMode, stderr_tty: bool, stdout_tty: bool) -> Self {
        let pretty = stderr_tty
            && match mode {
                UiMode::Pretty => true,
                UiMode::Auto => stdout_tty,
                UiMode::Plain => false,
            };
        Self { pretty }
    }

    pub fn step(&self, name: &str) -> Step {
        if self.pretty {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            Step::new(name, Some(spinner))
        } else {
            eprintln!("==> {}", name);
            Step::new(name, None)
        }
    }

    /// Horizontal bar for a share in `[0, 1]`.
    pub fn bar(&self, share: f64, width: usize) -> String {
        let filled = ((share.clamp(0.0, 1.0) * width as f64).round() as usize).min(width);
        let (full, empty) = if self.pretty { ('█', '░') } else { ('#', '.') };
        let mut out = String::with_capacity(width * 3);
        out.extend(std::iter::repeat(full).take(filled));
        out.extend(std::iter::repeat(empty).take(width - filled));
        out
    }
}

/// A named step; prints its duration when dropped.
pub struct Step {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl Step {
    fn new(name: &str, spinner: Option<ProgressBar>) -> Self {
        Self {
            name: name.to_string(),
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for Step {
    fn drop(&mut self) {
        let message = format!("✔ {} ({})", self.name, format_duration(self.start.elapsed()));
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_bar_is_ascii_and_fixed_width() {
        let ui = Ui::new(UiMode::Plain, true, true);
        assert_eq!(ui.bar(0.5, 10), "#####.....");
        assert_eq!(ui.bar(1.5, 4), "####");
    }
}
