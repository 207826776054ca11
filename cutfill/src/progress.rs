use earthwork::{Phase, ProgressEvent, ProgressSink};
use indicatif::{ProgressBar, ProgressStyle};

/// Renders search progress as a terminal progress bar.
#[derive(Clone)]
pub struct Bar(ProgressBar);

impl Bar {
    pub fn new(hidden: bool) -> Self {
        let pb = if hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(100)
        };
        pb.set_style(
            ProgressStyle::with_template("{prefix:>8} [{wide_bar:.cyan/blue}] {pos:>3}% {msg}")
                .expect("incorrect progress bar format string")
                .progress_chars("#>-"),
        );
        Self(pb)
    }

    pub fn finish(&self) {
        self.0.finish_and_clear();
    }
}

impl ProgressSink for Bar {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn report(&self, event: &ProgressEvent) {
        let prefix = match event.phase {
            Phase::Prepare => "prepare",
            Phase::Coarse => "coarse",
            Phase::Fine => "fine",
            Phase::Scan => "scan",
            Phase::Done => "done",
        };
        self.0.set_prefix(prefix);
        self.0.set_position(event.percent.round() as u64);
        self.0.set_message(event.message.clone());
    }
}
