use bilibili_api::FetchEvent;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressFinish, ProgressStyle};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const TICKS: &[&str] = &[
    "▹▹▹▹▹", "▸▹▹▹▹", "▹▸▹▹▹", "▹▹▸▹▹", "▹▹▹▸▹", "▹▹▹▹▸", "▪▪▪▪▪",
];

/// Bars clear themselves when dropped, e.g. when Ctrl-C abandons a download.
fn hidden_or(pb: ProgressBar, visible: bool) -> ProgressBar {
    let pb = pb.with_finish(ProgressFinish::AndClear);
    if !visible {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }
    pb
}

pub fn spinner(message: impl Into<String>, visible: bool) -> ProgressBar {
    let pb = hidden_or(ProgressBar::new_spinner(), visible);
    pb.enable_steady_tick(Duration::from_millis(120));
    if let Ok(style) = ProgressStyle::with_template("{spinner:.blue} {msg}") {
        pb.set_style(style.tick_strings(TICKS));
    }
    pb.set_message(message.into());
    pb
}

/// A bar over all segments of all parts, fed by the fetcher's events.
pub struct SegmentProgress {
    pb: ProgressBar,
    task: Option<JoinHandle<()>>,
}

impl SegmentProgress {
    pub fn start(mut events: mpsc::UnboundedReceiver<FetchEvent>, visible: bool) -> Self {
        let pb = hidden_or(ProgressBar::new(0), visible);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} segments {msg}",
        ) {
            pb.set_style(style.progress_chars("#>-"));
        }

        let bar = pb.clone();
        let task = tokio::spawn(async move {
            let mut failed = 0u32;
            while let Some(event) = events.recv().await {
                match event {
                    FetchEvent::Planned { segments, .. } => bar.inc_length(u64::from(segments)),
                    FetchEvent::SegmentDone { .. } => bar.inc(1),
                    FetchEvent::SegmentFailed { .. } => {
                        failed += 1;
                        bar.set_message(format!("({failed} failed)"));
                        bar.inc(1);
                    }
                }
            }
        });
        Self {
            pb,
            task: Some(task),
        }
    }

    /// Wait until every queued event is applied, then clear the bar.
    ///
    /// Returns once all senders are gone, so drop the fetcher first.
    pub async fn finish(mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SegmentProgress {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.pb.finish_and_clear();
    }
}
