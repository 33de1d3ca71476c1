//! Progress reporting for page-chunked transfers
use indicatif::{ProgressBar, ProgressStyle};

/// Observer of a transfer, counted in pages
pub trait Progress {
    fn start(&mut self, total: usize);
    fn step(&mut self, done: usize, total: usize);
    fn finish(&mut self, done: usize, total: usize);
}

/// Discards every report
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn start(&mut self, _total: usize) {}
    fn step(&mut self, _done: usize, _total: usize) {}
    fn finish(&mut self, _done: usize, _total: usize) {}
}

impl<P: Progress + ?Sized> Progress for Box<P> {
    fn start(&mut self, total: usize) {
        (**self).start(total)
    }
    fn step(&mut self, done: usize, total: usize) {
        (**self).step(done, total)
    }
    fn finish(&mut self, done: usize, total: usize) {
        (**self).finish(done, total)
    }
}

/// Terminal progress bar
#[derive(Default)]
pub struct ProgressBarSink {
    bar: Option<ProgressBar>,
}

impl ProgressBarSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Progress for ProgressBarSink {
    fn start(&mut self, total: usize) {
        let bar = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} pages ({eta})")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        self.bar = Some(bar);
    }

    fn step(&mut self, done: usize, _total: usize) {
        if let Some(bar) = &self.bar {
            bar.set_position(done as u64);
        }
    }

    fn finish(&mut self, done: usize, total: usize) {
        if let Some(bar) = self.bar.take() {
            bar.set_position(done as u64);
            if done == total {
                bar.finish();
            } else {
                bar.abandon();
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    /// Records every report as `(kind, done, total)`. Clones share the log.
    #[derive(Debug, Default, Clone)]
    pub(crate) struct Recorder {
        pub events: Rc<RefCell<Vec<(&'static str, usize, usize)>>>,
    }

    impl Recorder {
        pub fn events(&self) -> Vec<(&'static str, usize, usize)> {
            self.events.borrow().clone()
        }
    }

    impl Progress for Recorder {
        fn start(&mut self, total: usize) {
            self.events.borrow_mut().push(("start", 0, total));
        }
        fn step(&mut self, done: usize, total: usize) {
            self.events.borrow_mut().push(("step", done, total));
        }
        fn finish(&mut self, done: usize, total: usize) {
            self.events.borrow_mut().push(("finish", done, total));
        }
    }

    #[test]
    fn boxed_sink_forwards() {
        let recorder = Recorder::default();
        let mut sink: Box<dyn Progress> = Box::new(recorder.clone());
        sink.start(3);
        sink.step(1, 3);
        sink.finish(3, 3);
        assert_eq!(
            recorder.events(),
            vec![("start", 0, 3), ("step", 1, 3), ("finish", 3, 3)]
        );
    }

    #[test]
    fn bar_sink_tolerates_any_order() {
        let mut sink = ProgressBarSink::new();
        sink.step(1, 2);
        sink.start(2);
        sink.step(1, 2);
        sink.finish(1, 2);
        assert!(sink.bar.is_none());
    }
}
