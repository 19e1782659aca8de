//! 渲染线程交接 (Render hand-off)
//!
//! 工作线程只把跟踪/界面回调投递到通道,由持有渲染上下文的线程按顺序消费。

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::detection::{MappedDetection, MetricsReporter, Tracker};

#[derive(Debug, Clone)]
pub enum RenderEvent {
    Detections {
        sequence: u64,
        detections: Vec<MappedDetection>,
    },
    Metrics {
        frame_width: u32,
        frame_height: u32,
        processing_ms: f64,
    },
}

/// 工作线程侧: 同时充当 Tracker 与 MetricsReporter
#[derive(Clone)]
pub struct RenderDispatcher {
    tx: Sender<RenderEvent>,
}

impl RenderDispatcher {
    fn dispatch(&self, event: RenderEvent) {
        if self.tx.send(event).is_err() {
            debug!("渲染线程已退出,丢弃事件");
        }
    }
}

impl Tracker for RenderDispatcher {
    fn track_results(&mut self, detections: Vec<MappedDetection>, frame_sequence: u64) {
        self.dispatch(RenderEvent::Detections {
            sequence: frame_sequence,
            detections,
        });
    }
}

impl MetricsReporter for RenderDispatcher {
    fn report_metrics(&mut self, frame_width: u32, frame_height: u32, processing_ms: f64) {
        self.dispatch(RenderEvent::Metrics {
            frame_width,
            frame_height,
            processing_ms,
        });
    }
}

/// 渲染线程侧
pub struct RenderLoop {
    rx: Receiver<RenderEvent>,
    last_sequence: Option<u64>,
}

/// 创建一对渲染通道端点
pub fn render_channel() -> (RenderDispatcher, RenderLoop) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (
        RenderDispatcher { tx },
        RenderLoop {
            rx,
            last_sequence: None,
        },
    )
}

impl RenderLoop {
    /// 处理当前所有待处理事件 (不阻塞),返回处理数量
    pub fn pump(&mut self, tracker: &mut dyn Tracker, metrics: &mut dyn MetricsReporter) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.rx.try_recv() {
            self.handle(event, tracker, metrics);
            handled += 1;
        }
        handled
    }

    /// 阻塞运行直到所有发送端关闭
    pub fn run(mut self, tracker: &mut dyn Tracker, metrics: &mut dyn MetricsReporter) {
        while let Ok(event) = self.rx.recv() {
            self.handle(event, tracker, metrics);
        }
    }

    /// 等待至多 `timeout` 处理一个事件;发送端全部关闭时返回 false
    pub fn step(
        &mut self,
        timeout: Duration,
        tracker: &mut dyn Tracker,
        metrics: &mut dyn MetricsReporter,
    ) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => {
                self.handle(event, tracker, metrics);
                true
            }
            Err(RecvTimeoutError::Timeout) => true,
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    fn handle(
        &mut self,
        event: RenderEvent,
        tracker: &mut dyn Tracker,
        metrics: &mut dyn MetricsReporter,
    ) {
        match event {
            RenderEvent::Detections {
                sequence,
                detections,
            } => {
                if let Some(last) = self.last_sequence {
                    if sequence <= last {
                        warn!("⚠️ 丢弃过期检测结果: 帧#{} (已渲染#{})", sequence, last);
                        return;
                    }
                }
                self.last_sequence = Some(sequence);
                tracker.track_results(detections, sequence);
            }
            RenderEvent::Metrics {
                frame_width,
                frame_height,
                processing_ms,
            } => metrics.report_metrics(frame_width, frame_height, processing_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        sequences: Vec<u64>,
        metrics: Vec<(u32, u32)>,
    }

    impl Tracker for Recorder {
        fn track_results(&mut self, _detections: Vec<MappedDetection>, frame_sequence: u64) {
            self.sequences.push(frame_sequence);
        }
    }

    impl MetricsReporter for Recorder {
        fn report_metrics(&mut self, frame_width: u32, frame_height: u32, _processing_ms: f64) {
            self.metrics.push((frame_width, frame_height));
        }
    }

    #[test]
    fn test_events_delivered_in_order() {
        let (mut dispatcher, mut render) = render_channel();
        for seq in [0, 3, 7] {
            dispatcher.track_results(Vec::new(), seq);
            dispatcher.report_metrics(640, 480, 1.0);
        }

        let mut tracker = Recorder::default();
        let mut metrics = Recorder::default();
        assert_eq!(render.pump(&mut tracker, &mut metrics), 6);
        assert_eq!(tracker.sequences, vec![0, 3, 7]);
        assert_eq!(metrics.metrics.len(), 3);
    }

    #[test]
    fn test_stale_sequence_is_not_rendered() {
        let (mut dispatcher, mut render) = render_channel();
        dispatcher.track_results(Vec::new(), 5);
        dispatcher.track_results(Vec::new(), 2);
        dispatcher.track_results(Vec::new(), 6);

        let mut tracker = Recorder::default();
        let mut metrics = Recorder::default();
        render.pump(&mut tracker, &mut metrics);
        assert_eq!(tracker.sequences, vec![5, 6]);
    }

    #[test]
    fn test_run_ends_when_dispatchers_dropped() {
        let (mut dispatcher, render) = render_channel();
        let worker = std::thread::spawn(move || {
            for seq in 0..10 {
                dispatcher.track_results(Vec::new(), seq);
            }
        });
        let mut tracker = Recorder::default();
        let mut metrics = Recorder::default();
        render.run(&mut tracker, &mut metrics);
        worker.join().unwrap();
        assert_eq!(tracker.sequences, (0..10).collect::<Vec<_>>());
    }
}
