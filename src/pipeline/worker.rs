//! 工作线程与生产者入口
//!
//! 生产者线程 (采集回调) 只做 try_admit + try_send,从不阻塞;
//! 单个工作线程串行执行转换、几何、检测与映射。

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{select, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{error, info, warn};

use super::coordinator::{AdmittedFrame, CoordinatorStats, DetectionCoordinator};
use crate::config::PipelineSettings;
use crate::input::{FrameIngestGate, FrameSink, RawFrame, ReleaseHandle};

const DRAIN_POLL: Duration = Duration::from_millis(5);

/// 生产者侧入口,实现 `FrameSink`
pub struct FrameIngress {
    gate: Arc<FrameIngestGate>,
    tx: Sender<AdmittedFrame>,
}

impl FrameSink for FrameIngress {
    fn on_frame_available(&self, frame: RawFrame, release: ReleaseHandle) -> bool {
        let admission = match self.gate.try_admit(release) {
            Ok(admission) => admission,
            Err(release) => {
                // 忙时丢帧: 立即归还缓冲区
                release.release();
                return false;
            }
        };

        let admitted = AdmittedFrame {
            frame,
            sequence: admission.sequence,
        };
        match self.tx.try_send(admitted) {
            Ok(()) => true,
            Err(e) => {
                match e {
                    TrySendError::Full(_) => error!("❌ 工作队列已满,闸门状态异常"),
                    TrySendError::Disconnected(_) => warn!("⚠️ 工作线程已退出,丢弃帧"),
                }
                drop(e);
                let _ = self.gate.release();
                false
            }
        }
    }
}

/// 运行中的流水线
pub struct PipelineHandle {
    ingress: Arc<FrameIngress>,
    gate: Arc<FrameIngestGate>,
    settings: Arc<PipelineSettings>,
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<CoordinatorStats>>,
}

/// 启动工作线程
pub fn spawn_pipeline(
    coordinator: DetectionCoordinator,
    settings: Arc<PipelineSettings>,
) -> anyhow::Result<PipelineHandle> {
    let gate = coordinator.gate().clone();
    // 闸门在整个处理期间拒绝新帧,通道中最多一帧,容量1足够
    let (tx, rx) = crossbeam_channel::bounded::<AdmittedFrame>(1);
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);

    let worker = std::thread::Builder::new()
        .name("detection-worker".to_string())
        .spawn(move || worker_loop(coordinator, rx, stop_rx))?;

    info!("✅ 检测工作线程启动");
    Ok(PipelineHandle {
        ingress: Arc::new(FrameIngress {
            gate: gate.clone(),
            tx,
        }),
        gate,
        settings,
        stop_tx: Some(stop_tx),
        worker: Some(worker),
    })
}

fn worker_loop(
    mut coordinator: DetectionCoordinator,
    rx: Receiver<AdmittedFrame>,
    stop_rx: Receiver<()>,
) -> CoordinatorStats {
    loop {
        select! {
            recv(rx) -> msg => match msg {
                Ok(admitted) => {
                    coordinator.process(admitted);
                }
                Err(_) => break,
            },
            recv(stop_rx) -> _ => break,
        }
    }

    // 闸门已关闭: 处理完在途帧后退出
    loop {
        match rx.recv_timeout(DRAIN_POLL) {
            Ok(admitted) => {
                coordinator.process(admitted);
            }
            Err(RecvTimeoutError::Timeout) if coordinator.gate().is_busy() => continue,
            Err(_) => break,
        }
    }

    coordinator.log_summary();
    coordinator.stats()
}

impl PipelineHandle {
    /// 采集端使用的入口
    pub fn sink(&self) -> Arc<dyn FrameSink> {
        self.ingress.clone()
    }

    pub fn gate(&self) -> &Arc<FrameIngestGate> {
        &self.gate
    }

    pub fn settings(&self) -> &Arc<PipelineSettings> {
        &self.settings
    }

    /// 停止准入,等待在途帧完成,返回最终统计
    pub fn shutdown(mut self) -> CoordinatorStats {
        self.stop().unwrap_or_default()
    }

    fn stop(&mut self) -> Option<CoordinatorStats> {
        let worker = self.worker.take()?;
        self.gate.close();
        self.stop_tx.take();
        match worker.join() {
            Ok(stats) => {
                info!("🛑 检测工作线程退出");
                Some(stats)
            }
            Err(_) => {
                error!("❌ 检测工作线程异常退出");
                None
            }
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
