/// 帧准入闸门 (Frame ingest gate)
///
/// 单槽位、忙时丢帧: 同一时刻最多一帧在流水线中,忙时到达的帧直接拒绝,
/// 由调用方自行释放。不排队,延迟有上界。
///
/// 两个标志:
/// - busy: 源缓冲区被持有 (admit → release)
/// - processing: 工作线程正在处理该帧 (begin_processing → end_processing),
///   缓冲区提前归还后仍拒绝新帧,慢检测器只推迟下一帧的准入
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{error, warn};

use super::frame::ReleaseHandle;
use crate::error::{PipelineError, Result};

/// 准入凭证: 携带到达序号 (所有到达帧共用一个递增序列)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub sequence: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateStats {
    pub arrived: u64,
    pub admitted: u64,
    pub dropped: u64,
}

impl GateStats {
    pub fn drop_rate(&self) -> f64 {
        if self.arrived == 0 {
            0.0
        } else {
            self.dropped as f64 / self.arrived as f64 * 100.0
        }
    }
}

#[derive(Default)]
struct GateState {
    busy: bool,
    processing: bool,
    pending: Option<ReleaseHandle>,
    next_sequence: u64,
}

#[derive(Default)]
pub struct FrameIngestGate {
    state: Mutex<GateState>,
    closed: AtomicBool,
    arrived: AtomicU64,
    admitted: AtomicU64,
    dropped: AtomicU64,
}

impl FrameIngestGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 尝试准入一帧
    ///
    /// 空闲: 置忙,保存释放回调,返回 `Ok(Admission)`。
    /// 忙、处理中或已关闭: 原样返回回调,由调用方释放;已保存的回调不受影响。
    pub fn try_admit(&self, release: ReleaseHandle) -> std::result::Result<Admission, ReleaseHandle> {
        let mut state = self.lock();
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        self.arrived.fetch_add(1, Ordering::Relaxed);

        if state.busy || state.processing || self.closed.load(Ordering::Acquire) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(release);
        }

        state.busy = true;
        state.pending = Some(release);
        self.admitted.fetch_add(1, Ordering::Relaxed);
        Ok(Admission { sequence })
    }

    /// 释放当前帧: 调用保存的回调并清除忙标志
    ///
    /// 回调在锁外执行;无论回调是否panic,忙标志都会被清除。
    pub fn release(&self) -> Result<()> {
        let handle = {
            let mut state = self.lock();
            if !state.busy {
                error!("❌ 释放帧时闸门空闲 (release without admit)");
                return Err(PipelineError::ReleaseWithoutAdmit);
            }
            match state.pending.take() {
                Some(handle) => handle,
                None => {
                    error!("❌ 同一帧被重复释放 (double release)");
                    return Err(PipelineError::DoubleRelease);
                }
            }
        };

        let _reset = BusyReset(self);
        handle.release();
        Ok(())
    }

    pub fn is_busy(&self) -> bool {
        self.lock().busy
    }

    /// 工作线程接手已准入的帧;必须在该帧 `release` 之前调用
    pub fn begin_processing(&self) {
        let mut state = self.lock();
        if !state.busy {
            warn!("⚠️ 开始处理时闸门空闲,帧可能未经准入");
        }
        state.processing = true;
    }

    /// 处理结束 (检测、映射、回调均已完成),下一帧可以准入
    pub fn end_processing(&self) {
        self.lock().processing = false;
    }

    pub fn is_processing(&self) -> bool {
        self.lock().processing
    }

    /// 停止准入新帧;在途帧照常完成并释放
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            warn!("🛑 帧准入闸门已关闭");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            arrived: self.arrived.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

struct BusyReset<'a>(&'a FrameIngestGate);

impl Drop for BusyReset<'_> {
    fn drop(&mut self) {
        self.0.lock().busy = false;
    }
}
