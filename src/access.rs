//! 开锁状态机
//!
//! 两步确认模型：`Locked -> Armed -> Triggered`。口令匹配和伴侣传感器
//! 确认是两个独立的触发源，任一有效触发推进一步，顺序不限。到达
//! `Triggered` 后由主循环驱动执行机构并复位，每次开锁都需要两次新的
//! 有效触发。

use std::sync::mpsc::{Receiver, TryRecvError};

use crate::latch::Actuator;

/// 开锁进度计数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessState {
    Locked,
    Armed,
    Triggered,
}

/// 有效触发事件，由 HTTP 处理器经通道送入主循环
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// `/open` 口令匹配
    Password,
    /// `/uid` 伴侣传感器确认
    RemoteConfirm,
}

/// 状态机本体，仅主循环持有与改写
pub struct AccessMachine {
    state: AccessState,
}

impl AccessMachine {
    pub fn new() -> Self {
        Self {
            state: AccessState::Locked,
        }
    }

    pub fn state(&self) -> AccessState {
        self.state
    }

    /// 推进一步。已到 `Triggered` 时忽略后续触发，等待主循环复位
    pub fn advance(&mut self, trigger: Trigger) -> AccessState {
        let next = match self.state {
            AccessState::Locked => AccessState::Armed,
            AccessState::Armed => AccessState::Triggered,
            AccessState::Triggered => {
                log::warn!("{:?} ignored, already triggered", trigger);
                return self.state;
            }
        };

        log::info!("{:?}: {:?} -> {:?}", trigger, self.state, next);
        self.state = next;
        next
    }

    pub fn reset(&mut self) {
        self.state = AccessState::Locked;
    }
}

/// 主循环第二阶段：清空本轮排队的触发事件
pub fn drain_triggers(machine: &mut AccessMachine, rx: &Receiver<Trigger>) {
    loop {
        match rx.try_recv() {
            Ok(trigger) => {
                machine.advance(trigger);
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        }
    }
}

/// 主循环第三阶段：到达 `Triggered` 则开锁并复位。
///
/// 返回本轮是否下发了开锁命令。命令失败时状态保持 `Triggered`，
/// 下一轮重试。
pub fn actuate_if_triggered(
    machine: &mut AccessMachine,
    latch: &mut impl Actuator,
) -> anyhow::Result<bool> {
    if machine.state() != AccessState::Triggered {
        return Ok(false);
    }

    latch.open()?;
    machine.reset();
    log::info!("latch opened, counter reset");
    Ok(true)
}
