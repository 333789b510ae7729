//! RTT 기반 흐름 제어
//!
//! 두 가지 모드:
//! - Responsive: RTT가 임계값 이하, 높은 전송률
//! - Throttled: RTT가 임계값 초과, 낮은 전송률
//!
//! Throttled → Responsive 승격에는 페널티 시간만큼 좋은 RTT가 지속되어야 함.
//! 승격 직후 다시 떨어지면 페널티 2배, Responsive가 오래 유지되면 페널티 절반.

use tracing::{debug, info};

use crate::Config;

/// 흐름 제어 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowMode {
    Responsive,
    Throttled,
}

/// 흐름 제어기
#[derive(Debug, Clone)]
pub struct FlowController {
    mode: FlowMode,

    /// 승격에 필요한 좋은 RTT 지속 시간 (초)
    penalty: f32,

    /// 좋은 상태 지속 시간 (초)
    good_duration: f32,

    /// 페널티 감소용 누적 시간 (초)
    relief_accumulator: f32,

    // parameters
    rtt_threshold_ms: f32,
    initial_penalty: f32,
    min_penalty: f32,
    max_penalty: f32,
    penalty_window: f32,
    responsive_rate: f32,
    throttled_rate: f32,
}

impl Default for FlowController {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl FlowController {
    pub fn new(config: &Config) -> Self {
        let mut controller = Self {
            mode: FlowMode::Throttled,
            penalty: config.initial_penalty,
            good_duration: 0.0,
            relief_accumulator: 0.0,
            rtt_threshold_ms: config.rtt_threshold_ms,
            initial_penalty: config.initial_penalty,
            min_penalty: config.min_penalty,
            max_penalty: config.max_penalty,
            penalty_window: config.penalty_window,
            responsive_rate: config.responsive_send_rate,
            throttled_rate: config.throttled_send_rate,
        };
        controller.reset();
        debug!("흐름 제어 초기화");
        controller
    }

    /// 초기 상태로 복귀 (연결이 끊어질 때마다 호출)
    pub fn reset(&mut self) {
        self.mode = FlowMode::Throttled;
        self.penalty = self.initial_penalty;
        self.good_duration = 0.0;
        self.relief_accumulator = 0.0;
    }

    /// RTT 샘플 반영
    ///
    /// `delta_time`: 직전 호출 이후 경과 시간 (초), `rtt_ms`: RTT (밀리초)
    pub fn update(&mut self, delta_time: f32, rtt_ms: f32) {
        match self.mode {
            FlowMode::Responsive => self.update_responsive(delta_time, rtt_ms),
            FlowMode::Throttled => self.update_throttled(delta_time, rtt_ms),
        }
    }

    fn update_responsive(&mut self, delta_time: f32, rtt_ms: f32) {
        if rtt_ms > self.rtt_threshold_ms {
            info!("Throttled 모드로 전환 (rtt={:.1}ms)", rtt_ms);
            self.mode = FlowMode::Throttled;

            if self.good_duration < self.penalty_window && self.penalty < self.max_penalty {
                self.penalty = (self.penalty * 2.0).min(self.max_penalty);
                debug!("페널티 증가: {:.1}s", self.penalty);
            }

            self.good_duration = 0.0;
            self.relief_accumulator = 0.0;
            return;
        }

        self.good_duration += delta_time;
        self.relief_accumulator += delta_time;

        if self.relief_accumulator > self.penalty_window && self.penalty > self.min_penalty {
            self.penalty = (self.penalty / 2.0).max(self.min_penalty);
            debug!("페널티 감소: {:.1}s", self.penalty);
            self.relief_accumulator = 0.0;
        }
    }

    fn update_throttled(&mut self, delta_time: f32, rtt_ms: f32) {
        if rtt_ms <= self.rtt_threshold_ms {
            self.good_duration += delta_time;
        } else {
            self.good_duration = 0.0;
        }

        if self.good_duration > self.penalty {
            info!("Responsive 모드로 전환 (penalty={:.1}s)", self.penalty);
            self.mode = FlowMode::Responsive;
            self.good_duration = 0.0;
            self.relief_accumulator = 0.0;
        }
    }

    /// 목표 전송률 (packets/sec), 모드에만 의존
    pub fn send_rate(&self) -> f32 {
        match self.mode {
            FlowMode::Responsive => self.responsive_rate,
            FlowMode::Throttled => self.throttled_rate,
        }
    }

    pub fn mode(&self) -> FlowMode {
        self.mode
    }

    pub fn penalty(&self) -> f32 {
        self.penalty
    }

    pub fn good_duration(&self) -> f32 {
        self.good_duration
    }

    pub fn relief_accumulator(&self) -> f32 {
        self.relief_accumulator
    }
}
