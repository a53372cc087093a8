//! 队列运行指标
//!
//! 以Prometheus文本格式导出登记、状态转换、拒绝和在线订阅数。

use anyhow::Result;
use prometheus::{IntCounterVec, IntGauge, Opts, Registry};
use queue_core::{CheckInStatus, ErrorKind, PriorityTier};

/// 队列指标收集器
#[derive(Clone)]
pub struct QueueMetrics {
    /// Prometheus指标注册表
    registry: Registry,
    /// 按优先级统计的登记数
    check_ins_total: IntCounterVec,
    /// 按目标状态统计的状态转换数
    transitions_total: IntCounterVec,
    /// 按错误类别统计的拒绝数
    rejections_total: IntCounterVec,
    /// 当前在线订阅数
    live_subscribers: IntGauge,
}

impl std::fmt::Debug for QueueMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueMetrics")
            .field("live_subscribers", &self.live_subscribers.get())
            .finish()
    }
}

impl QueueMetrics {
    /// 创建新的指标收集器
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let check_ins_total = IntCounterVec::new(
            Opts::new("queue_check_ins_total", "Total number of accepted check-ins"),
            &["tier"],
        )?;

        let transitions_total = IntCounterVec::new(
            Opts::new(
                "queue_transitions_total",
                "Total number of applied status transitions",
            ),
            &["status"],
        )?;

        let rejections_total = IntCounterVec::new(
            Opts::new("queue_rejections_total", "Total number of rejected operations"),
            &["kind"],
        )?;

        let live_subscribers = IntGauge::with_opts(Opts::new(
            "queue_live_subscribers",
            "Number of open live view subscriptions",
        ))?;

        // 注册所有指标
        registry.register(Box::new(check_ins_total.clone()))?;
        registry.register(Box::new(transitions_total.clone()))?;
        registry.register(Box::new(rejections_total.clone()))?;
        registry.register(Box::new(live_subscribers.clone()))?;

        Ok(Self {
            registry,
            check_ins_total,
            transitions_total,
            rejections_total,
            live_subscribers,
        })
    }

    /// 记录登记
    pub fn record_check_in(&self, tier: PriorityTier) {
        self.check_ins_total.with_label_values(&[tier.as_str()]).inc();
    }

    /// 记录状态转换
    pub fn record_transition(&self, status: CheckInStatus) {
        self.transitions_total
            .with_label_values(&[status.as_str()])
            .inc();
    }

    /// 记录被拒绝的操作
    pub fn record_rejection(&self, kind: ErrorKind) {
        self.rejections_total.with_label_values(&[kind.as_str()]).inc();
    }

    /// 更新在线订阅数
    pub fn set_live_subscribers(&self, count: usize) {
        self.live_subscribers.set(count as i64);
    }

    /// 导出Prometheus文本格式
    pub fn render(&self) -> Result<String> {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;

        Ok(String::from_utf8(buffer)?)
    }
}
