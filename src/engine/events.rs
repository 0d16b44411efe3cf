// ==========================================
// 企业培训学习管理系统 - 引擎层事件发布
// ==========================================
// 职责: 定义消息总线 trait 与事务内延迟发布批次
// 契约: 至少一次送达 —— 提交后发布, 发布失败不回滚不重试
// ==========================================

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::error::Error;

// ==========================================
// 事件类型
// ==========================================

/// 出站事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnrolmentEventType {
    /// 选课创建
    EnrolmentCreated,
    /// 选课更新
    EnrolmentUpdated,
    /// 选课删除
    EnrolmentDeleted,
    /// 修订快照创建
    EnrolmentRevisionCreated,
    /// 计划创建
    PlanCreated,
    /// 计划更新
    PlanUpdated,
}

impl EnrolmentEventType {
    /// 转换为字符串标识
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrolmentEventType::EnrolmentCreated => "EnrolmentCreated",
            EnrolmentEventType::EnrolmentUpdated => "EnrolmentUpdated",
            EnrolmentEventType::EnrolmentDeleted => "EnrolmentDeleted",
            EnrolmentEventType::EnrolmentRevisionCreated => "EnrolmentRevisionCreated",
            EnrolmentEventType::PlanCreated => "PlanCreated",
            EnrolmentEventType::PlanUpdated => "PlanUpdated",
        }
    }

    /// 派生路由键
    pub fn routing_key(&self) -> &'static str {
        match self {
            EnrolmentEventType::EnrolmentCreated => "enrolment.created",
            EnrolmentEventType::EnrolmentUpdated => "enrolment.updated",
            EnrolmentEventType::EnrolmentDeleted => "enrolment.deleted",
            EnrolmentEventType::EnrolmentRevisionCreated => "enrolment.revision.created",
            EnrolmentEventType::PlanCreated => "plan.created",
            EnrolmentEventType::PlanUpdated => "plan.updated",
        }
    }
}

// ==========================================
// EnrolmentEvent - 出站事件
// ==========================================
// payload 为完整当前记录; original 为变更前快照(适用时);
// embedded 为协作方提供的反规范化上下文(账户/门户信息)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrolmentEvent {
    /// 事件类型
    pub event_type: EnrolmentEventType,
    /// 完整当前记录
    pub payload: JsonValue,
    /// 变更前快照
    pub original: Option<JsonValue>,
    /// 反规范化上下文侧信道
    pub embedded: Option<JsonValue>,
}

impl EnrolmentEvent {
    /// 创建仅含当前记录的事件
    pub fn new(event_type: EnrolmentEventType, payload: JsonValue) -> Self {
        Self {
            event_type,
            payload,
            original: None,
            embedded: None,
        }
    }

    /// 附带变更前快照
    pub fn with_original(mut self, original: JsonValue) -> Self {
        self.original = Some(original);
        self
    }

    /// 附带反规范化上下文
    pub fn with_embedded(mut self, embedded: JsonValue) -> Self {
        self.embedded = Some(embedded);
        self
    }

    /// 事件路由键
    pub fn routing_key(&self) -> &'static str {
        self.event_type.routing_key()
    }
}

// ==========================================
// 消息总线 Trait
// ==========================================

/// 消息总线契约
///
/// 本核心只写不读: publish 为唯一出口;
/// is_available 供编排器在任何变更前做快速失败前置检查
pub trait MessageBus: Send + Sync {
    /// 发布事件
    fn publish(&self, event: &EnrolmentEvent) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// 总线是否可用
    fn is_available(&self) -> bool;
}

/// 空操作消息总线
///
/// 用于不需要事件发布的场景(如单元测试)
#[derive(Debug, Clone, Default)]
pub struct NoOpMessageBus;

impl MessageBus for NoOpMessageBus {
    fn publish(&self, event: &EnrolmentEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            event_type = event.event_type.as_str(),
            routing_key = event.routing_key(),
            "NoOpMessageBus: 跳过事件发布"
        );
        Ok(())
    }

    fn is_available(&self) -> bool {
        true
    }
}

// ==========================================
// EventBatch - 事务内延迟发布批次
// ==========================================
// 事务过程中只累积事件, 提交后统一 flush;
// 单个事件发布失败记录 WARN 并继续(至少一次契约, 无重试)
#[derive(Default)]
pub struct EventBatch {
    events: Vec<EnrolmentEvent>,
}

impl EventBatch {
    /// 创建空批次
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// 累积一个事件(事务内调用)
    pub fn add(&mut self, event: EnrolmentEvent) {
        self.events.push(event);
    }

    /// 批次内事件数量
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// 批次是否为空
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// 提交后发布全部事件, 返回成功发布的数量
    ///
    /// 发布失败不回滚已提交的状态 —— 状态已持久化, 缺失的只是通知
    pub fn flush(self, bus: &dyn MessageBus) -> usize {
        let mut published = 0;
        for event in self.events {
            match bus.publish(&event) {
                Ok(()) => published += 1,
                Err(e) => {
                    tracing::warn!(
                        event_type = event.event_type.as_str(),
                        routing_key = event.routing_key(),
                        error = %e,
                        "事件发布失败, 状态已提交, 通知缺失(至少一次契约)"
                    );
                }
            }
        }
        published
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// 记录已发布事件的测试总线
    #[derive(Default)]
    struct RecordingBus {
        published: Mutex<Vec<String>>,
        fail_on: Option<EnrolmentEventType>,
    }

    impl MessageBus for RecordingBus {
        fn publish(&self, event: &EnrolmentEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
            if self.fail_on == Some(event.event_type) {
                return Err("总线故障".into());
            }
            self.published
                .lock()
                .unwrap()
                .push(event.event_type.as_str().to_string());
            Ok(())
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_routing_keys() {
        assert_eq!(
            EnrolmentEventType::EnrolmentCreated.routing_key(),
            "enrolment.created"
        );
        assert_eq!(EnrolmentEventType::PlanUpdated.routing_key(), "plan.updated");
    }

    #[test]
    fn test_batch_flush_preserves_order() {
        let bus = RecordingBus::default();
        let mut batch = EventBatch::new();
        batch.add(EnrolmentEvent::new(
            EnrolmentEventType::EnrolmentCreated,
            json!({}),
        ));
        batch.add(EnrolmentEvent::new(
            EnrolmentEventType::PlanCreated,
            json!({}),
        ));

        let published = batch.flush(&bus);
        assert_eq!(published, 2);
        assert_eq!(
            *bus.published.lock().unwrap(),
            vec!["EnrolmentCreated".to_string(), "PlanCreated".to_string()]
        );
    }

    #[test]
    fn test_batch_flush_continues_after_failure() {
        let bus = RecordingBus {
            fail_on: Some(EnrolmentEventType::EnrolmentCreated),
            ..Default::default()
        };
        let mut batch = EventBatch::new();
        batch.add(EnrolmentEvent::new(
            EnrolmentEventType::EnrolmentCreated,
            json!({}),
        ));
        batch.add(EnrolmentEvent::new(
            EnrolmentEventType::EnrolmentUpdated,
            json!({}),
        ));

        // 第一个事件失败, 第二个仍然发布
        let published = batch.flush(&bus);
        assert_eq!(published, 1);
        assert_eq!(
            *bus.published.lock().unwrap(),
            vec!["EnrolmentUpdated".to_string()]
        );
    }

    #[test]
    fn test_event_builder() {
        let event = EnrolmentEvent::new(EnrolmentEventType::EnrolmentUpdated, json!({"id": 1}))
            .with_original(json!({"id": 0}))
            .with_embedded(json!({"portal": "hq"}));
        assert!(event.original.is_some());
        assert!(event.embedded.is_some());
    }
}
