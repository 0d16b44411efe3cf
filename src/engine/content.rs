// ==========================================
// 企业培训学习管理系统 - 内容图协作方契约
// ==========================================
// 说明: Engine 层定义 trait, 仓储层提供 SQLite 适配实现
// 优势: 引擎不依赖具体内容目录的存储方式, 遵循依赖倒置原则
// ==========================================

use crate::domain::completion_rule::CompletionRule;
use crate::domain::types::ContentType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;

// ==========================================
// ContentChildren - 直接子节点分类结果
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentChildren {
    pub mandatory: Vec<String>, // 必修子节点
    pub elective: Vec<String>,  // 选修子节点
    pub events: Vec<String>,    // 活动类子节点
}

impl ContentChildren {
    /// 判断是否没有任何子节点
    pub fn is_empty(&self) -> bool {
        self.mandatory.is_empty() && self.elective.is_empty() && self.events.is_empty()
    }
}

/// 内容图查询结果类型
pub type ContentResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

// ==========================================
// ContentGraph - 内容图协作方 Trait
// ==========================================
// 外部协作方: 提供学习对象类型 / 子节点分类 / 选修配额 / 祖先定位
pub trait ContentGraph: Send + Sync {
    /// 查询直接子节点并按必修/选修/活动分类
    fn get_children(&self, content_id: &str) -> ContentResult<ContentChildren>;

    /// 查询选修配额(完成该数量的选修子节点即满足选修条件)
    fn get_elective_quota(&self, content_id: &str) -> ContentResult<i64>;

    /// 查询学习对象类型
    fn get_type(&self, content_id: &str) -> ContentResult<Option<ContentType>>;

    /// 沿内容层级向上查找指定类型的祖先
    fn get_ancestor_of_type(
        &self,
        content_id: &str,
        content_type: ContentType,
    ) -> ContentResult<Option<String>>;

    /// 判断学习对象是否存在
    fn exists(&self, content_id: &str) -> ContentResult<bool>;

    /// 查询节点配置的完成规则
    fn get_completion_rule(&self, content_id: &str) -> ContentResult<Option<CompletionRule>>;
}

// ==========================================
// ContentLookupCache - 请求作用域查找缓存
// ==========================================
// 一次编排操作内对外部内容图的重复查询进行显式记忆化;
// 随调用链显式传递, 不使用进程级可变状态
pub struct ContentLookupCache<'a> {
    graph: &'a dyn ContentGraph,
    children: HashMap<String, ContentChildren>,
    quotas: HashMap<String, i64>,
    types: HashMap<String, Option<ContentType>>,
    rules: HashMap<String, Option<CompletionRule>>,
}

impl<'a> ContentLookupCache<'a> {
    /// 创建绑定到单次操作的缓存
    pub fn new(graph: &'a dyn ContentGraph) -> Self {
        Self {
            graph,
            children: HashMap::new(),
            quotas: HashMap::new(),
            types: HashMap::new(),
            rules: HashMap::new(),
        }
    }

    /// 查询子节点分类(带记忆化)
    pub fn children(&mut self, content_id: &str) -> ContentResult<ContentChildren> {
        if let Some(hit) = self.children.get(content_id) {
            return Ok(hit.clone());
        }
        let value = self.graph.get_children(content_id)?;
        self.children.insert(content_id.to_string(), value.clone());
        Ok(value)
    }

    /// 查询选修配额(带记忆化)
    pub fn elective_quota(&mut self, content_id: &str) -> ContentResult<i64> {
        if let Some(hit) = self.quotas.get(content_id) {
            return Ok(*hit);
        }
        let value = self.graph.get_elective_quota(content_id)?;
        self.quotas.insert(content_id.to_string(), value);
        Ok(value)
    }

    /// 查询对象类型(带记忆化)
    pub fn content_type(&mut self, content_id: &str) -> ContentResult<Option<ContentType>> {
        if let Some(hit) = self.types.get(content_id) {
            return Ok(*hit);
        }
        let value = self.graph.get_type(content_id)?;
        self.types.insert(content_id.to_string(), value);
        Ok(value)
    }

    /// 查询完成规则(带记忆化)
    pub fn completion_rule(&mut self, content_id: &str) -> ContentResult<Option<CompletionRule>> {
        if let Some(hit) = self.rules.get(content_id) {
            return Ok(hit.clone());
        }
        let value = self.graph.get_completion_rule(content_id)?;
        self.rules.insert(content_id.to_string(), value.clone());
        Ok(value)
    }

    /// 祖先查找(不缓存: 调用频率低且依赖层级整体)
    pub fn ancestor_of_type(
        &self,
        content_id: &str,
        content_type: ContentType,
    ) -> ContentResult<Option<String>> {
        self.graph.get_ancestor_of_type(content_id, content_type)
    }
}
