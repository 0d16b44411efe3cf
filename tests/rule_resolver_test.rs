// ==========================================
// 完成规则解析器 集成测试
// ==========================================
// 测试范围:
// 1. 显式日期优先
// 2. FIXED / OWN_DURATION 规则
// 3. PARENT_DURATION 递归解析与无父级回退
// 4. COURSE_DURATION 按祖先课程开始时间
// 5. 经由编排器的计划创建(自主学习, 无指派人)
// ==========================================

mod test_helpers;

use chrono::{NaiveDate, NaiveDateTime};
use enrolment_engine::domain::completion_rule::CompletionRule;
use enrolment_engine::domain::enrolment::{Enrolment, EnrolmentData};
use enrolment_engine::domain::types::{ContentType, EnrolmentStatus};
use enrolment_engine::engine::{
    CompletionRuleResolver, ContentLookupCache, CreateEnrolmentRequest, EnrolmentOrchestrator,
};
use enrolment_engine::repository::{EnrolmentRepository, PlanRepository, SqliteContentGraph};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use test_helpers::RecordingBus;

// ==========================================
// 辅助函数
// ==========================================

fn setup() -> (tempfile::NamedTempFile, Arc<Mutex<Connection>>) {
    let (temp_file, db_path) = test_helpers::create_test_db().expect("创建测试数据库失败");
    let conn = Arc::new(Mutex::new(
        test_helpers::open_test_connection(&db_path).expect("打开数据库失败"),
    ));
    (temp_file, conn)
}

fn ts(y: i32, m: u32, d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn make_enrolment(
    enrolment_id: &str,
    content_id: &str,
    parent_enrolment_id: Option<&str>,
    start_ts: Option<NaiveDateTime>,
) -> Enrolment {
    let now = ts(2026, 1, 1);
    Enrolment {
        enrolment_id: enrolment_id.to_string(),
        user_id: "u1".to_string(),
        tenant_id: "t1".to_string(),
        content_id: content_id.to_string(),
        parent_content_id: None,
        parent_enrolment_id: parent_enrolment_id.map(|s| s.to_string()),
        status: EnrolmentStatus::NotStarted,
        result: None,
        pass: 0,
        start_ts,
        end_ts: None,
        data: EnrolmentData::default(),
        created_at: now,
        changed_at: now,
    }
}

// ==========================================
// 解析规则
// ==========================================

#[test]
fn test_explicit_date_wins_over_rule() {
    let (_tmp, conn) = setup();
    {
        let guard = conn.lock().unwrap();
        test_helpers::add_content_node_with_rule(&guard, "c1", "COURSE", "OWN_DURATION", None, Some(7))
            .unwrap();
    }

    let repo = Arc::new(EnrolmentRepository::new(conn.clone()));
    let resolver = CompletionRuleResolver::new(repo);
    let graph = SqliteContentGraph::new(conn.clone());
    let mut cache = ContentLookupCache::new(&graph);

    let enrolment = make_enrolment("e1", "c1", None, Some(ts(2026, 3, 1)));
    let explicit = ts(2026, 12, 31);
    let resolved = resolver
        .resolve_due_date(&enrolment, Some(explicit), &mut cache)
        .unwrap()
        .expect("应解析出截止日期");

    assert_eq!(resolved.due_ts, explicit);
    assert!(matches!(resolved.rule, CompletionRule::Fixed { .. }));
}

#[test]
fn test_fixed_rule_uses_literal_date() {
    let (_tmp, conn) = setup();
    {
        let guard = conn.lock().unwrap();
        test_helpers::add_content_node_with_rule(
            &guard,
            "c1",
            "COURSE",
            "FIXED",
            Some("2026-09-01 00:00:00"),
            None,
        )
        .unwrap();
    }

    let repo = Arc::new(EnrolmentRepository::new(conn.clone()));
    let resolver = CompletionRuleResolver::new(repo);
    let graph = SqliteContentGraph::new(conn.clone());
    let mut cache = ContentLookupCache::new(&graph);

    let enrolment = make_enrolment("e1", "c1", None, None);
    let resolved = resolver
        .resolve_due_date(&enrolment, None, &mut cache)
        .unwrap()
        .expect("应解析出截止日期");
    assert_eq!(resolved.due_ts, ts(2026, 9, 1));
}

#[test]
fn test_own_duration_from_start_ts() {
    let (_tmp, conn) = setup();
    {
        let guard = conn.lock().unwrap();
        test_helpers::add_content_node_with_rule(&guard, "c1", "COURSE", "OWN_DURATION", None, Some(7))
            .unwrap();
    }

    let repo = Arc::new(EnrolmentRepository::new(conn.clone()));
    let resolver = CompletionRuleResolver::new(repo);
    let graph = SqliteContentGraph::new(conn.clone());
    let mut cache = ContentLookupCache::new(&graph);

    let enrolment = make_enrolment("e1", "c1", None, Some(ts(2026, 3, 1)));
    let resolved = resolver
        .resolve_due_date(&enrolment, None, &mut cache)
        .unwrap()
        .expect("应解析出截止日期");
    assert_eq!(resolved.due_ts, ts(2026, 3, 8));
}

#[test]
fn test_parent_duration_resolves_recursively() {
    let (_tmp, conn) = setup();
    {
        let guard = conn.lock().unwrap();
        test_helpers::add_content_node_with_rule(&guard, "c1", "COURSE", "OWN_DURATION", None, Some(7))
            .unwrap();
        test_helpers::add_content_node_with_rule(&guard, "m1", "MODULE", "PARENT_DURATION", None, Some(3))
            .unwrap();
        test_helpers::add_content_edge(&guard, "c1", "m1", "MANDATORY").unwrap();
    }

    let repo = Arc::new(EnrolmentRepository::new(conn.clone()));
    let parent = make_enrolment("e-course", "c1", None, Some(ts(2026, 3, 1)));
    repo.insert(&parent).unwrap();

    let resolver = CompletionRuleResolver::new(repo);
    let graph = SqliteContentGraph::new(conn.clone());
    let mut cache = ContentLookupCache::new(&graph);

    // 父级规则解析出 03-08, 子级再加 3 天
    let child = make_enrolment("e-module", "m1", Some("e-course"), None);
    let resolved = resolver
        .resolve_due_date(&child, None, &mut cache)
        .unwrap()
        .expect("应解析出截止日期");
    assert_eq!(resolved.due_ts, ts(2026, 3, 11));
}

#[test]
fn test_parent_duration_without_parent_yields_none() {
    let (_tmp, conn) = setup();
    {
        let guard = conn.lock().unwrap();
        test_helpers::add_content_node_with_rule(&guard, "m1", "MODULE", "PARENT_DURATION", None, Some(3))
            .unwrap();
    }

    let repo = Arc::new(EnrolmentRepository::new(conn.clone()));
    let resolver = CompletionRuleResolver::new(repo);
    let graph = SqliteContentGraph::new(conn.clone());
    let mut cache = ContentLookupCache::new(&graph);

    let standalone = make_enrolment("e1", "m1", None, Some(ts(2026, 3, 1)));
    let resolved = resolver
        .resolve_due_date(&standalone, None, &mut cache)
        .unwrap();
    assert!(resolved.is_none());
}

#[test]
fn test_course_duration_uses_course_start() {
    let (_tmp, conn) = setup();
    {
        let guard = conn.lock().unwrap();
        test_helpers::add_content_node(&guard, "c1", "COURSE", 0).unwrap();
        test_helpers::add_content_node(&guard, "m1", "MODULE", 0).unwrap();
        test_helpers::add_content_node_with_rule(&guard, "q1", "QUIZ", "COURSE_DURATION", None, Some(14))
            .unwrap();
        test_helpers::add_content_edge(&guard, "c1", "m1", "MANDATORY").unwrap();
        test_helpers::add_content_edge(&guard, "m1", "q1", "MANDATORY").unwrap();
    }

    let repo = Arc::new(EnrolmentRepository::new(conn.clone()));
    let course = make_enrolment("e-course", "c1", None, Some(ts(2026, 5, 1)));
    let module = make_enrolment("e-module", "m1", Some("e-course"), None);
    repo.insert(&course).unwrap();
    repo.insert(&module).unwrap();

    let resolver = CompletionRuleResolver::new(repo);
    let graph = SqliteContentGraph::new(conn.clone());
    let mut cache = ContentLookupCache::new(&graph);

    let quiz = make_enrolment("e-quiz", "q1", Some("e-module"), None);
    let resolved = resolver
        .resolve_due_date(&quiz, None, &mut cache)
        .unwrap()
        .expect("应解析出截止日期");
    assert_eq!(resolved.due_ts, ts(2026, 5, 15));
}

// ==========================================
// 经由编排器的计划落库
// ==========================================

#[test]
fn test_own_duration_rule_creates_self_directed_plan() {
    let (_tmp, conn) = setup();
    {
        let guard = conn.lock().unwrap();
        test_helpers::add_content_node_with_rule(&guard, "c1", "COURSE", "OWN_DURATION", None, Some(7))
            .unwrap();
    }

    let graph = Arc::new(SqliteContentGraph::new(conn.clone()));
    let bus = Arc::new(RecordingBus::new());
    let orch = EnrolmentOrchestrator::new(conn.clone(), graph, bus).expect("组装编排器失败");

    let mut req = CreateEnrolmentRequest::new("u1", "t1", "c1", "tester");
    req.start_ts = Some(ts(2026, 3, 1));
    let enrolment = orch.create(req).unwrap();

    // 规则派生计划: 截止 = 开始 + 7 天, 无指派人(自主学习)
    let plan_repo = PlanRepository::new(conn.clone());
    let plan = plan_repo
        .find_by_key("u1", "t1", ContentType::Course, "c1")
        .unwrap()
        .expect("应创建学习计划");
    assert_eq!(plan.due_ts, Some(ts(2026, 3, 8)));
    assert!(plan.is_self_directed());

    // 选课与计划已关联
    assert!(plan_repo
        .link_exists(&enrolment.enrolment_id, &plan.plan_id)
        .unwrap());
    let linked = plan_repo
        .list_plans_for_enrolment(&enrolment.enrolment_id)
        .unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].plan_id, plan.plan_id);
}
