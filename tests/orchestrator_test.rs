// ==========================================
// 选课编排器 集成测试
// ==========================================
// 测试范围:
// 1. create 全流程 (快照/日志/事件)
// 2. 重复创建冲突与重新报读
// 3. 总线不可用快速失败
// 4. 状态迁移合法性 (EXPIRED 特权)
// 5. 幂等空操作守卫
// 6. 级联删除 (每节点一条 Delete 日志)
// 7. 从修订快照恢复
// ==========================================

mod test_helpers;

use enrolment_engine::domain::types::EnrolmentStatus;
use enrolment_engine::engine::{
    CreateEnrolmentRequest, EngineError, EnrolmentEventType, EnrolmentOrchestrator,
    UpdateEnrolmentRequest,
};
use enrolment_engine::repository::{
    ActionLogRepository, EnrolmentRepository, RevisionRepository, SqliteContentGraph,
};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use test_helpers::RecordingBus;

// ==========================================
// 辅助函数
// ==========================================

fn setup() -> (
    tempfile::NamedTempFile,
    Arc<Mutex<Connection>>,
    Arc<RecordingBus>,
    EnrolmentOrchestrator,
) {
    let (temp_file, db_path) = test_helpers::create_test_db().expect("创建测试数据库失败");
    let conn = Arc::new(Mutex::new(
        test_helpers::open_test_connection(&db_path).expect("打开数据库失败"),
    ));
    let graph = Arc::new(SqliteContentGraph::new(conn.clone()));
    let bus = Arc::new(RecordingBus::new());
    let orchestrator = EnrolmentOrchestrator::new(conn.clone(), graph, bus.clone())
        .expect("组装编排器失败");
    (temp_file, conn, bus, orchestrator)
}

/// 搭建 课程→模块→测验 三层内容树
fn seed_tree(conn: &Arc<Mutex<Connection>>) {
    let guard = conn.lock().unwrap();
    test_helpers::add_content_node(&guard, "c1", "COURSE", 0).unwrap();
    test_helpers::add_content_node(&guard, "m1", "MODULE", 0).unwrap();
    test_helpers::add_content_node(&guard, "q1", "QUIZ", 0).unwrap();
    test_helpers::add_content_edge(&guard, "c1", "m1", "MANDATORY").unwrap();
    test_helpers::add_content_edge(&guard, "m1", "q1", "MANDATORY").unwrap();
}

/// 创建三层选课树, 返回 (course, module, quiz) 的记录ID
fn enrol_tree(orch: &EnrolmentOrchestrator) -> (String, String, String) {
    let course = orch
        .create(CreateEnrolmentRequest::new("u1", "t1", "c1", "tester"))
        .unwrap();
    let module = orch
        .create(
            CreateEnrolmentRequest::new("u1", "t1", "m1", "tester")
                .with_parent("c1", &course.enrolment_id),
        )
        .unwrap();
    let quiz = orch
        .create(
            CreateEnrolmentRequest::new("u1", "t1", "q1", "tester")
                .with_parent("m1", &module.enrolment_id),
        )
        .unwrap();
    (course.enrolment_id, module.enrolment_id, quiz.enrolment_id)
}

// ==========================================
// create
// ==========================================

#[test]
fn test_create_persists_revision_log_and_event() {
    let (_tmp, conn, bus, orch) = setup();
    seed_tree(&conn);

    let enrolment = orch
        .create(CreateEnrolmentRequest::new("u1", "t1", "c1", "tester"))
        .unwrap();
    assert_eq!(enrolment.status, EnrolmentStatus::NotStarted);

    // 落库回读与内存中的记录逐字段一致 (时间戳为秒精度)
    let repo = EnrolmentRepository::new(conn.clone());
    let row = repo.find_by_id(&enrolment.enrolment_id).unwrap().unwrap();
    assert_eq!(row.created_at, enrolment.created_at);
    assert_eq!(row.changed_at, enrolment.changed_at);

    // 首个快照 + Create 日志 + 提交后发布的创建事件
    let revisions = RevisionRepository::new(conn.clone());
    assert_eq!(
        revisions.count_for_enrolment(&enrolment.enrolment_id).unwrap(),
        1
    );
    let logs = ActionLogRepository::new(conn.clone());
    assert_eq!(
        logs.count_by_type(&enrolment.enrolment_id, "Create").unwrap(),
        1
    );
    assert_eq!(bus.events_of(EnrolmentEventType::EnrolmentCreated).len(), 1);
}

#[test]
fn test_create_rejects_missing_content() {
    let (_tmp, _conn, _bus, orch) = setup();

    let err = orch
        .create(CreateEnrolmentRequest::new("u1", "t1", "ghost", "tester"))
        .unwrap_err();
    assert!(matches!(err, EngineError::ContentNotFound { .. }));
}

#[test]
fn test_create_rejects_parent_of_other_user() {
    let (_tmp, conn, _bus, orch) = setup();
    seed_tree(&conn);

    let course_a = orch
        .create(CreateEnrolmentRequest::new("u1", "t1", "c1", "tester"))
        .unwrap();

    // 父选课记录必须归属同一 (user, tenant)
    let err = orch
        .create(
            CreateEnrolmentRequest::new("u2", "t1", "m1", "tester")
                .with_parent("c1", &course_a.enrolment_id),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::ParentMismatch { .. }));

    let err = orch
        .create(
            CreateEnrolmentRequest::new("u1", "t2", "m1", "tester")
                .with_parent("c1", &course_a.enrolment_id),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::ParentMismatch { .. }));

    // 被拒绝的请求未留下任何写入
    let count: i64 = conn
        .lock()
        .unwrap()
        .query_row(
            "SELECT COUNT(*) FROM enrolment WHERE content_id = 'm1'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn test_create_rejects_unknown_parent() {
    let (_tmp, conn, _bus, orch) = setup();
    seed_tree(&conn);

    let err = orch
        .create(
            CreateEnrolmentRequest::new("u1", "t1", "m1", "tester").with_parent("c1", "ghost"),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::ParentNotFound { .. }));
}

#[test]
fn test_duplicate_create_returns_conflict_with_winner() {
    let (_tmp, conn, _bus, orch) = setup();
    seed_tree(&conn);

    let first = orch
        .create(CreateEnrolmentRequest::new("u1", "t1", "c1", "tester"))
        .unwrap();
    let err = orch
        .create(CreateEnrolmentRequest::new("u1", "t1", "c1", "tester"))
        .unwrap_err();

    match err {
        EngineError::Conflict { existing_id } => assert_eq!(existing_id, first.enrolment_id),
        other => panic!("期望 Conflict, 实际: {other}"),
    }
}

#[test]
fn test_re_enrol_archives_existing_subtree() {
    let (_tmp, conn, _bus, orch) = setup();
    seed_tree(&conn);
    let (course_id, module_id, _quiz_id) = enrol_tree(&orch);

    let renewed = orch
        .create(CreateEnrolmentRequest::new("u1", "t1", "c1", "tester").with_re_enrol())
        .unwrap();
    assert_ne!(renewed.enrolment_id, course_id);

    // 既有子树已归档删除, 新记录生效
    let repo = EnrolmentRepository::new(conn.clone());
    assert!(repo.find_by_id(&course_id).unwrap().is_none());
    assert!(repo.find_by_id(&module_id).unwrap().is_none());
    assert!(repo.find_by_id(&renewed.enrolment_id).unwrap().is_some());

    let logs = ActionLogRepository::new(conn.clone());
    assert_eq!(logs.count_by_type(&course_id, "Delete").unwrap(), 1);
    assert_eq!(logs.count_by_type(&module_id, "Delete").unwrap(), 1);
}

#[test]
fn test_unavailable_bus_fails_before_any_write() {
    let (_tmp, conn, bus, orch) = setup();
    seed_tree(&conn);
    bus.set_unavailable();

    let err = orch
        .create(CreateEnrolmentRequest::new("u1", "t1", "c1", "tester"))
        .unwrap_err();
    assert!(matches!(err, EngineError::BusUnavailable));

    // 任何写入都未发生
    let count: i64 = conn
        .lock()
        .unwrap()
        .query_row("SELECT COUNT(*) FROM enrolment", [], |r| r.get(0))
        .unwrap();
    assert_eq!(count, 0);
}

// ==========================================
// update
// ==========================================

#[test]
fn test_update_rejects_illegal_transition() {
    let (_tmp, conn, _bus, orch) = setup();
    seed_tree(&conn);
    let (_course, _module, quiz_id) = enrol_tree(&orch);

    orch.update(UpdateEnrolmentRequest::status_change(
        &quiz_id,
        EnrolmentStatus::Completed,
        "tester",
    ))
    .unwrap();

    // 完成后未经重算不得回退
    let err = orch
        .update(UpdateEnrolmentRequest::status_change(
            &quiz_id,
            EnrolmentStatus::InProgress,
            "tester",
        ))
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
}

#[test]
fn test_expired_requires_privileged_actor() {
    let (_tmp, conn, _bus, orch) = setup();
    seed_tree(&conn);
    let (course_id, _module, _quiz) = enrol_tree(&orch);

    let err = orch
        .update(UpdateEnrolmentRequest::status_change(
            &course_id,
            EnrolmentStatus::Expired,
            "tester",
        ))
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));

    let updated = orch
        .update(
            UpdateEnrolmentRequest::status_change(
                &course_id,
                EnrolmentStatus::Expired,
                "admin",
            )
            .with_privileged(),
        )
        .unwrap();
    assert_eq!(updated.status, EnrolmentStatus::Expired);
}

#[test]
fn test_noop_update_writes_and_publishes_nothing() {
    let (_tmp, conn, bus, orch) = setup();
    seed_tree(&conn);
    let (_course, _module, quiz_id) = enrol_tree(&orch);

    let revisions = RevisionRepository::new(conn.clone());
    let before_revisions = revisions.count_for_enrolment(&quiz_id).unwrap();
    let before_events = bus.len();

    // 状态不变且目标非完成 ⇒ 不写入不发布
    let result = orch
        .update(UpdateEnrolmentRequest::status_change(
            &quiz_id,
            EnrolmentStatus::NotStarted,
            "tester",
        ))
        .unwrap();
    assert_eq!(result.status, EnrolmentStatus::NotStarted);
    assert_eq!(
        revisions.count_for_enrolment(&quiz_id).unwrap(),
        before_revisions
    );
    assert_eq!(bus.len(), before_events);
}

#[test]
fn test_update_not_found() {
    let (_tmp, _conn, _bus, orch) = setup();
    let err = orch
        .update(UpdateEnrolmentRequest::status_change(
            "ghost",
            EnrolmentStatus::InProgress,
            "tester",
        ))
        .unwrap_err();
    assert!(matches!(err, EngineError::EnrolmentNotFound { .. }));
}

// ==========================================
// delete
// ==========================================

#[test]
fn test_delete_cascades_with_one_log_per_node() {
    let (_tmp, conn, bus, orch) = setup();
    seed_tree(&conn);
    let (course_id, module_id, quiz_id) = enrol_tree(&orch);

    let deleted = orch.delete(&course_id, true, "tester").unwrap();
    assert_eq!(deleted, 3);

    let repo = EnrolmentRepository::new(conn.clone());
    assert!(repo.find_by_id(&course_id).unwrap().is_none());
    assert!(repo.find_by_id(&module_id).unwrap().is_none());
    assert!(repo.find_by_id(&quiz_id).unwrap().is_none());

    // 每个节点恰好一条 Delete 日志与一个删除事件
    let logs = ActionLogRepository::new(conn.clone());
    for id in [&course_id, &module_id, &quiz_id] {
        assert_eq!(logs.count_by_type(id, "Delete").unwrap(), 1);
    }
    assert_eq!(bus.events_of(EnrolmentEventType::EnrolmentDeleted).len(), 3);

    // Delete 日志携带删除前的完整字段集 (既有值 → null)
    let course_logs = logs.list_for_enrolment(&course_id).unwrap();
    let delete_log = course_logs
        .iter()
        .find(|l| l.action_type == "Delete")
        .unwrap();
    let diff = delete_log.diff_json.as_ref().unwrap();
    assert_eq!(diff["user_id"]["from"], "u1");
    assert_eq!(diff["user_id"]["to"], serde_json::Value::Null);
    assert_eq!(diff["content_id"]["from"], "c1");
}

#[test]
fn test_delete_missing_enrolment_fails() {
    let (_tmp, _conn, _bus, orch) = setup();
    let err = orch.delete("ghost", true, "tester").unwrap_err();
    assert!(matches!(err, EngineError::EnrolmentNotFound { .. }));
}

// ==========================================
// restore
// ==========================================

#[test]
fn test_restore_rebuilds_subtree_parent_first() {
    let (_tmp, conn, bus, orch) = setup();
    seed_tree(&conn);
    let (course_id, module_id, quiz_id) = enrol_tree(&orch);

    orch.update(
        UpdateEnrolmentRequest::status_change(&quiz_id, EnrolmentStatus::Completed, "tester")
            .with_result(75.0, 1),
    )
    .unwrap();
    orch.delete(&course_id, true, "tester").unwrap();

    let restored = orch.restore(&course_id, "tester").unwrap();
    assert_eq!(restored.len(), 3);
    assert_eq!(restored[0].enrolment_id, course_id);

    // 状态从删除前的最新快照恢复
    let repo = EnrolmentRepository::new(conn.clone());
    let quiz = repo.find_by_id(&quiz_id).unwrap().unwrap();
    assert_eq!(quiz.status, EnrolmentStatus::Completed);
    assert_eq!(quiz.result, Some(75.0));
    assert_eq!(
        quiz.parent_enrolment_id.as_deref(),
        Some(module_id.as_str())
    );

    let logs = ActionLogRepository::new(conn.clone());
    assert_eq!(logs.count_by_type(&course_id, "Restore").unwrap(), 1);

    // Restore 日志将重建字段记为新增 (null → 恢复值)
    let quiz_logs = logs.list_for_enrolment(&quiz_id).unwrap();
    let restore_log = quiz_logs
        .iter()
        .find(|l| l.action_type == "Restore")
        .unwrap();
    let diff = restore_log.diff_json.as_ref().unwrap();
    assert_eq!(diff["status"]["from"], serde_json::Value::Null);
    assert_eq!(diff["status"]["to"], "COMPLETED");
    assert_eq!(diff["result"]["to"], 75.0);

    // 每个重建节点发布一个创建事件 (初建 3 + 恢复 3)
    assert_eq!(bus.events_of(EnrolmentEventType::EnrolmentCreated).len(), 6);
}

#[test]
fn test_restore_existing_enrolment_conflicts() {
    let (_tmp, conn, _bus, orch) = setup();
    seed_tree(&conn);
    let (course_id, _module, _quiz) = enrol_tree(&orch);

    let err = orch.restore(&course_id, "tester").unwrap_err();
    assert!(matches!(err, EngineError::Conflict { .. }));
}

#[test]
fn test_restore_without_revisions_fails() {
    let (_tmp, _conn, _bus, orch) = setup();
    let err = orch.restore("ghost", "tester").unwrap_err();
    assert!(matches!(err, EngineError::NothingToRestore { .. }));
}
