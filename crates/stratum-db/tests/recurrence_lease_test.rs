//! Recurrence scan lease and successor uniqueness against PostgreSQL.

use chrono::Utc;
use stratum_db::test_fixtures::TestDatabase;
use stratum_db::{
    CreateTaskRequest, RecurrenceStore, RecurrenceType, Task, TaskRepository, TaskStatus,
};

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_only_one_scan_holds_the_lease() {
    let t = TestDatabase::new().await;

    let first = t
        .db
        .recurrence
        .begin_scan()
        .await
        .expect("begin")
        .expect("lease acquired");
    let second = t.db.recurrence.begin_scan().await.expect("begin");
    assert!(second.is_none());

    first.rollback().await.expect("rollback");
    let third = t.db.recurrence.begin_scan().await.expect("begin");
    assert!(third.is_some());
    third.unwrap().rollback().await.unwrap();

    t.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_successor_excludes_source_from_later_scans() {
    let t = TestDatabase::new().await;
    let id = t
        .db
        .tasks
        .insert(
            t.tenant_id,
            t.user_id,
            CreateTaskRequest {
                title: "Daily standup".to_string(),
                recurrence_type: RecurrenceType::Daily,
                status: TaskStatus::Completed,
                ..Default::default()
            },
        )
        .await
        .expect("insert");
    let source = t.db.tasks.fetch(t.tenant_id, id).await.expect("fetch");

    let mut scan = t.db.recurrence.begin_scan().await.unwrap().unwrap();
    let candidates = scan.recurring_tasks().await.unwrap();
    assert!(candidates.iter().any(|c| c.id == id));

    let now = Utc::now();
    let mut successor: Task = source.clone();
    successor.id = uuid::Uuid::now_v7();
    successor.status = TaskStatus::NotStarted;
    successor.completed_at = None;
    successor.recurrence_source_id = Some(id);
    successor.recurrence_source_completed_at = source.completed_at;
    successor.subtasks.clear();
    successor.steps.clear();
    successor.created_at = now;
    successor.updated_at = now;
    scan.insert_instance(&successor).await.unwrap();
    scan.commit().await.unwrap();

    let mut scan = t.db.recurrence.begin_scan().await.unwrap().unwrap();
    let candidates = scan.recurring_tasks().await.unwrap();
    assert!(!candidates.iter().any(|c| c.id == id));
    assert!(candidates.iter().any(|c| c.id == successor.id));
    scan.rollback().await.unwrap();

    // The source itself is untouched.
    let reloaded = t.db.tasks.fetch(t.tenant_id, id).await.unwrap();
    assert_eq!(reloaded.status, TaskStatus::Completed);

    t.cleanup().await;
}
