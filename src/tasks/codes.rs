//! Per-group task code allocation.
//!
//! Direct creation draws a random 4-digit code and leans on the DB's
//! `UNIQUE (group_id, code)` constraint: insert, and on a constraint
//! violation draw again, up to a fixed bound. Imports instead derive a
//! stable code from the external event id so re-imports upsert in place.

use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{DatabaseError, TaskError};
use crate::store::Database;
use crate::tasks::model::{NewTask, Task};

/// Maximum insert attempts before reporting the code space exhausted.
pub const CODE_ALLOC_ATTEMPTS: u32 = 25;

/// Draw a random zero-padded 4-digit code.
pub fn random_code() -> String {
    format!("{:04}", rand::thread_rng().gen_range(0..10_000))
}

/// Derive a deterministic 4-digit code from an external event id.
pub fn derived_code(external_id: &str) -> String {
    let digest = Sha256::digest(external_id.as_bytes());
    let n = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    format!("{:04}", n % 10_000)
}

/// Create a task with a freshly allocated code.
///
/// Retries on uniqueness collisions only; any other database error
/// propagates unchanged. Exhausting the attempt bound surfaces
/// [`TaskError::CodesExhausted`].
pub async fn allocate_task(db: &dyn Database, new: NewTask) -> Result<Task, TaskError> {
    db.ensure_group(&new.group_id).await?;

    for attempt in 0..CODE_ALLOC_ATTEMPTS {
        let mut task = Task::new(new.group_id.as_str(), random_code(), new.title.as_str())
            .with_priority(new.priority)
            .with_tags(new.tags.clone());
        task.description = new.description.clone();
        task.due_at = new.due_at;

        match db.insert_task(&task).await {
            Ok(()) => {
                debug!(group_id = %task.group_id, code = %task.code, attempt, "Task code allocated");
                return Ok(task);
            }
            Err(DatabaseError::Constraint(_)) => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Err(TaskError::CodesExhausted {
        group_id: new.group_id,
        attempts: CODE_ALLOC_ATTEMPTS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    #[test]
    fn random_code_is_four_digits() {
        for _ in 0..100 {
            let code = random_code();
            assert_eq!(code.len(), 4);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn derived_code_is_stable() {
        let a = derived_code("evt_abc123");
        let b = derived_code("evt_abc123");
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
        assert!(a.chars().all(|c| c.is_ascii_digit()));
        assert_ne!(derived_code("evt_abc123"), derived_code("evt_def456"));
    }

    #[tokio::test]
    async fn two_creations_get_distinct_codes() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let a = allocate_task(&db, NewTask::new("g1", "first")).await.unwrap();
        let b = allocate_task(&db, NewTask::new("g1", "second")).await.unwrap();
        assert_ne!(a.code, b.code);
    }

    #[tokio::test]
    async fn same_code_allowed_across_groups() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        db.ensure_group("g1").await.unwrap();
        db.ensure_group("g2").await.unwrap();
        db.insert_task(&Task::new("g1", "0042", "a")).await.unwrap();
        db.insert_task(&Task::new("g2", "0042", "b")).await.unwrap();
    }

    #[tokio::test]
    async fn allocator_retries_past_collisions() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        db.ensure_group("g1").await.unwrap();
        // Occupy the lower half of the space. Each draw misses a free
        // code with probability 1/2, so 25 draws all miss with
        // probability 2^-25 and the allocator reliably lands one.
        for n in 0..5_000u32 {
            db.insert_task(&Task::new("g1", format!("{n:04}"), "filler"))
                .await
                .unwrap();
        }
        let task = allocate_task(&db, NewTask::new("g1", "squeezed in"))
            .await
            .unwrap();
        let n: u32 = task.code.parse().unwrap();
        assert!(n >= 5_000);
    }

    #[tokio::test]
    async fn allocator_reports_exhaustion_when_space_full() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        db.ensure_group("g1").await.unwrap();
        for n in 0..10_000u32 {
            db.insert_task(&Task::new("g1", format!("{n:04}"), "filler"))
                .await
                .unwrap();
        }
        let err = allocate_task(&db, NewTask::new("g1", "no room"))
            .await
            .unwrap_err();
        match err {
            TaskError::CodesExhausted { group_id, attempts } => {
                assert_eq!(group_id, "g1");
                assert_eq!(attempts, CODE_ALLOC_ATTEMPTS);
            }
            other => panic!("expected CodesExhausted, got {other:?}"),
        }
    }
}
