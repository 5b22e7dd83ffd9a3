use std::collections::HashMap;

use tokio::sync::RwLock;

use signoff_core::audit::AuditEvent;
use signoff_core::domain::person::EmailKey;
use signoff_core::domain::subject::{Subject, SubjectId};

use super::{AuditEventRepository, RepositoryError, SubjectRepository};

#[derive(Default)]
pub struct InMemorySubjectRepository {
    subjects: RwLock<HashMap<String, Subject>>,
}

#[async_trait::async_trait]
impl SubjectRepository for InMemorySubjectRepository {
    async fn find_by_id(&self, id: &SubjectId) -> Result<Option<Subject>, RepositoryError> {
        let subjects = self.subjects.read().await;
        Ok(subjects.get(&id.0).cloned())
    }

    async fn insert(&self, subject: &Subject) -> Result<(), RepositoryError> {
        let mut subjects = self.subjects.write().await;
        if subjects.contains_key(&subject.id.0) {
            return Err(RepositoryError::Duplicate(subject.id.clone()));
        }
        subjects.insert(subject.id.0.clone(), subject.clone());
        Ok(())
    }

    async fn update(
        &self,
        subject: &Subject,
        expected_version: u64,
    ) -> Result<u64, RepositoryError> {
        let mut subjects = self.subjects.write().await;
        let Some(stored) = subjects.get_mut(&subject.id.0) else {
            return Err(RepositoryError::NotFound(subject.id.clone()));
        };
        if stored.version != expected_version {
            return Err(RepositoryError::Conflict {
                subject_id: subject.id.clone(),
                expected_version,
            });
        }

        let mut next = subject.clone();
        next.version = expected_version + 1;
        next.created_at = stored.created_at;
        *stored = next;
        Ok(expected_version + 1)
    }

    async fn list_pending_for_approver(
        &self,
        approver_email: &str,
    ) -> Result<Vec<Subject>, RepositoryError> {
        let key = EmailKey::new(approver_email);
        let subjects = self.subjects.read().await;
        let mut pending: Vec<Subject> = subjects
            .values()
            .filter(|subject| subject.is_awaiting(key.as_str()))
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(pending)
    }

    async fn list_all(&self) -> Result<Vec<Subject>, RepositoryError> {
        let subjects = self.subjects.read().await;
        let mut all: Vec<Subject> = subjects.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }

    async fn delete(&self, id: &SubjectId) -> Result<bool, RepositoryError> {
        let mut subjects = self.subjects.write().await;
        Ok(subjects.remove(&id.0).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryAuditEventRepository {
    events: RwLock<Vec<AuditEvent>>,
}

impl InMemoryAuditEventRepository {
    pub async fn all(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait::async_trait]
impl AuditEventRepository for InMemoryAuditEventRepository {
    async fn append(&self, events: &[AuditEvent]) -> Result<(), RepositoryError> {
        let mut stored = self.events.write().await;
        stored.extend(events.iter().cloned());
        Ok(())
    }

    async fn list_for_subject(&self, id: &SubjectId) -> Result<Vec<AuditEvent>, RepositoryError> {
        let stored = self.events.read().await;
        Ok(stored.iter().filter(|event| event.subject_id.as_ref() == Some(id)).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use signoff_core::domain::approval::ApprovalChain;
    use signoff_core::domain::person::Person;
    use signoff_core::domain::subject::{PolicyKey, Subject, SubjectId};

    use super::InMemorySubjectRepository;
    use crate::repositories::{RepositoryError, SubjectRepository};

    #[tokio::test]
    async fn in_memory_update_bumps_version_and_refuses_stale_writes() {
        let repo = InMemorySubjectRepository::default();
        let mut subject = Subject::new(
            SubjectId("USR-1".to_string()),
            PolicyKey::UserHierarchy,
            "Laptop purchase",
            "Zainab Sule",
        );
        repo.insert(&subject).await.expect("insert");

        subject.approval = Some(
            ApprovalChain::assign(
                PolicyKey::UserHierarchy,
                vec![Person::new("Tobi", "tobi@signoff.example", "Team Lead", "Finance")],
                Utc::now(),
            )
            .expect("chain"),
        );
        assert_eq!(repo.update(&subject, 0).await.expect("update"), 1);

        let error = repo.update(&subject, 0).await.expect_err("stale");
        assert!(matches!(error, RepositoryError::Conflict { expected_version: 0, .. }));

        let pending = repo.list_pending_for_approver("TOBI@signoff.example").await.expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].version, 1);
    }
}
