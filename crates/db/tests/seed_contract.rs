use std::collections::HashSet;
use std::sync::Arc;

use signoff_core::approvals::ChainResolver;
use signoff_core::workflow::{NoopNotifier, RequestContext};
use signoff_db::{
    connect_with_settings, migrations, ApprovalService, DemoSeed, SqlAuditEventRepository,
    SqlSubjectRepository, SubjectRepository,
};

type SeedContractTestResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr) => {
        if !$cond {
            return Err(format!("assertion failed: `{}`", stringify!($cond)));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

macro_rules! require_eq {
    ($left:expr, $right:expr) => {
        if $left != $right {
            return Err(format!(
                "assertion failed: `left == right` (`{:?}` != `{:?}`)",
                $left,
                $right
            ));
        }
    };
    ($left:expr, $right:expr, $($arg:tt)*) => {
        if $left != $right {
            return Err(format!($($arg)*));
        }
    };
}

async fn sqlite_service() -> SeedContractTestResult<ApprovalService<SqlSubjectRepository>> {
    let pool = connect_with_settings("sqlite::memory:", 1, 30)
        .await
        .map_err(|error| format!("connect: {error}"))?;
    migrations::run_pending(&pool).await.map_err(|error| format!("migrate: {error}"))?;
    let resolver = ChainResolver::sample().map_err(|error| format!("resolver: {error}"))?;

    Ok(ApprovalService::new(SqlSubjectRepository::new(pool.clone()), resolver, Arc::new(NoopNotifier))
        .with_audit_log(Arc::new(SqlAuditEventRepository::new(pool))))
}

#[tokio::test]
async fn demo_seed_loads_every_policy_and_verifies() -> SeedContractTestResult {
    let service = sqlite_service().await?;
    let context = RequestContext::new("req-seed", "seed-test");

    let seeded = DemoSeed::load(&service, &context).await.map_err(|error| error.to_string())?;
    require_eq!(seeded.created_count(), DemoSeed::subject_ids().len());

    let verification = DemoSeed::verify(&service).await.map_err(|error| error.to_string())?;
    require!(verification.all_passed(), "seed verification failed: {:?}", verification.checks);

    let subjects = service.list_all().await.map_err(|error| error.to_string())?;
    let policies: HashSet<&str> = subjects.iter().map(|subject| subject.policy_key.as_str()).collect();
    require_eq!(policies.len(), 4, "every policy should have a demo subject: {policies:?}");

    let statuses: HashSet<&str> =
        subjects.iter().map(|subject| subject.approval_status().as_str()).collect();
    require_eq!(statuses.len(), 4, "demo data should cover every approval status");
    Ok(())
}

#[tokio::test]
async fn demo_seed_is_idempotent_and_cleanable() -> SeedContractTestResult {
    let service = sqlite_service().await?;
    let context = RequestContext::new("req-seed", "seed-test");

    DemoSeed::load(&service, &context).await.map_err(|error| error.to_string())?;
    let second = DemoSeed::load(&service, &context).await.map_err(|error| error.to_string())?;
    require_eq!(second.created_count(), 0, "second load should skip existing subjects");

    let removed = DemoSeed::clean(&service).await.map_err(|error| error.to_string())?;
    require_eq!(removed, DemoSeed::subject_ids().len());

    let remaining =
        service.repository().list_all().await.map_err(|error| error.to_string())?;
    require!(remaining.is_empty(), "clean should remove every demo subject");

    let verification = DemoSeed::verify(&service).await.map_err(|error| error.to_string())?;
    require!(!verification.all_passed());
    Ok(())
}

#[tokio::test]
async fn demo_seed_pending_queue_matches_active_levels() -> SeedContractTestResult {
    let service = sqlite_service().await?;
    let context = RequestContext::new("req-seed", "seed-test");
    DemoSeed::load(&service, &context).await.map_err(|error| error.to_string())?;

    let chioma = service
        .get_pending_for_approver("Chioma.Nwosu@signoff.example")
        .await
        .map_err(|error| error.to_string())?;
    require_eq!(chioma.len(), 1);
    require_eq!(chioma[0].id.0.as_str(), "CR-DEMO-001");

    let sam = service
        .get_pending_for_approver("sam.eze@signoff.example")
        .await
        .map_err(|error| error.to_string())?;
    require!(sam.is_empty(), "Sam already decided level one");

    let trail = service
        .audit_trail(&chioma[0].id)
        .await
        .map_err(|error| error.to_string())?;
    require!(
        trail.iter().any(|event| event.event_type == "workflow.step_decided"),
        "seeded decisions should be in the persisted audit trail"
    );
    Ok(())
}
