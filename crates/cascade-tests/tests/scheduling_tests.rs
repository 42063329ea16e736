//! End-to-end scheduling tests against PostgreSQL.
//!
//! Run with: `cargo test -p cascade-tests --test scheduling_tests --features integration`

#![cfg(feature = "integration")]

use cascade_core::ids::JobId;
use cascade_core::job::JobStatus;
use cascade_core::ports::JobRepository;
use cascade_scheduler::{CompletionCoordinator, FanInPolicy, JobMaterializer, MaterializerConfig};
use cascade_tests::{ProjectFixture, RecordingDispatcher, TestContext};
use std::sync::Arc;

const WORKFLOW: &str = "cascade.yml";

async fn status_of(repo: &dyn JobRepository, id: JobId) -> JobStatus {
    repo.get(id)
        .await
        .expect("Failed to get job")
        .expect("Job not found")
        .status
}

#[tokio::test]
async fn test_materialize_diamond_per_edge() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let repo = ctx.jobs();
    let projects = ProjectFixture::diamond();

    let batch = JobMaterializer::new(repo.clone(), MaterializerConfig::default())
        .materialize(
            &ProjectFixture::graph(&projects),
            &ProjectFixture::impacted_all(&projects),
            &ProjectFixture::payloads(&projects),
            "main",
            &ProjectFixture::repo(),
        )
        .await
        .expect("Failed to materialize");

    assert!(batch.is_complete());
    assert_eq!(batch.job_count(), 5);
    assert_eq!(batch.jobs["d"].len(), 2);

    let jobs = repo.get_by_batch(batch.batch_id).await.unwrap();
    assert_eq!(jobs.len(), 5);
    let mut d_parents: Vec<JobId> = jobs
        .iter()
        .filter(|j| j.project == "d")
        .filter_map(|j| j.parent_id)
        .collect();
    d_parents.sort();
    let mut expected = vec![batch.jobs["b"][0], batch.jobs["c"][0]];
    expected.sort();
    assert_eq!(d_parents, expected);

    for job in &jobs {
        let links = repo.get_links(job.id).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].repo_full_name, "acme/infra");
    }
}

#[tokio::test]
async fn test_materialize_collapsed_fan_in() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let repo = ctx.jobs();
    let projects = ProjectFixture::diamond();
    let config = MaterializerConfig {
        fan_in: FanInPolicy::Collapsed,
        strict: false,
    };

    let batch = JobMaterializer::new(repo.clone(), config)
        .materialize(
            &ProjectFixture::graph(&projects),
            &ProjectFixture::impacted_all(&projects),
            &ProjectFixture::payloads(&projects),
            "main",
            &ProjectFixture::repo(),
        )
        .await
        .expect("Failed to materialize");

    assert_eq!(batch.job_count(), 4);
    let d = repo.get(batch.jobs["d"][0]).await.unwrap().unwrap();
    // Traversal visits c after b, so d chains to c and waits on b.
    assert_eq!(d.parent_id, Some(batch.jobs["c"][0]));
    assert_eq!(d.waits_on, vec![batch.jobs["b"][0]]);
}

#[tokio::test]
async fn test_collapsed_fan_in_waits_for_slower_branch() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let repo = ctx.jobs();
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let projects = ProjectFixture::diamond();
    let gh_repo = ProjectFixture::repo();
    let config = MaterializerConfig {
        fan_in: FanInPolicy::Collapsed,
        strict: false,
    };

    let batch = JobMaterializer::new(repo.clone(), config)
        .materialize(
            &ProjectFixture::graph(&projects),
            &ProjectFixture::impacted_all(&projects),
            &ProjectFixture::payloads(&projects),
            "main",
            &gh_repo,
        )
        .await
        .unwrap();
    let [a, b, c, d] = ["a", "b", "c", "d"].map(|p| batch.jobs[p][0]);

    let coordinator = CompletionCoordinator::new(repo.clone(), dispatcher.clone());
    coordinator
        .dispatch_roots(batch.batch_id, &gh_repo, WORKFLOW)
        .await
        .unwrap();
    coordinator
        .report_completion(a, JobStatus::Succeeded, &gh_repo, WORKFLOW)
        .await
        .unwrap();
    let report = coordinator
        .report_completion(c, JobStatus::Succeeded, &gh_repo, WORKFLOW)
        .await
        .unwrap()
        .expect("success cascades");

    assert_eq!(report.waiting, vec![d]);
    assert_eq!(status_of(repo.as_ref(), b).await, JobStatus::Triggered);
    assert_eq!(status_of(repo.as_ref(), d).await, JobStatus::Created);
    assert!(!dispatcher.job_ids().contains(&d.to_string()));

    let report = coordinator
        .report_completion(b, JobStatus::Succeeded, &gh_repo, WORKFLOW)
        .await
        .unwrap()
        .expect("success cascades");
    assert_eq!(report.triggered, vec![d]);
    assert_eq!(status_of(repo.as_ref(), d).await, JobStatus::Triggered);
    assert_eq!(dispatcher.job_ids().len(), 4);
}

#[tokio::test]
async fn test_completion_cascades_through_chain() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let repo = ctx.jobs();
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let projects = ProjectFixture::chain(&["network", "cluster", "apps"]);
    let gh_repo = ProjectFixture::repo();

    let batch = JobMaterializer::new(repo.clone(), MaterializerConfig::default())
        .materialize(
            &ProjectFixture::graph(&projects),
            &ProjectFixture::impacted_all(&projects),
            &ProjectFixture::payloads(&projects),
            "main",
            &gh_repo,
        )
        .await
        .unwrap();
    let network = batch.jobs["network"][0];
    let cluster = batch.jobs["cluster"][0];
    let apps = batch.jobs["apps"][0];

    let coordinator = CompletionCoordinator::new(repo.clone(), dispatcher.clone());
    let roots = coordinator
        .dispatch_roots(batch.batch_id, &gh_repo, WORKFLOW)
        .await
        .unwrap();
    assert_eq!(roots.triggered, vec![network]);
    assert_eq!(status_of(repo.as_ref(), network).await, JobStatus::Triggered);
    assert_eq!(status_of(repo.as_ref(), cluster).await, JobStatus::Created);

    let report = coordinator
        .report_completion(network, JobStatus::Succeeded, &gh_repo, WORKFLOW)
        .await
        .unwrap()
        .expect("success cascades");
    assert_eq!(report.triggered, vec![cluster]);
    assert_eq!(status_of(repo.as_ref(), network).await, JobStatus::Succeeded);
    assert_eq!(status_of(repo.as_ref(), cluster).await, JobStatus::Triggered);

    let report = coordinator
        .report_completion(cluster, JobStatus::Failed, &gh_repo, WORKFLOW)
        .await
        .unwrap();
    assert!(report.is_none());
    assert_eq!(status_of(repo.as_ref(), apps).await, JobStatus::Created);

    assert_eq!(
        dispatcher.job_ids(),
        vec![network.to_string(), cluster.to_string()]
    );
    let requests = dispatcher.requests();
    assert_eq!(requests[1].inputs.job, r#"{"project":"cluster"}"#);
    assert_eq!(requests[1].git_ref, "main");
}

#[tokio::test]
async fn test_concurrent_completions_dispatch_each_child_once() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let repo = ctx.jobs();
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let projects = vec![
        cascade_core::project::Project::new("network"),
        cascade_core::project::Project::new("cluster").depends_on(["network"]),
        cascade_core::project::Project::new("dns").depends_on(["network"]),
        cascade_core::project::Project::new("cdn").depends_on(["network"]),
    ];
    let gh_repo = ProjectFixture::repo();

    let batch = JobMaterializer::new(repo.clone(), MaterializerConfig::default())
        .materialize(
            &ProjectFixture::graph(&projects),
            &ProjectFixture::impacted_all(&projects),
            &ProjectFixture::payloads(&projects),
            "main",
            &gh_repo,
        )
        .await
        .unwrap();
    let network = batch.jobs["network"][0];

    let first = CompletionCoordinator::new(repo.clone(), dispatcher.clone());
    let second = CompletionCoordinator::new(repo.clone(), dispatcher.clone());
    let (a, b) = tokio::join!(
        first.on_job_completed(network, &gh_repo, WORKFLOW),
        second.on_job_completed(network, &gh_repo, WORKFLOW),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.triggered.len() + b.triggered.len(), 3);
    assert!(a.failed.is_empty() && b.failed.is_empty());

    let mut ids = dispatcher.job_ids();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);
    assert_eq!(dispatcher.requests().len(), 3);
}

#[tokio::test]
async fn test_failed_dispatch_releases_child() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let repo = ctx.jobs();
    let dispatcher = Arc::new(RecordingDispatcher::new());
    dispatcher.reject_payloads_containing(r#""project":"b""#);
    let projects = ProjectFixture::diamond();
    let gh_repo = ProjectFixture::repo();

    let batch = JobMaterializer::new(repo.clone(), MaterializerConfig::default())
        .materialize(
            &ProjectFixture::graph(&projects),
            &ProjectFixture::impacted_all(&projects),
            &ProjectFixture::payloads(&projects),
            "main",
            &gh_repo,
        )
        .await
        .unwrap();
    let (a, b, c) = (batch.jobs["a"][0], batch.jobs["b"][0], batch.jobs["c"][0]);

    let coordinator = CompletionCoordinator::new(repo.clone(), dispatcher.clone());
    let report = coordinator
        .on_job_completed(a, &gh_repo, WORKFLOW)
        .await
        .unwrap();

    assert_eq!(report.triggered, vec![c]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, b);
    assert_eq!(status_of(repo.as_ref(), b).await, JobStatus::Created);
    assert_eq!(status_of(repo.as_ref(), c).await, JobStatus::Triggered);
}
