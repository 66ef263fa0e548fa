mod common;

use chrono::{Duration, Utc};
use common::{local_ctx, memory_backend, props_publishing, write_site};
use site_stack::{
    errors::{Operation, StackError},
    models::{
        bucket::{BucketProps, RemovalPolicy},
        context::StackContext,
        distribution::DistributionConfig,
        outputs::OutputKey,
        resource::{ResourceKind, ResourceSpec},
    },
    services::{
        backend::ProvisioningBackend,
        edge::{EdgeRequest, EdgeService},
        provisioner::{ApplyAction, Provisioner},
        retry::RetryPolicy,
        stack::{FrontendProps, StackApp},
    },
};

#[tokio::test]
async fn local_stage_provisions_the_expected_stack() {
    let (backend, _dir) = memory_backend().await;
    let site = write_site(&[("index.html", "<h1>home</h1>"), ("error.html", "oops")]);
    let ctx = local_ctx();

    let mut app = StackApp::new(&ctx);
    app.add_frontend("Frontend", props_publishing(site.path()));
    let reports = app.deploy(&backend, RetryPolicy::none()).await.unwrap();

    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.stack, "local-my-app-Frontend");
    assert!(report.outputs.is_complete());
    assert_eq!(
        report.outputs.get(OutputKey::BucketName),
        Some("local-my-app-frontend-bucket")
    );

    let kinds: Vec<_> = report.resources.iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ResourceKind::Identity,
            ResourceKind::Bucket,
            ResourceKind::PolicyStatement,
            ResourceKind::Distribution,
        ]
    );
    assert!(report.resources.iter().all(|r| r.action == ApplyAction::Created));

    let publish = report.publish.as_ref().unwrap();
    assert_eq!(publish.report.uploaded, vec!["error.html", "index.html"]);
    assert!(publish.invalidation_id.is_some());

    let domain = report.outputs.get(OutputKey::DistributionDomainName).unwrap();
    let id = report.outputs.get(OutputKey::DistributionId).unwrap();
    assert_eq!(domain, format!("{}.edge.localhost", id.to_lowercase()));

    let exported = app.outputs(&backend, RetryPolicy::none()).await.unwrap();
    assert_eq!(exported, vec![(report.stack.clone(), report.outputs.clone())]);
}

#[tokio::test]
async fn redeploying_converges_without_changes() {
    let (backend, _dir) = memory_backend().await;
    let site = write_site(&[("index.html", "<h1>home</h1>")]);
    let ctx = local_ctx();
    let mut app = StackApp::new(&ctx);
    app.add_frontend("Frontend", props_publishing(site.path()));

    let first = app.deploy(&backend, RetryPolicy::none()).await.unwrap();
    let second = app.deploy(&backend, RetryPolicy::none()).await.unwrap();

    assert!(
        second[0]
            .resources
            .iter()
            .all(|r| r.action == ApplyAction::Unchanged)
    );
    assert_eq!(first[0].outputs, second[0].outputs);

    let publish = second[0].publish.as_ref().unwrap();
    assert!(publish.report.is_noop());
    assert!(publish.invalidation_id.is_some());
}

#[tokio::test]
async fn colliding_bucket_names_abort_before_any_resource_exists() {
    let (backend, _dir) = memory_backend().await;
    let ctx = local_ctx();
    let mut app = StackApp::new(&ctx);
    app.add_frontend("Frontend", FrontendProps::default())
        .add_frontend("frontend", FrontendProps::default());

    let err = app.deploy(&backend, RetryPolicy::none()).await.unwrap_err();

    assert_eq!(err.operation, Operation::Plan);
    assert!(err.applied.is_empty());
    assert!(matches!(
        err.source,
        StackError::NameCollision(ref name) if name == "local-my-app-frontend-bucket"
    ));
    for owner in ["local-my-app-Frontend", "local-my-app-frontend"] {
        assert!(backend.list_resources(owner).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn bucket_owned_by_another_stack_aborts_before_the_identity_exists() {
    let (backend, _dir) = memory_backend().await;
    let ctx = local_ctx();
    backend
        .create_resource(
            &ctx.bucket_name("Frontend"),
            "local-other-Frontend",
            &ResourceSpec::Bucket(BucketProps::default()),
        )
        .await
        .unwrap();

    let mut app = StackApp::new(&ctx);
    app.add_frontend("Frontend", FrontendProps::default());
    let err = app.deploy(&backend, RetryPolicy::none()).await.unwrap_err();

    assert_eq!(err.operation, Operation::Plan);
    assert_eq!(err.resource, "local-my-app-frontend-bucket");
    assert!(err.applied.is_empty());
    assert!(matches!(
        err.source,
        StackError::NameConflict { ref owner, .. } if owner == "local-other-Frontend"
    ));
    assert!(
        backend
            .list_resources("local-my-app-Frontend")
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn pruning_removes_objects_added_out_of_band() {
    let (backend, _dir) = memory_backend().await;
    let site = write_site(&[("index.html", "<h1>home</h1>")]);
    let ctx = local_ctx();
    let bucket = ctx.bucket_name("Frontend");

    let mut keep = props_publishing(site.path());
    if let Some(content) = keep.content.as_mut() {
        content.prune = false;
    }
    let mut app = StackApp::new(&ctx);
    app.add_frontend("Frontend", keep);
    app.deploy(&backend, RetryPolicy::none()).await.unwrap();

    backend
        .put_object(&bucket, "stray.txt", None, b"left behind")
        .await
        .unwrap();
    let report = app.deploy(&backend, RetryPolicy::none()).await.unwrap();
    assert!(report[0].publish.as_ref().unwrap().report.deleted.is_empty());
    assert!(backend.read_object(&bucket, "stray.txt").await.unwrap().is_some());

    let mut mirror = StackApp::new(&ctx);
    mirror.add_frontend("Frontend", props_publishing(site.path()));
    let report = mirror.deploy(&backend, RetryPolicy::none()).await.unwrap();
    assert_eq!(
        report[0].publish.as_ref().unwrap().report.deleted,
        vec!["stray.txt"]
    );
    assert!(backend.read_object(&bucket, "stray.txt").await.unwrap().is_none());
}

#[tokio::test]
async fn failed_step_reports_chain_and_keeps_applied_resources() {
    let (backend, _dir) = memory_backend().await;
    let ctx = local_ctx();

    let mut broken = FrontendProps::default();
    broken.distribution.default_root_object = Some("/index.html".into());
    let mut app = StackApp::new(&ctx);
    app.add_frontend("Frontend", broken);

    let err = app.deploy(&backend, RetryPolicy::none()).await.unwrap_err();
    assert_eq!(err.operation, Operation::Apply);
    assert_eq!(err.resource, "local-my-app-Frontend-Distribution");
    assert!(matches!(err.source, StackError::InvalidDistributionConfig(_)));
    assert_eq!(
        err.applied,
        vec![
            "local-my-app-Frontend-OAI",
            "local-my-app-frontend-bucket",
            "local-my-app-Frontend-BucketPolicy",
        ]
    );
    assert_eq!(err.chain, err.applied);
    assert_eq!(
        backend.list_resources("local-my-app-Frontend").await.unwrap().len(),
        3
    );

    let mut fixed = StackApp::new(&ctx);
    fixed.add_frontend("Frontend", FrontendProps::default());
    let report = fixed.deploy(&backend, RetryPolicy::none()).await.unwrap();
    let actions: Vec<_> = report[0].resources.iter().map(|r| r.action).collect();
    assert_eq!(
        actions,
        vec![
            ApplyAction::Unchanged,
            ApplyAction::Unchanged,
            ApplyAction::Unchanged,
            ApplyAction::Created,
        ]
    );
}

#[tokio::test]
async fn destroy_purges_or_retains_per_removal_policy() {
    let (backend, _dir) = memory_backend().await;
    let site = write_site(&[("index.html", "<h1>home</h1>")]);
    let ctx = local_ctx();
    let bucket = ctx.bucket_name("Frontend");

    let mut app = StackApp::new(&ctx);
    app.add_frontend("Frontend", props_publishing(site.path()));
    app.deploy(&backend, RetryPolicy::none()).await.unwrap();

    let reports = app.destroy(&backend, RetryPolicy::none()).await.unwrap();
    assert_eq!(reports[0].deleted.len(), 4);
    assert_eq!(reports[0].deleted[0], "local-my-app-Frontend-Distribution");
    assert!(reports[0].retained.is_empty());
    assert!(
        backend
            .describe_resource(ResourceKind::Bucket, &bucket)
            .await
            .unwrap()
            .is_none()
    );
    assert!(backend.list_objects(&bucket).await.unwrap().is_empty());

    let mut retained = props_publishing(site.path());
    retained.bucket.removal = RemovalPolicy::Retain;
    let mut app = StackApp::new(&ctx);
    app.add_frontend("Frontend", retained);
    app.deploy(&backend, RetryPolicy::none()).await.unwrap();

    let reports = app.destroy(&backend, RetryPolicy::none()).await.unwrap();
    assert_eq!(reports[0].retained, vec![bucket.clone()]);
    assert_eq!(reports[0].deleted.len(), 3);
    assert!(backend.read_object(&bucket, "index.html").await.unwrap().is_some());
}

#[tokio::test]
async fn distribution_without_read_grant_is_denied_at_the_edge() {
    let (backend, _dir) = memory_backend().await;
    let ctx = StackContext::new("my-app", "local", "eu-west-1").unwrap();

    let mut p = Provisioner::new(&backend, &ctx, "Frontend", RetryPolicy::none());
    let identity = p.create_identity("oai", "OAI for Frontend").await.unwrap();
    let bucket = p
        .create_bucket(&ctx.bucket_name("Frontend"), BucketProps::default())
        .await
        .unwrap();
    let distribution = p
        .create_distribution("dist", &bucket, &identity, DistributionConfig::default())
        .await
        .unwrap();

    backend
        .put_object(bucket.name(), "index.html", Some("text/html".into()), b"<h1>home</h1>")
        .await
        .unwrap();

    let edge = EdgeService::new(backend);
    let request = EdgeRequest::get(distribution.domain_name(), "/index.html");
    let now = Utc::now();
    let resp = edge.handle(&request, now).await.unwrap();
    assert_eq!(resp.status, 403);

    let mut p = Provisioner::new(&edge.backend, &ctx, "Frontend", RetryPolicy::none());
    p.grant_read("policy", &identity, &bucket).await.unwrap();
    // The denial is cached under the error-response ttl.
    let resp = edge.handle(&request, now + Duration::minutes(1)).await.unwrap();
    assert_eq!(resp.status, 403);
    let resp = edge.handle(&request, now + Duration::minutes(31)).await.unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body_text(), "<h1>home</h1>");
}
