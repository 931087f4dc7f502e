//! Tests for the provisioning state machine.

use super::*;
use crate::test_support::{CreateOutcome, FakeError, FakeInventory};
use rstest::{fixture, rstest};

const FIRST: &str = "ecs.c7.4xlarge";
const SECOND: &str = "ecs.g7.4xlarge";
const THIRD: &str = "ecs.c7.8xlarge";

fn settings() -> EngineSettings {
    EngineSettings {
        call_timeout: Duration::from_millis(200),
        create_timeout: Duration::from_secs(2),
        readiness_timeout: Duration::from_secs(2),
        session_timeout: None,
        backoff: Backoff {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(5),
        },
        quote_concurrency: 4,
    }
}

#[fixture]
fn profile() -> ProvisioningProfile {
    ProvisioningProfile::builder()
        .region("cn-hangzhou")
        .image_pattern("dev-image-*")
        .cpu(16, 32)
        .memory_gib(16.0, 64.0)
        .resource_group_name("dev-resource-group")
        .instance_name("dev-server")
        .snapshot_prefix("dev-data")
        .automation_tag("managed-by=devserver")
        .vpc_cidr("172.16.0.0/12")
        .ingress_ports(vec![22])
        .system_disk_size_gb(20)
        .build()
        .unwrap_or_else(|err| panic!("profile: {err}"))
}

fn market() -> FakeInventory {
    FakeInventory::new()
        .with_image("m-1", "dev-image-2024", 5)
        .with_snapshot("s-1", "dev-data-2024", 5)
        .with_instance_type(FIRST, 16, 32.0)
        .with_instance_type(SECOND, 16, 64.0)
        .with_instance_type(THIRD, 32, 64.0)
        .with_price(FIRST, "cn-hangzhou-b", 0.3)
        .with_price(SECOND, "cn-hangzhou-h", 0.4)
        .with_price(THIRD, "cn-hangzhou-k", 0.5)
}

fn existing(state: InstanceState) -> InstanceStatus {
    InstanceStatus {
        id: String::from("i-existing"),
        name: String::from("dev-server"),
        instance_type: String::from(SECOND),
        zone: String::from("cn-hangzhou-h"),
        state,
        public_ip: None,
    }
}

fn expect_running(outcome: Outcome<FakeError>) -> InstanceDescriptor {
    match outcome {
        Outcome::Running(descriptor) => descriptor,
        other => panic!("expected a running instance, got {other:?}"),
    }
}

fn expect_failed(outcome: Outcome<FakeError>) -> FailureReport<FakeError> {
    match outcome {
        Outcome::Failed(report) => report,
        other => panic!("expected a failure, got {other:?}"),
    }
}

#[test]
fn backoff_doubles_up_to_the_cap() {
    let backoff = Backoff {
        initial: Duration::from_secs(1),
        max: Duration::from_secs(5),
    };
    let mut delay = backoff.initial;
    let mut seen = Vec::new();
    for _ in 0..5 {
        seen.push(delay.as_secs());
        delay = backoff.next_delay(delay);
    }
    assert_eq!(seen, vec![1, 2, 4, 5, 5]);
}

#[test]
fn exit_codes_follow_the_outcome() {
    let exhausted: Outcome<FakeError> = Outcome::Exhausted(ExhaustedReport {
        profile: String::from("dev-server"),
        attempts: Vec::new(),
    });
    assert_eq!(exhausted.exit_code(), 3);
}

#[rstest]
#[tokio::test]
async fn first_candidate_success_walks_every_state(profile: ProvisioningProfile) {
    let provisioner = Provisioner::new(market(), settings());
    let mut session = ProvisioningSession::new(profile);

    let descriptor = expect_running(provisioner.run(&mut session).await);

    assert_eq!(descriptor.instance_type, FIRST);
    assert_eq!(descriptor.zone, "cn-hangzhou-b");
    assert_eq!(descriptor.price, Some(0.3));
    assert_eq!(descriptor.public_ip.as_deref(), Some("203.0.113.10"));
    assert!(!descriptor.relaunched);
    assert_eq!(
        session.history(),
        &[
            SessionState::Idle,
            SessionState::Reconciling,
            SessionState::SelectingCandidate,
            SessionState::CreatingInstance,
            SessionState::AttachingStorage,
            SessionState::Running,
        ]
    );
    assert!(session.attempts().is_empty());

    let gateway = provisioner.gateway();
    let disks = gateway.resources(ResourceKind::DataDisk);
    assert_eq!(disks.len(), 1);
    let Some(disk) = disks.first() else {
        panic!("disk should exist");
    };
    assert_eq!(Some(disk.id.clone()), descriptor.disk_id);
    assert_eq!(disk.attached_to.as_deref(), Some(descriptor.instance_id.as_str()));
}

#[rstest]
#[tokio::test]
async fn transient_rejections_fall_back_in_rank_order(profile: ProvisioningProfile) {
    let gateway = market()
        .script_create(FIRST, CreateOutcome::Reject(FakeError::transient("OperationDenied.NoStock")))
        .script_create(SECOND, CreateOutcome::Reject(FakeError::transient("Zone.NotOnSale")));
    let provisioner = Provisioner::new(gateway, settings());
    let mut session = ProvisioningSession::new(profile);

    let descriptor = expect_running(provisioner.run(&mut session).await);

    assert_eq!(descriptor.instance_type, THIRD);
    assert_eq!(descriptor.zone, "cn-hangzhou-k");
    assert_eq!(descriptor.price, Some(0.5));
    let tried: Vec<&str> = session
        .attempts()
        .iter()
        .map(|attempt| attempt.instance_type.as_str())
        .collect();
    assert_eq!(tried, vec![FIRST, SECOND]);
    let creates: Vec<String> = provisioner
        .gateway()
        .calls()
        .into_iter()
        .filter(|call| call.starts_with("create_instance"))
        .collect();
    assert_eq!(
        creates,
        vec![
            format!("create_instance:{FIRST}:cn-hangzhou-b"),
            format!("create_instance:{SECOND}:cn-hangzhou-h"),
            format!("create_instance:{THIRD}:cn-hangzhou-k"),
        ]
    );
    assert_eq!(provisioner.gateway().instances().len(), 1);
}

#[rstest]
#[tokio::test]
async fn fatal_rejection_stops_the_session(profile: ProvisioningProfile) {
    let gateway = market().script_create(
        FIRST,
        CreateOutcome::Reject(FakeError::fatal("QuotaExceed.ElasticQuota")),
    );
    let provisioner = Provisioner::new(gateway, settings());
    let mut session = ProvisioningSession::new(profile);

    let outcome = provisioner.run(&mut session).await;
    assert_eq!(outcome.exit_code(), 1);
    let report = expect_failed(outcome);

    assert!(matches!(report.error, ProvisionError::CreateRejected { .. }));
    assert_eq!(
        report.last_candidate.as_deref(),
        Some("ecs.c7.4xlarge@cn-hangzhou-b")
    );
    assert_eq!(provisioner.gateway().count("create_instance"), 1);
    assert_eq!(session.state(), SessionState::Failed);
}

#[rstest]
#[tokio::test]
async fn exhaustion_creates_nothing(profile: ProvisioningProfile) {
    let no_stock = || CreateOutcome::Reject(FakeError::transient("OperationDenied.NoStock"));
    let gateway = market()
        .script_create(FIRST, no_stock())
        .script_create(SECOND, no_stock())
        .script_create(THIRD, no_stock());
    let provisioner = Provisioner::new(gateway, settings());

    let outcome = provisioner.provision(&profile).await;
    assert_eq!(outcome.exit_code(), 3);
    let Outcome::Exhausted(report) = outcome else {
        panic!("every candidate was out of stock");
    };

    assert_eq!(report.attempts.len(), 3);
    assert!(
        report
            .attempts
            .iter()
            .all(|attempt| matches!(attempt.result, AttemptResult::Failed(_)))
    );
    assert!(provisioner.gateway().instances().is_empty());
    assert_eq!(provisioner.gateway().resources(ResourceKind::Vpc).len(), 1);
}

#[rstest]
#[tokio::test]
async fn instance_that_never_runs_is_released(profile: ProvisioningProfile) {
    let gateway = market().script_create(FIRST, CreateOutcome::StopBeforeRunning);
    let provisioner = Provisioner::new(gateway, settings());
    let mut session = ProvisioningSession::new(profile);

    let descriptor = expect_running(provisioner.run(&mut session).await);

    assert_eq!(descriptor.instance_type, SECOND);
    assert_eq!(provisioner.gateway().count("delete_instance"), 1);
    let instances = provisioner.gateway().instances();
    assert_eq!(instances.len(), 1);
    assert!(instances.iter().all(|instance| instance.instance_type == SECOND));
}

#[rstest]
#[tokio::test]
async fn create_timeout_releases_the_late_instance(profile: ProvisioningProfile) {
    let gateway = market().script_create(FIRST, CreateOutcome::Stall(Duration::from_secs(5)));
    let provisioner = Provisioner::new(gateway, settings());
    let mut session = ProvisioningSession::new(profile);

    let descriptor = expect_running(provisioner.run(&mut session).await);

    assert_eq!(descriptor.instance_type, SECOND);
    let Some(first) = session.attempts().first() else {
        panic!("timed out attempt should be recorded");
    };
    let AttemptResult::Failed(reason) = &first.result else {
        panic!("timeout is a failure");
    };
    assert!(reason.contains("did not complete"), "reason: {reason}");
    assert_eq!(provisioner.gateway().instances().len(), 1);
}

#[rstest]
#[tokio::test]
async fn price_ceiling_skips_expensive_candidates(profile: ProvisioningProfile) {
    let mut capped = profile;
    capped.max_spot_price = Some(0.35);
    let gateway = market().script_create(
        FIRST,
        CreateOutcome::Reject(FakeError::transient("OperationDenied.NoStock")),
    );
    let provisioner = Provisioner::new(gateway, settings());
    let mut session = ProvisioningSession::new(capped);

    let outcome = provisioner.run(&mut session).await;

    assert!(matches!(outcome, Outcome::Exhausted(_)));
    let results: Vec<&AttemptResult> = session
        .attempts()
        .iter()
        .map(|attempt| &attempt.result)
        .collect();
    assert!(matches!(results.as_slice(), [AttemptResult::Failed(_), AttemptResult::Skipped(_), AttemptResult::Skipped(_)]));
    assert_eq!(provisioner.gateway().count("create_instance"), 1);
}

#[rstest]
#[tokio::test]
async fn stopped_instance_is_restarted_without_discovery(profile: ProvisioningProfile) {
    let disk = Resource {
        id: String::from("d-existing"),
        name: String::from("dev-server-data"),
        status: String::from("In_use"),
        zone: Some(String::from("cn-hangzhou-h")),
        attached_to: Some(String::from("i-existing")),
        ..Resource::default()
    };
    let gateway = market()
        .with_instance(existing(InstanceState::Stopped))
        .with_resource(ResourceKind::DataDisk, disk);
    let provisioner = Provisioner::new(gateway, settings());
    let mut session = ProvisioningSession::new(profile);

    let descriptor = expect_running(provisioner.run(&mut session).await);

    assert!(descriptor.relaunched);
    assert_eq!(descriptor.instance_id, "i-existing");
    assert_eq!(descriptor.disk_id.as_deref(), Some("d-existing"));
    assert_eq!(descriptor.price, None);
    assert_eq!(provisioner.gateway().count("start_instance:i-existing"), 1);
    assert_eq!(provisioner.gateway().count("list_instance_types"), 0);
    assert_eq!(provisioner.gateway().count("spot_price"), 0);
    assert_eq!(provisioner.gateway().count("create_instance"), 0);
    assert!(session.history().contains(&SessionState::RelaunchDetected));
}

#[rstest]
#[tokio::test]
async fn running_instance_is_returned_without_discovery(profile: ProvisioningProfile) {
    let gateway = market().with_instance(existing(InstanceState::Running));
    let provisioner = Provisioner::new(gateway, settings());
    let mut session = ProvisioningSession::new(profile);

    let descriptor = expect_running(provisioner.run(&mut session).await);

    assert!(descriptor.relaunched);
    assert_eq!(descriptor.instance_id, "i-existing");
    let inventory = provisioner.gateway();
    assert_eq!(inventory.count("list_instance_types"), 0);
    assert_eq!(inventory.count("spot_zones"), 0);
    assert_eq!(inventory.count("spot_price"), 0);
    assert_eq!(inventory.count("create_instance"), 0);
    assert_eq!(inventory.count("start_instance"), 0);
    assert_eq!(descriptor.disk_id, None);
    assert!(session.history().contains(&SessionState::RelaunchDetected));
    assert!(!session.history().contains(&SessionState::SelectingCandidate));
}

#[rstest]
#[tokio::test]
async fn unknown_existing_state_is_not_startable(profile: ProvisioningProfile) {
    let gateway = market().with_instance(existing(InstanceState::Other(String::from("Expired"))));
    let provisioner = Provisioner::new(gateway, settings());

    let report = expect_failed(provisioner.provision(&profile).await);

    assert!(matches!(
        report.error,
        ProvisionError::InstanceNotStartable { ref state, .. } if state == "Expired"
    ));
    assert_eq!(provisioner.gateway().count("start_instance"), 0);
}

#[rstest]
#[tokio::test]
async fn second_run_reuses_everything(profile: ProvisioningProfile) {
    let provisioner = Provisioner::new(market(), settings());

    let first = expect_running(provisioner.provision(&profile).await);
    let created = provisioner.gateway().count("create_resource");
    let second = expect_running(provisioner.provision(&profile).await);

    assert!(second.relaunched);
    assert_eq!(second.instance_id, first.instance_id);
    assert_eq!(second.disk_id, first.disk_id);
    assert_eq!(provisioner.gateway().count("create_resource"), created);
    assert_eq!(provisioner.gateway().count("create_instance"), 1);
}

#[rstest]
#[tokio::test]
async fn replace_releases_the_existing_instance_first(profile: ProvisioningProfile) {
    let gateway = market().with_instance(existing(InstanceState::Running));
    let provisioner = Provisioner::new(gateway, settings()).with_replace(true);

    let descriptor = expect_running(provisioner.provision(&profile).await);

    assert!(!descriptor.relaunched);
    assert_ne!(descriptor.instance_id, "i-existing");
    assert_eq!(provisioner.gateway().count("delete_instance:i-existing"), 1);
    let instances = provisioner.gateway().instances();
    assert_eq!(instances.len(), 1);
}

#[rstest]
#[tokio::test]
async fn attach_failure_releases_instance_and_new_disk(profile: ProvisioningProfile) {
    let gateway = market().fail_operation(
        "attach_disk",
        FakeError::fatal("InvalidDiskCategory.NotSupported"),
    );
    let provisioner = Provisioner::new(gateway, settings());

    let report = expect_failed(provisioner.provision(&profile).await);

    assert!(matches!(report.error, ProvisionError::StorageAttachFailed { .. }));
    let inventory = provisioner.gateway();
    assert!(inventory.instances().is_empty());
    assert!(inventory.resources(ResourceKind::DataDisk).is_empty());
    assert_eq!(inventory.resources(ResourceKind::Vpc).len(), 1);
    assert_eq!(inventory.resources(ResourceKind::SecurityGroup).len(), 1);
}

#[rstest]
#[tokio::test]
async fn disk_owned_by_another_instance_is_not_taken(profile: ProvisioningProfile) {
    let foreign_disk = Resource {
        id: String::from("d-foreign"),
        name: String::from("dev-server-data"),
        status: String::from("In_use"),
        zone: Some(String::from("cn-hangzhou-b")),
        attached_to: Some(String::from("i-other")),
        ..Resource::default()
    };
    let gateway = market().with_resource(ResourceKind::DataDisk, foreign_disk.clone());
    let provisioner = Provisioner::new(gateway, settings());

    let report = expect_failed(provisioner.provision(&profile).await);

    let ProvisionError::StorageAttachFailed { message, .. } = &report.error else {
        panic!("expected StorageAttachFailed");
    };
    assert!(message.contains("i-other"), "message: {message}");
    assert_eq!(provisioner.gateway().count("attach_disk"), 0);
    assert!(provisioner.gateway().instances().is_empty());
    assert_eq!(
        provisioner.gateway().resources(ResourceKind::DataDisk),
        vec![foreign_disk]
    );
}

#[rstest]
#[tokio::test]
async fn cancellation_stops_before_any_mutation(profile: ProvisioningProfile) {
    let (handle, signal) = cancellation();
    handle.cancel();
    let provisioner = Provisioner::new(market(), settings()).with_cancel(signal);
    let mut session = ProvisioningSession::new(profile);

    let report = expect_failed(provisioner.run(&mut session).await);

    assert!(matches!(report.error, ProvisionError::Cancelled { .. }));
    assert_eq!(provisioner.gateway().count("create_resource"), 0);
    assert_eq!(
        session.history(),
        &[SessionState::Idle, SessionState::Reconciling, SessionState::Failed]
    );
}

#[rstest]
#[tokio::test]
async fn elapsed_session_timeout_cancels(profile: ProvisioningProfile) {
    let provisioner = Provisioner::new(
        market(),
        EngineSettings {
            session_timeout: Some(Duration::ZERO),
            ..settings()
        },
    );

    let report = expect_failed(provisioner.provision(&profile).await);

    assert!(matches!(report.error, ProvisionError::Cancelled { .. }));
    assert_eq!(provisioner.gateway().count("create_instance"), 0);
}

#[rstest]
#[tokio::test]
async fn missing_snapshot_fails_before_any_instance(profile: ProvisioningProfile) {
    let gateway = FakeInventory::new()
        .with_image("m-1", "dev-image-2024", 5)
        .with_instance_type(FIRST, 16, 32.0)
        .with_price(FIRST, "cn-hangzhou-b", 0.3);
    let provisioner = Provisioner::new(gateway, settings());

    let report = expect_failed(provisioner.provision(&profile).await);

    assert!(matches!(report.error, ProvisionError::SnapshotNotFound { .. }));
    assert_eq!(provisioner.gateway().count("create_instance"), 0);
}

#[rstest]
#[tokio::test]
async fn attachment_that_never_completes_discards_new_disk(profile: ProvisioningProfile) {
    let provisioner = Provisioner::new(
        market().ignore_attachments(),
        EngineSettings {
            readiness_timeout: Duration::from_millis(50),
            ..settings()
        },
    );

    let report = expect_failed(provisioner.provision(&profile).await);

    let ProvisionError::StorageAttachFailed { message, .. } = &report.error else {
        panic!("expected StorageAttachFailed");
    };
    assert!(message.contains("within 50ms"), "message: {message}");
    assert!(!message.contains("teardown"), "message: {message}");
    let inventory = provisioner.gateway();
    assert_eq!(inventory.count("attach_disk"), 1);
    assert!(inventory.instances().is_empty());
    assert!(inventory.resources(ResourceKind::DataDisk).is_empty());
}

#[rstest]
#[tokio::test]
async fn fatal_status_error_releases_the_new_instance(profile: ProvisioningProfile) {
    let gateway = market().fail_operation(
        "instance_status",
        FakeError::fatal("InvalidInstanceId.NotFound"),
    );
    let provisioner = Provisioner::new(gateway, settings());

    let report = expect_failed(provisioner.provision(&profile).await);

    assert!(matches!(
        report.error,
        ProvisionError::InventoryUnavailable {
            operation: "instance_status",
            teardown: None,
            ..
        }
    ));
    assert_eq!(provisioner.gateway().count("delete_instance"), 1);
    assert!(provisioner.gateway().instances().is_empty());
}

#[rstest]
#[tokio::test]
async fn failed_release_after_status_error_is_reported(profile: ProvisioningProfile) {
    let gateway = market()
        .fail_operation("instance_status", FakeError::fatal("Forbidden.RAM"))
        .fail_operation("delete_instance", FakeError::fatal("OperationDenied"));
    let provisioner = Provisioner::new(gateway, settings());

    let report = expect_failed(provisioner.provision(&profile).await);

    let ProvisionError::InventoryUnavailable {
        operation,
        teardown,
        ..
    } = &report.error
    else {
        panic!("expected InventoryUnavailable");
    };
    assert_eq!(*operation, "instance_status");
    assert_eq!(teardown.as_deref(), Some("OperationDenied"));
    let rendered = report.error.to_string();
    assert!(
        rendered.contains("teardown also failed: OperationDenied"),
        "rendered: {rendered}"
    );
    assert_eq!(provisioner.gateway().count("delete_instance"), 1);
    assert_eq!(provisioner.gateway().instances().len(), 1);
}

#[rstest]
#[tokio::test]
async fn disk_in_another_zone_is_a_typed_conflict(profile: ProvisioningProfile) {
    let stray_disk = Resource {
        id: String::from("d-stray"),
        name: String::from("dev-server-data"),
        status: String::from("Available"),
        zone: Some(String::from("cn-hangzhou-h")),
        ..Resource::default()
    };
    let gateway = market().with_resource(ResourceKind::DataDisk, stray_disk.clone());
    let provisioner = Provisioner::new(gateway, settings());

    let report = expect_failed(provisioner.provision(&profile).await);

    let ProvisionError::ResourceConflict { kind, name, reason } = &report.error else {
        panic!("expected ResourceConflict");
    };
    assert_eq!(*kind, ResourceKind::DataDisk);
    assert_eq!(name, "dev-server-data");
    assert!(reason.contains("cn-hangzhou-h"), "reason: {reason}");
    assert!(provisioner.gateway().instances().is_empty());
    assert_eq!(provisioner.gateway().count("attach_disk"), 0);
    assert_eq!(
        provisioner.gateway().resources(ResourceKind::DataDisk),
        vec![stray_disk]
    );
}
