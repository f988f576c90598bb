mod common;

use chrono::{TimeZone, Utc};
use common::InMemoryRuntime;
use docker_sweep::{
    classify, run, AgeFilter, ApiVersion, ContainerRecord, ContainerState, FatalError, ImageRecord,
    Inventory, Mode, ResourceKind, RunConfig, RunController, RunPhase, Runtime, RuntimeError,
};

fn host() -> InMemoryRuntime {
    let anonymous = "e".repeat(64);
    InMemoryRuntime::new()
        .with_container(
            ContainerRecord::new("web", ContainerState::Running, "sha256:web").mounting(&["uploads"]),
        )
        .with_container(
            ContainerRecord::new("job", ContainerState::Exited, "sha256:job")
                .mounting(&[anonymous.as_str()]),
        )
        .with_image(ImageRecord::new("sha256:web", &["web:3"]))
        .with_image(ImageRecord::new("sha256:job", &["job:1"]).sized(4096))
        .with_image(ImageRecord::new("sha256:loose", &[]).sized(1024))
        .with_volume("uploads")
        .with_volume(&anonymous)
        .with_volume("forgotten")
}

fn config(mode: Mode, dry_run: bool) -> RunConfig {
    RunConfig {
        mode,
        dry_run,
        ..RunConfig::default()
    }
}

#[test]
fn test_conservative_run() {
    let runtime = host();
    let report = run(&runtime, &config(Mode::Conservative, false)).unwrap();

    assert_eq!(report.containers.removed, 1);
    assert_eq!(report.images.removed, 1);
    assert_eq!(report.volumes.candidates, 0);
    // The job image is tagged, so it stays in conservative mode.
    let images: Vec<String> = runtime.list_images().unwrap().into_iter().map(|i| i.id).collect();
    assert_eq!(images, vec!["sha256:web", "sha256:job"]);
    // Without deep clean the container's anonymous volume is left behind.
    assert_eq!(runtime.volume_names().len(), 3);
}

#[test]
fn test_deep_clean_run() {
    let runtime = host();
    let report = run(&runtime, &config(Mode::DeepClean, false)).unwrap();

    assert_eq!(report.containers.removed, 1);
    assert_eq!(report.images.removed, 2);
    assert_eq!(report.volumes.removed, 1);
    assert_eq!(report.reclaimable_bytes, 5120);
    // `uploads` is mounted by a running container; the anonymous volume went with its container.
    assert_eq!(runtime.volume_names(), vec!["uploads".to_string()]);
}

#[test]
fn test_dry_run_matches_live_run_counts() {
    let dry_runtime = host();
    let dry = run(&dry_runtime, &config(Mode::DeepClean, true)).unwrap();
    assert!(dry_runtime.removal_calls().is_empty());

    let live_runtime = host();
    let live = run(&live_runtime, &config(Mode::DeepClean, false)).unwrap();

    for kind in ResourceKind::ALL {
        assert_eq!(dry.counts(kind).candidates, live.counts(kind).candidates);
        assert_eq!(dry.counts(kind).would_remove, live.counts(kind).removed);
    }
    assert_eq!(dry.summary_lines()[0], "containers: 1 would remove");
}

#[test]
fn test_empty_host_reports_zero() {
    let runtime = InMemoryRuntime::new();
    for mode in [Mode::Conservative, Mode::DeepClean] {
        let report = run(&runtime, &config(mode, false)).unwrap();
        assert!(report.is_clean());
        for kind in ResourceKind::ALL {
            assert_eq!(report.counts(kind).processed(), 0);
        }
    }
}

#[test]
fn test_unreachable_runtime_aborts_before_classifying() {
    let runtime = InMemoryRuntime::new()
        .with_container(ContainerRecord::new("c1", ContainerState::Exited, "sha256:x"))
        .unreachable();

    let err = run(&runtime, &config(Mode::DeepClean, false)).unwrap_err();
    assert!(matches!(err, FatalError::Check(RuntimeError::Unreachable(_))));
    assert_eq!(err.phase(), RunPhase::Checking);
    assert!(runtime.removal_calls().is_empty());
}

#[test]
fn test_old_runtime_skips_volume_step() {
    let runtime = host().with_api_version(ApiVersion::new(1, 20));
    let report = run(&runtime, &config(Mode::DeepClean, false)).unwrap();

    assert!(report.volumes_skipped);
    assert_eq!(report.containers.removed, 1);
    assert_eq!(report.images.removed, 2);
    assert_eq!(report.volumes.candidates, 0);
    // No volume operation of any kind, including the container cascade.
    assert_eq!(runtime.volume_names().len(), 3);
    assert!(report.summary_lines()[2].contains("skipped"));
}

#[test]
fn test_busy_and_vanished_resources_do_not_fail_the_run() {
    let runtime = host().with_busy("sha256:loose");
    let report = run(&runtime, &config(Mode::DeepClean, false)).unwrap();

    assert_eq!(report.images.skipped, 1);
    assert_eq!(report.images.removed, 1);
    assert_eq!(report.images.failed, 0);
}

#[test]
fn test_second_run_finds_nothing_new() {
    let runtime = host();
    run(&runtime, &config(Mode::DeepClean, false)).unwrap();

    let report = run(&runtime, &config(Mode::DeepClean, false)).unwrap();
    assert!(report.is_clean());
}

#[test]
fn test_runtime_lost_mid_batch() {
    let runtime = host().disconnect_after(2);
    let err = run(&runtime, &config(Mode::DeepClean, false)).unwrap_err();

    assert_eq!(err.phase(), RunPhase::Executing);
    let report = err.partial_report().unwrap();
    assert_eq!(report.containers.removed, 1);
    assert_eq!(report.images.removed, 1);
    assert_eq!(report.processed(), 2);
    assert_eq!(report.candidates(), 4);
}

#[test]
fn test_age_filter_holds_back_recent_resources() {
    let old = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
    let recent = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let runtime = InMemoryRuntime::new()
        .with_container(ContainerRecord::new("old", ContainerState::Exited, "sha256:a").created(old))
        .with_container(ContainerRecord::new("new", ContainerState::Exited, "sha256:a").created(recent))
        .with_image(ImageRecord::new("sha256:a", &[]).created(old));

    let config = RunConfig {
        age_filter: AgeFilter::before(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
        ..RunConfig::default()
    };
    let report = run(&runtime, &config).unwrap();

    assert_eq!(report.containers.removed, 1);
    assert_eq!(report.images.candidates, 0);
    assert_eq!(report.held_back_by_age, 1);
}

#[test]
fn test_phases_on_success() {
    let runtime = InMemoryRuntime::new();
    let config = RunConfig::default();
    let mut controller = RunController::new(&runtime, &config);
    assert_eq!(controller.phase(), RunPhase::Init);

    let report = controller.run().unwrap();
    assert_eq!(controller.phase(), RunPhase::Done);
    assert!(report.is_clean());
}

#[test]
fn test_unreachable_fails_in_checking() {
    let runtime = InMemoryRuntime::new().unreachable();
    let config = RunConfig::default();
    let mut controller = RunController::new(&runtime, &config);

    let err = controller.run().unwrap_err();
    assert_eq!(err.phase(), RunPhase::Checking);
    assert_eq!(controller.phase(), RunPhase::Failed);
    assert!(err.partial_report().is_none());
}

#[test]
fn test_old_runtime_conservative_is_not_degraded() {
    let runtime = InMemoryRuntime::new()
        .with_api_version(ApiVersion::new(1, 12))
        .with_container(ContainerRecord::new("c1", ContainerState::Dead, "sha256:x"))
        .with_image(ImageRecord::new("sha256:x", &[]));

    let report = run(&runtime, &RunConfig::default()).unwrap();
    assert!(!report.volumes_skipped);
    assert_eq!(report.containers.removed, 1);
    assert_eq!(report.images.removed, 1);
}

#[test]
fn test_strict_volume_support_aborts() {
    let runtime = InMemoryRuntime::new()
        .with_api_version(ApiVersion::new(1, 20))
        .with_container(ContainerRecord::new("c1", ContainerState::Exited, "sha256:x"));
    let config = RunConfig {
        mode: Mode::DeepClean,
        strict_volume_support: true,
        ..RunConfig::default()
    };

    let err = run(&runtime, &config).unwrap_err();
    assert!(matches!(
        err,
        FatalError::Check(RuntimeError::VersionUnsupported { .. })
    ));
    assert!(runtime.removal_calls().is_empty());
}

#[test]
fn test_execution_failure_message_counts_removals() {
    let runtime = InMemoryRuntime::new()
        .with_container(ContainerRecord::new("c1", ContainerState::Exited, "sha256:x"))
        .with_container(ContainerRecord::new("c2", ContainerState::Exited, "sha256:x"))
        .disconnect_after(1);

    let err = run(&runtime, &RunConfig::default()).unwrap_err();
    let report = err.partial_report().unwrap();
    assert_eq!(report.containers.candidates, 2);
    assert_eq!(report.containers.removed, 1);
    assert!(err.to_string().contains("after 1 of 2 removals"));
}

#[test]
fn test_images_referenced_by_containers_are_never_image_candidates() {
    let runtime = host()
        .with_container(ContainerRecord::new("cron", ContainerState::Created, "sha256:loose"));
    let referenced = runtime.images_referenced_by_containers().unwrap();
    assert_eq!(referenced.len(), 3);

    let inventory = Inventory::fetch(&runtime, true).unwrap();
    let plan = classify(&inventory, Mode::DeepClean);
    let removed_containers: Vec<&str> = plan
        .of_kind(ResourceKind::Container)
        .iter()
        .map(|c| c.removal.target())
        .collect();
    for candidate in plan.of_kind(ResourceKind::Image) {
        let id = candidate.removal.target();
        // Only images whose every user is itself being removed may go.
        if referenced.contains(id) {
            assert!(inventory
                .containers
                .iter()
                .filter(|c| c.image_id == id)
                .all(|c| removed_containers.contains(&c.id.as_str())));
        }
    }
    assert_eq!(plan.targets(), vec!["job", "sha256:job", "forgotten"]);
}
