use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rjunos::config::{ClearFailurePolicy, ProviderConfig};
use rjunos::diagnostics::Diagnostics;
use rjunos::error::{ErrorKind, JunosError};
use rjunos::lifecycle::{LifecycleDriver, ResourceOperations};
use rjunos::lock::LockManager;
use rjunos::resources::{KeyChain, KeyChainKey, Vlan, VlanVxlan};
use rjunos::session::{Session, SessionManager};
use rjunos::sim::{SimDevice, SimEvent};
use tokio_util::sync::CancellationToken;

fn driver_with(device: &SimDevice, config: ProviderConfig) -> LifecycleDriver {
    let manager = SessionManager::with_connector(config, Arc::new(device.clone()))
        .expect("manager")
        .with_lock_manager(Arc::new(LockManager::new()));
    LifecycleDriver::new(manager)
}

fn driver(device: &SimDevice) -> LifecycleDriver {
    driver_with(device, SimDevice::provider_config())
}

fn error_kinds(diags: &Diagnostics) -> Vec<ErrorKind> {
    diags.errors().map(|d| d.kind).collect()
}

fn warning_kinds(diags: &Diagnostics) -> Vec<ErrorKind> {
    diags.warnings().map(|d| d.kind).collect()
}

fn vlan(name: &str, id: u32) -> Vlan {
    Vlan {
        vlan_id: Some(id.to_string()),
        ..Vlan::new(name)
    }
}

/// Vlan with overridable check and read behaviour.
struct TunedVlan {
    vlan: Vlan,
    consistent_read: bool,
    post_check_passes: bool,
}

impl TunedVlan {
    fn new(vlan: Vlan) -> Self {
        Self {
            vlan,
            consistent_read: false,
            post_check_passes: true,
        }
    }
}

#[async_trait]
impl ResourceOperations for TunedVlan {
    fn type_name(&self) -> &'static str {
        self.vlan.type_name()
    }

    fn id(&self) -> Option<&str> {
        self.vlan.id()
    }

    fn fill_id(&mut self) {
        self.vlan.fill_id();
    }

    fn clear_id(&mut self) {
        self.vlan.clear_id();
    }

    fn identity_fields(&self) -> Vec<String> {
        self.vlan.identity_fields()
    }

    fn consistent_read(&self) -> bool {
        self.consistent_read
    }

    async fn set(&self, session: &mut Session) -> Result<(), JunosError> {
        self.vlan.set(session).await
    }

    async fn del(&self, session: &mut Session) -> Result<(), JunosError> {
        self.vlan.del(session).await
    }

    async fn read(&mut self, fields: &[String], session: &mut Session) -> Result<bool, JunosError> {
        self.vlan.read(fields, session).await
    }

    async fn pre_check_create(&self, session: &mut Session, diags: &mut Diagnostics) -> bool {
        self.vlan.pre_check_create(session, diags).await
    }

    async fn post_check_create(&self, _session: &mut Session, _diags: &mut Diagnostics) -> bool {
        self.post_check_passes
    }
}

#[tokio::test]
async fn create_vlan_commits_with_operation_comment() {
    let device = SimDevice::new();
    let driver = driver(&device);
    let mut data = vlan("v100", 100);

    let diags = driver.create(&mut data, &CancellationToken::new()).await;

    assert!(diags.is_empty(), "{diags:?}");
    assert_eq!(data.id.as_deref(), Some("v100_-_default"));
    assert_eq!(device.committed_lines(), vec!["set vlans v100 vlan-id 100"]);
    let commits = device.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].comment, "create resource junos_vlan");
    assert_eq!(
        device.events(),
        vec![
            SimEvent::Locked(1),
            SimEvent::Committed(1),
            SimEvent::Unlocked(1),
        ]
    );
    assert_eq!(device.lock_holder(), None);
}

#[tokio::test]
async fn concurrent_writers_never_overlap_on_the_device() {
    let device = SimDevice::new().with_latency(Duration::from_millis(2));
    let driver = driver(&device);
    let cancel = CancellationToken::new();

    let mut a = vlan("v1", 1);
    let mut b = vlan("v2", 2);
    let mut c = vlan("v3", 3);
    let (da, db, dc) = tokio::join!(
        driver.create(&mut a, &cancel),
        driver.create(&mut b, &cancel),
        driver.create(&mut c, &cancel),
    );
    for diags in [&da, &db, &dc] {
        assert!(!diags.has_error(), "{diags:?}");
    }

    let mut holder = None;
    for event in device.events() {
        match event {
            SimEvent::Locked(session) => {
                assert_eq!(holder, None, "lock taken while held");
                holder = Some(session);
            }
            SimEvent::Unlocked(session) => {
                assert_eq!(holder, Some(session));
                holder = None;
            }
            SimEvent::Committed(session) | SimEvent::Discarded(session) => {
                assert_eq!(holder, Some(session));
            }
        }
    }
    assert_eq!(device.commits().len(), 3);
    assert_eq!(device.committed_lines().len(), 3);
}

#[tokio::test]
async fn rejected_set_is_discarded_exactly_once() {
    let device = SimDevice::new();
    device.seed(["set vlans v1 vlan-id 1"]);
    device.reject_set_containing("vlan-id 100");
    let before = device.committed_digest();
    let driver = driver(&device);

    let mut data = vlan("v100", 100);
    let diags = driver.create(&mut data, &CancellationToken::new()).await;

    assert_eq!(error_kinds(&diags), vec![ErrorKind::ConfigApply]);
    assert!(data.id.is_none());
    assert_eq!(device.discard_count(), 1);
    assert!(!device.candidate_dirty());
    assert_eq!(device.committed_digest(), before);
    assert_eq!(device.lock_holder(), None);
}

#[tokio::test]
async fn failed_pre_check_leaves_device_untouched() {
    let device = SimDevice::new();
    device.seed(["set vlans v100 vlan-id 100"]);
    let before = device.committed_digest();
    let driver = driver(&device);

    let mut data = vlan("v100", 200);
    let diags = driver.create(&mut data, &CancellationToken::new()).await;

    assert_eq!(error_kinds(&diags), vec![ErrorKind::PreCheck]);
    let error = diags.errors().next().expect("error");
    assert_eq!(error.summary, "Duplicate Configuration Error");
    assert!(data.id.is_none());
    assert_eq!(device.committed_digest(), before);
    assert!(device.commits().is_empty());
    assert_eq!(device.discard_count(), 1);
    assert_eq!(device.lock_holder(), None);
}

#[tokio::test]
async fn missing_routing_instance_fails_pre_check() {
    let device = SimDevice::new();
    let driver = driver(&device);

    let mut data = vlan("v100", 100).in_instance("vs1");
    let diags = driver.create(&mut data, &CancellationToken::new()).await;
    let error = diags.errors().next().expect("error");
    assert_eq!(error.attribute.as_deref(), Some("routing_instance"));
    assert!(device.commits().is_empty());

    device.seed(["set routing-instances vs1 instance-type virtual-switch"]);
    let diags = driver.create(&mut data, &CancellationToken::new()).await;
    assert!(!diags.has_error(), "{diags:?}");
    assert_eq!(data.id.as_deref(), Some("v100_-_vs1"));
}

#[tokio::test]
async fn vlan_round_trips_through_the_device() {
    let device = SimDevice::new();
    let driver = driver(&device);
    let cancel = CancellationToken::new();

    let mut created = Vlan {
        description: Some("lab vlan".to_string()),
        vlan_id: Some("100".to_string()),
        l3_interface: Some("irb.100".to_string()),
        service_id: Some(7),
        forward_filter_input: Some("f-in".to_string()),
        vxlan: Some(VlanVxlan {
            vni: 10100,
            ingress_node_replication: true,
            unreachable_vtep_aging_timer: Some(600),
            ..Default::default()
        }),
        ..Vlan::new("v100")
    };
    let diags = driver.create(&mut created, &cancel).await;
    assert!(!diags.has_error(), "{diags:?}");

    let mut read = Vlan::new("v100");
    let diags = driver.read(&mut read, &cancel).await;
    assert!(diags.is_empty(), "{diags:?}");
    assert_eq!(read, created);
}

#[tokio::test]
async fn key_chain_round_trips_with_decoded_secret() {
    let device = SimDevice::new();
    let driver = driver(&device);
    let cancel = CancellationToken::new();

    let mut created = KeyChain {
        description: Some("bgp peers".to_string()),
        tolerance: Some(3600),
        keys: vec![
            KeyChainKey {
                id: 1,
                secret: "first secret".to_string(),
                start_time: "2024-1-1.00:00:00 +0000".to_string(),
                algorithm: Some("hmac-sha-1".to_string()),
                ..Default::default()
            },
            KeyChainKey {
                id: 2,
                secret: "second".to_string(),
                start_time: "2025-1-1.00:00:00 +0000".to_string(),
                ..Default::default()
            },
        ],
        ..KeyChain::new("kc1")
    };
    let diags = driver.create(&mut created, &cancel).await;
    assert!(!diags.has_error(), "{diags:?}");
    assert!(
        device
            .committed_lines()
            .iter()
            .all(|line| !line.contains("first secret"))
    );

    let mut read = KeyChain::new("kc1");
    let diags = driver.read(&mut read, &cancel).await;
    assert!(diags.is_empty(), "{diags:?}");
    assert_eq!(read, created);
    assert_eq!(
        read.id.as_deref(),
        Some("kc1"),
        "single field identity has no separator"
    );
}

#[tokio::test]
async fn absent_resource_reads_as_null_identity() {
    let device = SimDevice::new();
    let driver = driver(&device);

    let mut state = vlan("v100", 100);
    state.id = Some("v100_-_default".to_string());
    let diags = driver.read(&mut state, &CancellationToken::new()).await;

    assert!(diags.is_empty(), "{diags:?}");
    assert!(state.id.is_none());
    assert!(device.events().is_empty(), "reads take no device lock");
}

#[tokio::test]
async fn commit_error_reports_clear_failure_as_warning() {
    let device = SimDevice::new();
    device.reject_commit("statement creates a loop");
    device.fail_discard(true);
    let driver = driver(&device);

    let mut data = vlan("v100", 100);
    let diags = driver.create(&mut data, &CancellationToken::new()).await;

    assert_eq!(error_kinds(&diags), vec![ErrorKind::ConfigCommit]);
    assert_eq!(warning_kinds(&diags), vec![ErrorKind::ConfigClear]);
    assert!(data.id.is_none());
    assert!(device.committed_lines().is_empty());
    assert_eq!(device.lock_holder(), None);
}

#[tokio::test]
async fn escalated_clear_failure_is_an_error() {
    let device = SimDevice::new();
    device.fail_unlock(true);
    let config = ProviderConfig {
        clear_failure_policy: ClearFailurePolicy::Escalate,
        ..SimDevice::provider_config()
    };
    let driver = driver_with(&device, config);

    let mut data = vlan("v100", 100);
    let diags = driver.create(&mut data, &CancellationToken::new()).await;

    // the commit itself went through
    assert_eq!(device.commits().len(), 1);
    assert_eq!(error_kinds(&diags), vec![ErrorKind::ConfigClear]);
    // closing the session still frees the device lock
    assert_eq!(device.lock_holder(), None);
}

#[tokio::test]
async fn commit_warnings_are_surfaced() {
    let device = SimDevice::new();
    device.commit_warning("statement has no contents; ignored");
    let driver = driver(&device);

    let mut data = vlan("v100", 100);
    let diags = driver.create(&mut data, &CancellationToken::new()).await;

    assert!(!diags.has_error(), "{diags:?}");
    assert_eq!(warning_kinds(&diags), vec![ErrorKind::ConfigCommit]);
    assert_eq!(data.id.as_deref(), Some("v100_-_default"));
}

#[tokio::test]
async fn update_replaces_stanza_in_one_commit() {
    let device = SimDevice::new();
    let driver = driver(&device);
    let cancel = CancellationToken::new();

    let mut state = Vlan {
        description: Some("old".to_string()),
        ..vlan("v100", 100)
    };
    assert!(!driver.create(&mut state, &cancel).await.has_error());

    let mut plan = Vlan {
        description: Some("new".to_string()),
        ..vlan("v100", 100)
    };
    let diags = driver.update(&state, &mut plan, &cancel).await;

    assert!(diags.is_empty(), "{diags:?}");
    assert_eq!(plan.id.as_deref(), Some("v100_-_default"));
    let commits = device.commits();
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[1].comment, "update resource junos_vlan");
    assert_eq!(
        device.committed_lines(),
        vec![
            "set vlans v100 description \"new\"",
            "set vlans v100 vlan-id 100",
        ]
    );
}

#[tokio::test]
async fn update_pre_check_failure_commits_nothing() {
    let device = SimDevice::new();
    device.seed(["set vlans v100 vlan-id 100"]);
    let before = device.committed_digest();
    let driver = driver(&device);

    let state = vlan("v100", 100);
    let mut plan = vlan("v100", 101).in_instance("vs2");
    let diags = driver
        .update(&state, &mut plan, &CancellationToken::new())
        .await;

    assert_eq!(error_kinds(&diags), vec![ErrorKind::PreCheck]);
    assert!(plan.id.is_none());
    assert!(device.commits().is_empty());
    assert_eq!(device.committed_digest(), before);
    assert_eq!(device.lock_holder(), None);
}

#[tokio::test]
async fn delete_removes_stanza() {
    let device = SimDevice::new();
    device.seed(["set vlans v100 vlan-id 100", "set vlans v200 vlan-id 200"]);
    let driver = driver(&device);
    let cancel = CancellationToken::new();

    let state = vlan("v100", 100);
    let diags = driver.delete(&state, &cancel).await;

    assert!(diags.is_empty(), "{diags:?}");
    assert_eq!(device.committed_lines(), vec!["set vlans v200 vlan-id 200"]);
    assert_eq!(device.commits()[0].comment, "delete resource junos_vlan");

    let mut read = state.clone();
    driver.read(&mut read, &cancel).await;
    assert!(read.id.is_none());
}

#[tokio::test]
async fn import_accepts_short_and_full_identity() {
    let device = SimDevice::new();
    device.seed([
        "set vlans v100 vlan-id 100",
        "set routing-instances vs1 vlans v7 vlan-id 7",
    ]);
    let driver = driver(&device);
    let cancel = CancellationToken::new();

    let (found, diags) = driver.import::<Vlan>("v100", &cancel).await;
    assert!(diags.is_empty(), "{diags:?}");
    let found = found.expect("imported");
    assert_eq!(found.id.as_deref(), Some("v100_-_default"));
    assert_eq!(found.vlan_id.as_deref(), Some("100"));

    let (found, _) = driver.import::<Vlan>("v7_-_vs1", &cancel).await;
    assert_eq!(found.expect("imported").routing_instance, "vs1");

    let (missing, diags) = driver.import::<Vlan>("v999", &cancel).await;
    assert!(missing.is_none());
    let error = diags.errors().next().expect("not found");
    assert_eq!(error.summary, "Not Found");

    let (invalid, diags) = driver.import::<Vlan>("a_-_b_-_c", &cancel).await;
    assert!(invalid.is_none());
    assert_eq!(error_kinds(&diags), vec![ErrorKind::Identity]);
}

#[tokio::test]
async fn offline_create_writes_set_file_only() {
    let device = SimDevice::new();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("junos.set");
    let config = ProviderConfig {
        fake_create_set_file: Some(path.display().to_string()),
        ..SimDevice::provider_config()
    };
    let driver = driver_with(&device, config);

    let mut data = vlan("v100", 100);
    let diags = driver.create(&mut data, &CancellationToken::new()).await;

    assert!(diags.is_empty(), "{diags:?}");
    assert_eq!(data.id.as_deref(), Some("v100_-_default"));
    assert!(device.events().is_empty());
    let content = std::fs::read_to_string(&path).expect("set file");
    assert_eq!(content, "set vlans v100 vlan-id 100\n");
}

#[tokio::test]
async fn cancelled_operation_never_reaches_device() {
    let device = SimDevice::new();
    let driver = driver(&device);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut data = vlan("v100", 100);
    let diags = driver.create(&mut data, &cancel).await;

    assert_eq!(error_kinds(&diags), vec![ErrorKind::Cancelled]);
    assert!(data.id.is_none());
    assert!(device.events().is_empty());
}

#[tokio::test]
async fn failed_post_check_reports_error_but_keeps_commit() {
    let device = SimDevice::new();
    let driver = driver(&device);

    let mut data = TunedVlan {
        post_check_passes: false,
        ..TunedVlan::new(vlan("v100", 100))
    };
    let diags = driver.create(&mut data, &CancellationToken::new()).await;

    assert_eq!(error_kinds(&diags), vec![ErrorKind::PostCheck]);
    assert!(data.vlan.id.is_none());
    assert_eq!(device.commits().len(), 1);
    assert_eq!(device.committed_lines(), vec!["set vlans v100 vlan-id 100"]);
    let events = device.events();
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, SimEvent::Unlocked(_)))
            .count(),
        1
    );
    assert!(!events.iter().any(|e| matches!(e, SimEvent::Discarded(_))));
    assert_eq!(device.lock_holder(), None);
}

#[tokio::test]
async fn consistent_read_waits_for_writer_lock() {
    let device = SimDevice::new();
    device.seed(["set vlans v100 vlan-id 100"]);
    let driver = driver(&device);
    let cancel = CancellationToken::new();

    let held = driver
        .manager()
        .mutex_lock("create resource junos_vlan", &cancel)
        .await
        .expect("writer lock");

    // plain reads do not queue behind writers
    let mut plain = TunedVlan::new(Vlan::new("v100"));
    let diags = tokio::time::timeout(Duration::from_secs(5), driver.read(&mut plain, &cancel))
        .await
        .expect("plain read does not wait");
    assert!(diags.is_empty(), "{diags:?}");
    assert_eq!(plain.vlan.id.as_deref(), Some("v100_-_default"));

    let mut consistent = TunedVlan {
        consistent_read: true,
        ..TunedVlan::new(Vlan::new("v100"))
    };
    let waited = tokio::time::timeout(
        Duration::from_millis(50),
        driver.read(&mut consistent, &cancel),
    )
    .await;
    assert!(waited.is_err(), "consistent read ran while lock was held");

    let read_cancel = CancellationToken::new();
    let trigger = read_cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });
    let diags = driver.read(&mut consistent, &read_cancel).await;
    assert_eq!(error_kinds(&diags), vec![ErrorKind::Cancelled]);

    drop(held);
    let diags = driver.read(&mut consistent, &cancel).await;
    assert!(diags.is_empty(), "{diags:?}");
    assert_eq!(consistent.vlan.vlan_id.as_deref(), Some("100"));
    assert!(!driver.manager().lock_manager().is_locked());
}

fn offline_config(path: &std::path::Path) -> ProviderConfig {
    ProviderConfig {
        fake_create_set_file: Some(path.display().to_string()),
        fake_update_also: true,
        fake_delete_also: true,
        ..SimDevice::provider_config()
    }
}

#[tokio::test]
async fn offline_update_appends_delete_then_set_lines() {
    let device = SimDevice::new();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("junos.set");
    let driver = driver_with(&device, offline_config(&path));

    let state = Vlan {
        description: Some("old".to_string()),
        ..vlan("v100", 100)
    };
    let mut plan = Vlan {
        description: Some("new".to_string()),
        ..vlan("v100", 100)
    };
    let diags = driver
        .update(&state, &mut plan, &CancellationToken::new())
        .await;

    assert!(diags.is_empty(), "{diags:?}");
    assert_eq!(plan.id.as_deref(), Some("v100_-_default"));
    assert!(device.events().is_empty());
    let content = std::fs::read_to_string(&path).expect("set file");
    assert_eq!(
        content,
        "delete vlans v100\nset vlans v100 description \"new\"\nset vlans v100 vlan-id 100\n"
    );
}

#[tokio::test]
async fn offline_delete_appends_delete_line() {
    let device = SimDevice::new();
    device.seed(["set vlans v100 vlan-id 100"]);
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("junos.set");
    let driver = driver_with(&device, offline_config(&path));

    let diags = driver
        .delete(&vlan("v100", 100), &CancellationToken::new())
        .await;

    assert!(diags.is_empty(), "{diags:?}");
    assert!(device.events().is_empty());
    assert_eq!(device.committed_lines(), vec!["set vlans v100 vlan-id 100"]);
    let content = std::fs::read_to_string(&path).expect("set file");
    assert_eq!(content, "delete vlans v100\n");
}
