use super::{cm, deploy, eventually, fakes::obj, pod, strings, Harness};
use crate::{CacheManager, Error};
use maplit::btreeset;
use std::{collections::BTreeSet, time::Duration};
use tokio::time;
use tokio_util::sync::CancellationToken;
use warden_policy_controller_core::{
    CfDataKey, DataStore, Gvk, NamespacePattern, Process, ProcessExcluder, SyncSource,
};

use super::fakes::FakeReader;

fn cluster() -> FakeReader {
    FakeReader::default()
        .with(cm(), vec![obj("ns-0", "cm-0"), obj("ns-1", "cm-1")])
        .with(pod(), vec![obj("ns-0", "pod-0"), obj("ns-1", "pod-1")])
        .with(deploy(), vec![obj("ns-0", "deploy-0")])
}

const CMS: [&str; 2] = ["v1/ConfigMap ns-0/cm-0", "v1/ConfigMap ns-1/cm-1"];
const PODS: [&str; 2] = ["v1/Pod ns-0/pod-0", "v1/Pod ns-1/pod-1"];

fn exclude_sync(ns: &str) -> ProcessExcluder {
    let mut excluder = ProcessExcluder::default();
    excluder.add([Process::Sync], [ns.parse::<NamespacePattern>().unwrap()]);
    excluder
}

fn gvks(cache: &CacheManager) -> BTreeSet<Gvk> {
    cache.gvks_to_sync().into_iter().collect()
}

fn watched(cache: &CacheManager) -> BTreeSet<Gvk> {
    cache.watched_gvks().into_iter().collect()
}

/// Two sources add kinds concurrently, then one drops a kind the other still needs, then both go
/// away.
#[tokio::test(start_paused = true)]
async fn sources_share_and_release_kinds() {
    let h = Harness::new(cluster());
    let a = SyncSource::config("warden-system", "config");
    let b = SyncSource::sync_set("b");

    let (ra, rb) = tokio::join!(
        {
            let cache = h.cache.clone();
            let a = a.clone();
            async move { cache.upsert_source(a, [cm()]) }
        },
        {
            let cache = h.cache.clone();
            let b = b.clone();
            async move { cache.upsert_source(b, [pod()]) }
        },
    );
    ra.unwrap();
    rb.unwrap();

    let expected = strings(CMS.into_iter().chain(PODS));
    eventually(|| h.keys() == expected).await;
    assert_eq!(h.registrar.active(), btreeset! {cm(), pod()});

    // B now only wants ConfigMaps, which A also wants.
    h.cache.upsert_source(b.clone(), [cm()]).unwrap();
    assert_eq!(h.keys(), strings(CMS), "pods are wiped immediately");
    assert_eq!(h.registrar.active(), btreeset! {cm()});
    assert_eq!(
        h.cache.sources_for(&cm()).into_iter().collect::<BTreeSet<_>>(),
        btreeset! {a.clone(), b.clone()}
    );

    h.cache.remove_source(&a).unwrap();
    assert_eq!(h.keys(), strings(CMS), "b still wants config maps");

    h.cache.remove_source(&b).unwrap();
    assert!(h.store.is_empty());
    assert!(h.cache.gvks_to_sync().is_empty());
    assert!(h.registrar.active().is_empty());
    assert_eq!(h.registrar.duplicate_adds(), 0);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn repeated_upserts_cause_no_churn() {
    let h = Harness::new(cluster());
    let a = SyncSource::sync_set("a");

    h.cache.upsert_source(a.clone(), [cm(), pod()]).unwrap();
    eventually(|| h.readiness.is_replayed(&cm()) && h.readiness.is_replayed(&pod())).await;
    let lists = h.reader.lists(&cm());

    for _ in 0..3 {
        h.cache.upsert_source(a.clone(), [pod(), cm()]).unwrap();
    }
    time::sleep(Duration::from_secs(1)).await;

    assert_eq!(h.registrar.adds(), 2);
    assert_eq!(h.registrar.removes(), 0);
    assert_eq!(h.reader.lists(&cm()), lists, "nothing is re-listed");
    assert_eq!(h.keys(), strings(CMS.into_iter().chain(PODS)));

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn replay_recovers_after_list_failures() {
    let reader = cluster();
    reader.fail(cm(), 5);
    let h = Harness::new(reader);

    h.cache
        .upsert_source(SyncSource::sync_set("a"), [cm()])
        .unwrap();

    eventually(|| h.keys() == strings(CMS)).await;
    assert_eq!(h.reader.lists(&cm()), 6);
    assert!(h.readiness.is_replayed(&cm()));

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failing_kind_does_not_block_others() {
    let reader = cluster();
    reader.fail(pod(), usize::MAX);
    let h = Harness::new(reader);

    h.cache
        .upsert_source(SyncSource::sync_set("a"), [cm(), pod()])
        .unwrap();

    eventually(|| h.keys() == strings(CMS)).await;
    eventually(|| h.reader.lists(&pod()) > 3).await;
    assert!(!h.readiness.is_replayed(&pod()));

    h.shutdown().await;
}

/// Removing the last source of a kind whose replay is still retrying wipes the kind and stops the
/// replay for good.
#[tokio::test(start_paused = true)]
async fn removal_cancels_retrying_replay() {
    let reader = cluster();
    reader.fail(cm(), usize::MAX);
    let h = Harness::new(reader);
    let a = SyncSource::sync_set("a");

    h.cache.upsert_source(a.clone(), [cm()]).unwrap();
    eventually(|| h.reader.lists(&cm()) >= 2).await;

    // A watch event lands while the replay keeps failing.
    h.cache.add_object(&cm(), obj("ns-0", "cm-0")).unwrap();
    assert_eq!(h.keys(), strings(["v1/ConfigMap ns-0/cm-0"]));

    h.cache.remove_source(&a).unwrap();
    assert!(h.store.is_empty());
    assert!(h.registrar.active().is_empty());

    // Even once lists succeed again, the cancelled replay never writes.
    h.reader.fail(cm(), 0);
    let lists = h.reader.lists(&cm());
    time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.reader.lists(&cm()), lists);
    assert!(h.store.is_empty());

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn re_adding_a_kind_replays_it_again() {
    let h = Harness::new(cluster());
    let a = SyncSource::sync_set("a");

    h.cache.upsert_source(a.clone(), [cm()]).unwrap();
    eventually(|| h.keys() == strings(CMS)).await;
    h.cache.remove_source(&a).unwrap();
    assert!(h.store.is_empty());

    h.reader.set(cm(), vec![obj("ns-2", "cm-2")]);
    h.cache.upsert_source(a, [cm()]).unwrap();
    eventually(|| h.keys() == strings(["v1/ConfigMap ns-2/cm-2"])).await;
    assert_eq!(h.registrar.adds(), 2);
    assert_eq!(h.registrar.removes(), 1);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn excluder_swap_prunes_only_excluded_namespaces() {
    let h = Harness::new(cluster());
    h.cache
        .upsert_source(SyncSource::sync_set("a"), [cm(), pod()])
        .unwrap();
    eventually(|| h.keys() == strings(CMS.into_iter().chain(PODS))).await;

    h.cache.exclude_processes(exclude_sync("ns-1"));
    assert_eq!(
        h.keys(),
        strings(["v1/ConfigMap ns-0/cm-0", "v1/Pod ns-0/pod-0"]),
        "excluded objects are pruned right away"
    );

    // Replays triggered by the swap must not bring excluded objects back.
    time::sleep(Duration::from_secs(1)).await;
    assert_eq!(
        h.keys(),
        strings(["v1/ConfigMap ns-0/cm-0", "v1/Pod ns-0/pod-0"])
    );

    // Lifting the exclusion re-lists the kinds.
    h.cache.exclude_processes(ProcessExcluder::default());
    eventually(|| h.keys() == strings(CMS.into_iter().chain(PODS))).await;

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unchanged_excluder_is_a_no_op() {
    let h = Harness::new(cluster());
    h.cache.exclude_processes(exclude_sync("ns-1"));
    h.cache
        .upsert_source(SyncSource::sync_set("a"), [cm()])
        .unwrap();
    eventually(|| h.readiness.is_replayed(&cm())).await;
    assert_eq!(h.keys(), strings(["v1/ConfigMap ns-0/cm-0"]));

    let lists = h.reader.lists(&cm());
    h.cache.exclude_processes(exclude_sync("ns-1"));
    time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.reader.lists(&cm()), lists);
    assert_eq!(h.cache.excluder(), exclude_sync("ns-1"));

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rejected_watches_are_surfaced_and_retried() {
    let h = Harness::new(cluster());
    h.registrar.reject(pod());

    let err = h
        .cache
        .upsert_source(SyncSource::sync_set("a"), [cm(), pod()])
        .unwrap_err();
    assert!(matches!(err, Error::Registrar { ref gvk, .. } if *gvk == pod()), "{err}");
    assert_eq!(watched(&h.cache), btreeset! {cm()});
    assert_eq!(gvks(&h.cache), btreeset! {cm(), pod()});

    h.registrar.accept(&pod());
    eventually(|| h.keys() == strings(CMS.into_iter().chain(PODS))).await;
    assert_eq!(watched(&h.cache), btreeset! {cm(), pod()});

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rejects_invalid_sources() {
    let h = Harness::new(cluster());
    assert!(matches!(
        h.cache.upsert_source(SyncSource::new("", "a"), [cm()]),
        Err(Error::InvalidSource(_))
    ));
    assert!(matches!(
        h.cache.remove_source(&SyncSource::new("syncset", "")),
        Err(Error::InvalidSource(_))
    ));
    assert!(matches!(
        h.cache
            .upsert_source(SyncSource::sync_set("a"), [Gvk::new("", "v1", "")]),
        Err(Error::InvalidKind(_))
    ));
    assert!(h.registrar.active().is_empty());

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn run_is_exclusive_and_restartable() {
    let h = Harness::new(cluster());
    // Let the harness' loop start.
    time::sleep(Duration::from_millis(1)).await;

    let second = h.cache.run(CancellationToken::new()).await;
    assert!(matches!(second, Err(Error::AlreadyRunning)));

    let cache = h.cache.clone();
    h.shutdown().await;

    // Work requested while stopped is picked up once the loop runs again.
    cache
        .upsert_source(SyncSource::sync_set("a"), [cm()])
        .unwrap();
    time::sleep(Duration::from_secs(1)).await;
    assert!(cache.store().is_empty());

    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cache = cache.clone();
        let cancel = cancel.clone();
        async move { cache.run(cancel).await }
    });
    eventually(|| cache.store().len() == 2).await;

    cancel.cancel();
    let res = task.await.unwrap();
    assert!(matches!(res, Err(Error::Cancelled)));
}

#[tokio::test(start_paused = true)]
async fn aborted_run_can_be_restarted() {
    let mut h = Harness::new(cluster());
    let _gate = h.reader.hold();
    h.cache
        .upsert_source(SyncSource::sync_set("a"), [cm()])
        .unwrap();
    eventually(|| h.reader.lists(&cm()) == 1).await;

    // Drop the loop without cancelling its token, with a replay still listing.
    h.task.abort();
    let aborted = (&mut h.task).await.unwrap_err();
    assert!(aborted.is_cancelled());
    assert!(h.store.is_empty());

    h.task = tokio::spawn({
        let cache = h.cache.clone();
        let cancel = h.cancel.clone();
        async move { cache.run(cancel).await }
    });
    eventually(|| h.keys() == strings(CMS)).await;
    assert_eq!(h.reader.lists(&cm()), 2);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn watch_events_win_over_an_inflight_replay() {
    let h = Harness::new(FakeReader::default().with(
        cm(),
        vec![obj("ns-0", "cm-0"), obj("ns-0", "cm-1"), obj("ns-1", "cm-2")],
    ));
    let gate = h.reader.hold();
    h.cache
        .upsert_source(SyncSource::sync_set("a"), [cm()])
        .unwrap();
    eventually(|| h.reader.lists(&cm()) == 1).await;

    // The list has its snapshot; the watch then updates cm-0 and deletes cm-1.
    let mut updated = obj("ns-0", "cm-0");
    updated.data = serde_json::json!({ "data": { "rev": "2" } });
    h.cache.add_object(&cm(), updated.clone()).unwrap();
    h.cache
        .remove_object(&cm(), &obj("ns-0", "cm-1"))
        .unwrap();
    assert_eq!(h.keys(), strings(["v1/ConfigMap ns-0/cm-0"]));

    gate.notify_one();
    eventually(|| h.readiness.is_replayed(&cm())).await;
    assert_eq!(
        h.keys(),
        strings(["v1/ConfigMap ns-0/cm-0", "v1/ConfigMap ns-1/cm-2"])
    );
    let key = CfDataKey::for_object(&cm(), &updated).unwrap();
    assert_eq!(h.store.get(&key).map(|o| o.data), Some(updated.data));

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn watch_restart_during_replay_keeps_its_objects() {
    let h = Harness::new(cluster());
    let gate = h.reader.hold();
    h.cache
        .upsert_source(SyncSource::sync_set("a"), [cm()])
        .unwrap();
    eventually(|| h.reader.lists(&cm()) == 1).await;

    h.cache
        .replace_objects(&cm(), vec![obj("ns-2", "cm-3")])
        .unwrap();

    gate.notify_one();
    eventually(|| h.readiness.is_replayed(&cm())).await;
    assert_eq!(h.keys(), strings(["v1/ConfigMap ns-2/cm-3"]));

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn refresh_wipes_and_relists() {
    let h = Harness::new(cluster());
    assert!(!h.cache.refresh(&cm()));

    h.cache
        .upsert_source(SyncSource::sync_set("a"), [cm()])
        .unwrap();
    eventually(|| h.keys() == strings(CMS)).await;

    h.reader.set(cm(), vec![obj("ns-0", "cm-0")]);
    assert!(h.cache.refresh(&cm()));
    eventually(|| h.keys() == strings(["v1/ConfigMap ns-0/cm-0"])).await;

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn object_events_respect_watches_and_exclusions() {
    let h = Harness::new(FakeReader::default());
    h.cache.exclude_processes(exclude_sync("kube-*"));

    // Unwatched kinds are dropped.
    h.cache.add_object(&cm(), obj("ns-0", "cm-0")).unwrap();
    assert!(h.store.is_empty());

    h.cache
        .upsert_source(SyncSource::sync_set("a"), [cm()])
        .unwrap();
    h.cache.add_object(&cm(), obj("ns-0", "cm-0")).unwrap();
    h.cache.add_object(&cm(), obj("kube-system", "cm-1")).unwrap();
    assert_eq!(h.keys(), strings(["v1/ConfigMap ns-0/cm-0"]));

    assert!(matches!(
        h.cache.add_object(&cm(), obj("ns-0", "")),
        Err(Error::InvalidObject { .. })
    ));

    h.cache
        .replace_objects(
            &cm(),
            vec![obj("ns-1", "cm-2"), obj("kube-public", "cm-3")],
        )
        .unwrap();
    assert_eq!(h.keys(), strings(["v1/ConfigMap ns-1/cm-2"]));

    h.cache.remove_object(&cm(), &obj("ns-1", "cm-2")).unwrap();
    assert!(h.store.is_empty());

    h.shutdown().await;
}

/// Many sources churn concurrently. Once they settle, the watched set matches the requested kinds
/// and the store holds exactly their objects.
#[tokio::test(start_paused = true)]
async fn converges_after_concurrent_churn() {
    let h = Harness::new(cluster());
    let kinds = [cm(), pod(), deploy()];

    let tasks = (0..8)
        .map(|t| {
            let cache = h.cache.clone();
            let kinds = kinds.clone();
            tokio::spawn(async move {
                let source = SyncSource::sync_set(&format!("s-{}", t % 4));
                for i in 0..50usize {
                    match (t + i) % 4 {
                        0 => cache.remove_source(&source).unwrap(),
                        n => {
                            let chosen = kinds.iter().take(n).cloned().collect::<Vec<_>>();
                            cache.upsert_source(source.clone(), chosen).unwrap();
                        }
                    }
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect::<Vec<_>>();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(h.registrar.duplicate_adds(), 0);
    assert_eq!(h.registrar.active(), gvks(&h.cache));
    assert_eq!(watched(&h.cache), gvks(&h.cache));

    let mut expected = BTreeSet::new();
    for gvk in gvks(&h.cache) {
        let objects = h
            .reader
            .list_now(&gvk)
            .into_iter()
            .map(|o| format!("{gvk} {}/{}", o.metadata.namespace.unwrap(), o.metadata.name.unwrap()));
        expected.extend(objects);
    }
    eventually(|| h.keys() == expected).await;

    h.shutdown().await;
}
