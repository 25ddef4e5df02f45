// Clone lifecycle on the in-memory backend:
// - create/activate/destroy/promote round trips and their registry mirror;
// - ids are monotonic and never reused;
// - failed backend calls leave the registry (and the backend) as they were;
// - creation/activation limits; bulk destroy and gc.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use zcm::{ActivateLimits, CloneLimits, Manager, MemoryBackend, SnapshotBackend, ZcmError};

const ROOT: &str = "tank/zcm/app";
const PATH: &str = "/srv/app";

fn setup() -> Result<(Arc<MemoryBackend>, Manager)> {
    let backend = Arc::new(MemoryBackend::new());
    let manager = Manager::initialize(backend.clone(), ROOT, PATH)?;
    Ok((backend, manager))
}

fn ids(m: &Manager) -> Vec<u64> {
    m.registry().ids()
}

fn ds(id: u64) -> String {
    format!("{}/{:08}", ROOT, id)
}

/// The registry kept in memory must match a registry rebuilt from the backend.
fn assert_mirrors_backend(backend: &Arc<MemoryBackend>, m: &Manager) -> Result<()> {
    let fresh = Manager::open(backend.clone(), PATH)?;
    assert_eq!(fresh.clones(), m.clones(), "clones differ from backend state");
    assert_eq!(fresh.registry().active_id(), m.registry().active_id());
    assert_eq!(fresh.next_id(), m.next_id());
    Ok(())
}

/// Clones [1,2,3] where 2 and 3 were cut from 1, then 2 activated.
fn three_clones_active_two() -> Result<(Arc<MemoryBackend>, Manager)> {
    let (backend, mut m) = setup()?;
    m.create_clone(CloneLimits::default())?;
    m.activate(1, ActivateLimits::default())?;
    m.create_clone(CloneLimits::default())?;
    m.create_clone(CloneLimits::default())?;
    m.activate(2, ActivateLimits::default())?;
    Ok((backend, m))
}

#[test]
fn fresh_root_then_first_clone() -> Result<()> {
    let (backend, mut m) = setup()?;
    assert_eq!(m.path(), Path::new(PATH));
    assert_eq!(m.zfs(), ROOT);
    assert!(m.clones().is_empty());
    assert_eq!(m.next_id(), 1);
    assert!(m.active_clone().is_none());
    assert_eq!(backend.mountpoint(ROOT), Some(PathBuf::from("/srv/app/.clones")));

    let c = m.create_clone(CloneLimits::default())?;
    assert_eq!(c.id, 1);
    assert_eq!(c.zfs, ds(1));
    assert_eq!(c.origin, None);
    assert_eq!(c.mountpoint, PathBuf::from("/srv/app/.clones/00000001"));
    assert_eq!(ids(&m), vec![1]);
    assert!(m.active_clone().is_none(), "a new clone is not activated");
    assert_eq!(m.next_id(), 2);
    assert_mirrors_backend(&backend, &m)?;
    Ok(())
}

#[test]
fn older_and_newer_around_active() -> Result<()> {
    let (backend, m) = three_clones_active_two()?;
    let older: Vec<u64> = m.older_clones().iter().map(|c| c.id).collect();
    let newer: Vec<u64> = m.newer_clones().iter().map(|c| c.id).collect();
    assert_eq!(older, vec![1]);
    assert_eq!(newer, vec![3]);
    assert_eq!(m.active_clone().map(|c| c.id), Some(2));

    // 2 and 3 were cut from snapshots of 1
    assert_eq!(m.registry().get(2).and_then(|c| c.origin_id), Some(1));
    assert_eq!(
        m.registry().get(3).and_then(|c| c.origin.clone()),
        Some(format!("{}@00000003", ds(1)))
    );

    assert_eq!(backend.mountpoint(&ds(2)), Some(PathBuf::from(PATH)));
    assert_eq!(backend.mountpoint(&ds(1)), Some(PathBuf::from("/srv/app/.clones/00000001")));
    assert_mirrors_backend(&backend, &m)?;
    Ok(())
}

#[test]
fn destroyed_ids_are_not_reused() -> Result<()> {
    let (backend, mut m) = three_clones_active_two()?;
    m.destroy(3)?;
    assert_eq!(ids(&m), vec![1, 2]);
    // origin snapshot of 3 released with it
    assert!(!backend.exists(&format!("{}@00000003", ds(1))));

    let c = m.create_clone(CloneLimits::default())?;
    assert_eq!(c.id, 4);
    assert_eq!(c.origin_id, Some(2));
    assert_eq!(ids(&m), vec![1, 2, 4]);
    assert_mirrors_backend(&backend, &m)?;

    // also after reopening: the high-water mark lives on the root
    let reopened = Manager::open(backend.clone(), PATH)?;
    assert_eq!(reopened.next_id(), 5);
    Ok(())
}

#[test]
fn destroying_the_newest_then_reopening_keeps_the_id_burnt() -> Result<()> {
    let (backend, mut m) = three_clones_active_two()?;
    m.destroy(3)?;
    let reopened = Manager::open(backend.clone(), PATH)?;
    assert_eq!(reopened.next_id(), 4);
    Ok(())
}

#[test]
fn active_clone_cannot_be_destroyed() -> Result<()> {
    let (backend, mut m) = three_clones_active_two()?;
    let before = m.clones().to_vec();
    let snaps = backend.snapshots();

    let err = m.destroy(2).unwrap_err();
    assert!(matches!(err, ZcmError::ActiveCloneDestroy(2)), "got {err}");
    assert_eq!(m.clones(), &before[..]);
    assert_eq!(backend.snapshots(), snaps);
    assert!(backend.exists(&ds(2)));
    Ok(())
}

#[test]
fn unknown_ids_are_reported() -> Result<()> {
    let (_backend, mut m) = three_clones_active_two()?;
    assert!(matches!(m.destroy(42), Err(ZcmError::CloneNotFound(42))));
    assert!(matches!(
        m.activate(42, ActivateLimits::default()),
        Err(ZcmError::CloneNotFound(42))
    ));
    assert!(matches!(m.promote(42), Err(ZcmError::CloneNotFound(42))));
    assert!(matches!(m.clone_size(42), Err(ZcmError::CloneNotFound(42))));
    Ok(())
}

#[test]
fn promote_discards_older_ancestry() -> Result<()> {
    let (backend, mut m) = three_clones_active_two()?;
    m.promote(2)?;

    assert_eq!(ids(&m), vec![2, 3], "newer ids are not renumbered");
    assert!(!backend.exists(&ds(1)));
    let two = m.registry().get(2).cloned();
    assert_eq!(two.as_ref().and_then(|c| c.origin.clone()), None);
    assert_eq!(m.active_clone().map(|c| c.id), Some(2));

    // 3 now hangs off the snapshot that moved to 2
    let three = m.registry().get(3).cloned();
    assert_eq!(three.as_ref().and_then(|c| c.origin_id), Some(2));
    assert_eq!(backend.snapshots(), vec![format!("{}@00000002", ds(2))]);
    assert_eq!(m.next_id(), 4);
    assert_mirrors_backend(&backend, &m)?;
    Ok(())
}

#[test]
fn promote_rules() -> Result<()> {
    let (_backend, mut m) = setup()?;
    m.create_clone(CloneLimits::default())?;
    assert!(matches!(m.promote(1), Err(ZcmError::InvalidPromotion { id: 1, .. })));

    let (_backend, mut m) = three_clones_active_two()?;
    assert!(matches!(m.promote(3), Err(ZcmError::InvalidPromotion { id: 3, .. })));
    assert_eq!(ids(&m), vec![1, 2, 3]);
    Ok(())
}

#[test]
fn promote_of_an_independent_clone_only_drops_older() -> Result<()> {
    let (backend, mut m) = setup()?;
    m.create_clone(CloneLimits::default())?;
    m.create_clone(CloneLimits::default())?;
    m.activate(2, ActivateLimits::default())?;
    m.promote(2)?;
    assert_eq!(ids(&m), vec![2]);
    assert!(!backend.exists(&ds(1)));
    Ok(())
}

#[test]
fn promote_deep_chain() -> Result<()> {
    // 1 -> 2 -> 3 -> 4, each cut from the previous active clone
    let (backend, mut m) = setup()?;
    m.create_clone(CloneLimits::default())?;
    for id in 1..=3 {
        m.activate(id, ActivateLimits::default())?;
        m.create_clone(CloneLimits::default())?;
    }
    m.activate(4, ActivateLimits::default())?;
    m.promote(4)?;

    assert_eq!(ids(&m), vec![4]);
    assert_eq!(m.clones()[0].origin, None);
    assert!(backend.snapshots().is_empty());
    assert_eq!(backend.datasets().iter().filter(|d| d.starts_with(ROOT)).count(), 2);
    assert_mirrors_backend(&backend, &m)?;
    Ok(())
}

#[test]
fn destroy_hands_dependents_over() -> Result<()> {
    // 2 and 3 cut from 1; 3 active; 1 is destroyed under them
    let (backend, mut m) = setup()?;
    m.create_clone(CloneLimits::default())?;
    m.activate(1, ActivateLimits::default())?;
    m.create_clone(CloneLimits::default())?;
    m.create_clone(CloneLimits::default())?;
    m.activate(3, ActivateLimits::default())?;

    m.destroy(1)?;

    assert_eq!(ids(&m), vec![2, 3]);
    let two = m.registry().get(2).cloned();
    let three = m.registry().get(3).cloned();
    assert_eq!(three.as_ref().and_then(|c| c.origin.clone()), None);
    assert_eq!(
        two.as_ref().and_then(|c| c.origin.clone()),
        Some(format!("{}@00000002", ds(3)))
    );
    assert_eq!(two.as_ref().and_then(|c| c.origin_id), Some(3));
    assert_eq!(backend.snapshots(), vec![format!("{}@00000002", ds(3))]);
    assert_mirrors_backend(&backend, &m)?;
    Ok(())
}

#[test]
fn activation_switches_mountpoints() -> Result<()> {
    let (backend, mut m) = three_clones_active_two()?;
    m.activate(3, ActivateLimits::default())?;
    assert_eq!(backend.mountpoint(&ds(3)), Some(PathBuf::from(PATH)));
    assert_eq!(backend.mountpoint(&ds(2)), Some(PathBuf::from("/srv/app/.clones/00000002")));
    assert_eq!(m.active_clone().map(|c| c.mountpoint.clone()), Some(PathBuf::from(PATH)));

    assert!(matches!(
        m.activate(3, ActivateLimits::default()),
        Err(ZcmError::AlreadyActive(3))
    ));
    assert_mirrors_backend(&backend, &m)?;
    Ok(())
}

#[test]
fn failed_activation_keeps_previous_active() -> Result<()> {
    let (backend, mut m) = three_clones_active_two()?;
    backend.fail_next("set_active");
    assert!(matches!(
        m.activate(3, ActivateLimits::default()),
        Err(ZcmError::Backend(_))
    ));
    assert_eq!(m.active_clone().map(|c| c.id), Some(2));
    assert_eq!(backend.mountpoint(&ds(2)), Some(PathBuf::from(PATH)));
    assert_mirrors_backend(&backend, &m)?;
    Ok(())
}

#[test]
fn failed_creation_leaves_nothing_behind() -> Result<()> {
    let (backend, mut m) = three_clones_active_two()?;
    let clones = m.clones().to_vec();
    let snaps = backend.snapshots();
    let datasets = backend.datasets();

    for op in ["snapshot", "clone", "rename", "set"] {
        backend.fail_next(op);
        let err = m.create_clone(CloneLimits::default()).unwrap_err();
        assert!(matches!(err, ZcmError::Backend(_)), "{op}: got {err}");
        assert_eq!(m.clones(), &clones[..], "{op}: registry changed");
        assert_eq!(m.next_id(), 4, "{op}: id consumed");
        assert_eq!(backend.snapshots(), snaps, "{op}: snapshot leaked");
        assert_eq!(backend.datasets(), datasets, "{op}: dataset leaked");
    }

    let c = m.create_clone(CloneLimits::default())?;
    assert_eq!(c.id, 4);
    Ok(())
}

#[test]
fn failed_creation_on_empty_root() -> Result<()> {
    let (backend, mut m) = setup()?;
    backend.fail_next("create");
    assert!(m.create_clone(CloneLimits::default()).is_err());
    assert!(m.clones().is_empty());
    assert_mirrors_backend(&backend, &m)?;
    Ok(())
}

#[test]
fn unrecorded_id_is_never_handed_out() -> Result<()> {
    let (backend, mut m) = setup()?;
    m.create_clone(CloneLimits::default())?;
    m.activate(1, ActivateLimits::default())?;

    backend.fail_next("set");
    assert!(matches!(
        m.create_clone(CloneLimits::default()),
        Err(ZcmError::Backend(_))
    ));
    assert_eq!(ids(&m), vec![1]);
    assert_eq!(backend.snapshots(), Vec::<String>::new());
    assert_mirrors_backend(&backend, &m)?;

    let c = m.create_clone(CloneLimits::default())?;
    assert_eq!(c.id, 2);
    m.destroy(2)?;
    assert_eq!(m.next_id(), 3);
    assert_eq!(Manager::open(backend.clone(), PATH)?.next_id(), 3);
    Ok(())
}

#[test]
fn interrupted_creation_does_not_block_the_next_one() -> Result<()> {
    let (backend, mut m) = setup()?;
    m.create_clone(CloneLimits::default())?;
    m.activate(1, ActivateLimits::default())?;

    // stopped after staging, before the rename
    let staged = format!("{}.partial", ds(2));
    let snap = backend.create_snapshot(&ds(1), "00000002")?;
    backend.clone_from_snapshot(&snap, &staged, Path::new("/srv/app/.clones/00000002"))?;

    let mut m = Manager::open(backend.clone(), PATH)?;
    assert_eq!(ids(&m), vec![1]);
    assert_eq!(m.next_id(), 2);
    let c = m.create_clone(CloneLimits::default())?;
    assert_eq!(c.id, 2);
    assert_eq!(c.origin.as_deref(), Some(snap.as_str()));
    assert!(!backend.exists(&staged));
    assert_mirrors_backend(&backend, &m)?;

    // stopped right after the snapshot
    backend.create_snapshot(&ds(1), "00000003")?;
    let c = m.create_clone(CloneLimits::default())?;
    assert_eq!(c.id, 3);
    assert_eq!(backend.snapshots().len(), 2);
    assert_mirrors_backend(&backend, &m)?;
    Ok(())
}

#[test]
fn failed_destroy_keeps_registry() -> Result<()> {
    let (backend, mut m) = three_clones_active_two()?;
    let clones = m.clones().to_vec();
    backend.fail_next("destroy");
    assert!(m.destroy(3).is_err());
    assert_eq!(m.clones(), &clones[..]);
    assert!(backend.exists(&ds(3)));
    Ok(())
}

#[test]
fn creation_limits() -> Result<()> {
    let (_backend, mut m) = setup()?;
    m.create_clone(CloneLimits::default())?;
    m.activate(1, ActivateLimits::default())?;
    for _ in 0..5 {
        m.create_clone(CloneLimits::default())?;
    }
    assert!(matches!(
        m.create_clone(CloneLimits { max_newer: Some(5), max_total: None }),
        Err(ZcmError::LimitExceeded(_))
    ));
    assert!(matches!(
        m.create_clone(CloneLimits { max_newer: None, max_total: Some(6) }),
        Err(ZcmError::LimitExceeded(_))
    ));
    assert_eq!(m.next_id(), 7);
    assert_eq!(m.newer_clones().len(), 5);

    m.create_clone(CloneLimits { max_newer: Some(6), max_total: Some(7) })?;
    assert_eq!(m.clones().len(), 7);
    Ok(())
}

#[test]
fn activation_limits() -> Result<()> {
    let (_backend, mut m) = setup()?;
    for _ in 0..5 {
        m.create_clone(CloneLimits::default())?;
    }
    m.activate(1, ActivateLimits::default())?;

    let err = m
        .activate(3, ActivateLimits { max_older: None, max_newer: Some(1) })
        .unwrap_err();
    assert!(matches!(err, ZcmError::LimitExceeded(_)));
    let err = m
        .activate(3, ActivateLimits { max_older: Some(1), max_newer: None })
        .unwrap_err();
    assert!(matches!(err, ZcmError::LimitExceeded(_)));
    assert_eq!(m.active_clone().map(|c| c.id), Some(1));

    m.activate(3, ActivateLimits { max_older: Some(2), max_newer: Some(2) })?;
    assert_eq!(m.older_clones().len(), 2);
    assert_eq!(m.newer_clones().len(), 2);
    Ok(())
}

#[test]
fn destroy_older_keeps_most_recent() -> Result<()> {
    // linear chain 1 -> 2 -> 3 -> 4, 4 active
    let (backend, mut m) = setup()?;
    m.create_clone(CloneLimits::default())?;
    for id in 1..=3 {
        m.activate(id, ActivateLimits::default())?;
        m.create_clone(CloneLimits::default())?;
    }
    m.activate(4, ActivateLimits::default())?;

    let destroyed = m.destroy_older(1)?;
    assert_eq!(destroyed, vec![1, 2]);
    assert_eq!(ids(&m), vec![3, 4]);
    assert_eq!(m.registry().get(4).and_then(|c| c.origin_id), Some(3));
    assert_mirrors_backend(&backend, &m)?;
    Ok(())
}

#[test]
fn destroy_newer_removes_all_newer() -> Result<()> {
    let (backend, mut m) = setup()?;
    m.create_clone(CloneLimits::default())?;
    m.activate(1, ActivateLimits::default())?;
    for _ in 0..3 {
        m.create_clone(CloneLimits::default())?;
    }
    let destroyed = m.destroy_newer()?;
    assert_eq!(destroyed, vec![4, 3, 2]);
    assert_eq!(ids(&m), vec![1]);
    assert!(backend.snapshots().is_empty());
    assert_eq!(m.next_id(), 5);
    Ok(())
}

#[test]
fn gc_trims_both_sides() -> Result<()> {
    let (backend, mut m) = setup()?;
    m.create_clone(CloneLimits::default())?;
    m.activate(1, ActivateLimits::default())?;
    m.create_clone(CloneLimits::default())?;
    m.activate(2, ActivateLimits::default())?;
    m.create_clone(CloneLimits::default())?;
    m.create_clone(CloneLimits::default())?;

    // nothing newer trimmed without keep_newer
    let first = m.gc(1, None)?;
    assert!(first.is_empty());

    let destroyed = m.gc(0, Some(1))?;
    assert_eq!(destroyed, vec![1, 4]);
    assert_eq!(ids(&m), vec![2, 3]);
    assert_mirrors_backend(&backend, &m)?;
    Ok(())
}

#[test]
fn sizes_are_summed_and_memoized() -> Result<()> {
    let (backend, mut m) = three_clones_active_two()?;
    backend.set_size(&ds(1), 100)?;
    backend.set_size(&ds(2), 20)?;
    backend.set_size(&ds(3), 3)?;
    m.reload()?;

    let calls = backend.size_calls();
    assert_eq!(m.size()?, 123);
    assert_eq!(m.size()?, 123);
    assert_eq!(m.clone_size(1)?, 100);
    assert_eq!(backend.size_calls() - calls, 3);

    let info = m.info()?;
    assert_eq!(info.size, 123);
    assert_eq!((info.total, info.older, info.newer), (3, 1, 1));
    assert_eq!((info.oldest, info.active, info.newest), (Some(1), Some(2), Some(3)));
    assert_eq!(info.next_id, 4);
    Ok(())
}

#[test]
fn initialize_twice_is_rejected() -> Result<()> {
    let (backend, _m) = setup()?;
    assert!(matches!(
        Manager::initialize(backend.clone(), ROOT, "/srv/other"),
        Err(ZcmError::AlreadyManaged { .. })
    ));
    assert!(matches!(
        Manager::initialize(backend.clone(), "tank/zcm/other", PATH),
        Err(ZcmError::AlreadyManaged { .. })
    ));
    Ok(())
}

#[test]
fn failed_sentinel_write_removes_root() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    backend.fail_next("set");
    assert!(Manager::initialize(backend.clone(), ROOT, PATH).is_err());
    assert!(!backend.exists(ROOT));
    assert!(matches!(
        Manager::open(backend.clone(), PATH),
        Err(ZcmError::NotAZcmRoot(_))
    ));
    Ok(())
}

#[test]
fn dismantle_removes_everything() -> Result<()> {
    let (backend, m) = three_clones_active_two()?;
    m.dismantle()?;
    assert!(!backend.exists(ROOT));
    assert!(backend.snapshots().is_empty());
    assert!(matches!(
        Manager::open(backend.clone(), PATH),
        Err(ZcmError::NotAZcmRoot(p)) if p == Path::new(PATH)
    ));
    Ok(())
}
