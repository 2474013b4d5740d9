use vesper::{Config, GraphDb, GraphError, PropertyValue};

fn db() -> GraphDb {
    GraphDb::with_config(Config::without_gc())
}

/// Commits one vertex carrying `n = value` and returns its gid.
fn seed_vertex(db: &GraphDb, value: i64) -> u64 {
    let n = db.property("n").unwrap();
    let dba = db.access();
    let gid = {
        let mut vertex = dba.insert_vertex().unwrap();
        vertex.props_set(n, PropertyValue::Int(value)).unwrap();
        vertex.gid()
    };
    dba.commit().unwrap();
    gid
}

#[test]
fn snapshot_isolation_hides_overlapping_transactions() {
    let db = db();
    let gid = seed_vertex(&db, 10);
    let n = db.property("n").unwrap();

    let writer = db.access();
    let reader = db.access();
    {
        let mut vertex = writer.find_vertex(gid).unwrap().unwrap();
        vertex.props_set(n, PropertyValue::Int(99)).unwrap();
    }
    {
        // reader began before writer commits: must observe the old value.
        let vertex = reader.find_vertex(gid).unwrap().unwrap();
        assert_eq!(vertex.props_at(n).unwrap(), Some(PropertyValue::Int(10)));
    }
    writer.commit().unwrap();
    {
        // Still the old value: visibility is fixed by the snapshot at begin.
        let vertex = reader.find_vertex(gid).unwrap().unwrap();
        assert_eq!(vertex.props_at(n).unwrap(), Some(PropertyValue::Int(10)));
    }
    reader.commit().unwrap();
}

#[test]
fn uncommitted_creations_stay_private() {
    let db = db();
    let creator = db.access();
    let observer = db.access();
    let gid = {
        let vertex = creator.insert_vertex().unwrap();
        vertex.gid()
    };
    assert!(observer.find_vertex(gid).unwrap().is_none());
    assert_eq!(observer.vertices().count(), 0);
    creator.commit().unwrap();
    // The observer's snapshot predates the commit.
    assert!(observer.find_vertex(gid).unwrap().is_none());
    let late = db.access();
    assert!(late.find_vertex(gid).unwrap().is_some());
}

#[test]
fn read_your_writes_across_commands() {
    let db = db();
    let gid = seed_vertex(&db, 10);
    let value = db.property("value").unwrap();

    let dba = db.access();
    let concurrent = db.access();
    {
        let mut vertex = dba.find_vertex(gid).unwrap().unwrap();
        vertex.props_set(value, PropertyValue::Int(42)).unwrap();
    }
    dba.advance_command().unwrap();
    {
        let vertex = dba.find_vertex(gid).unwrap().unwrap();
        assert_eq!(
            vertex.props_at(value).unwrap(),
            Some(PropertyValue::Int(42))
        );
    }
    {
        // A transaction begun before the commit observes the pre-write state.
        let vertex = concurrent.find_vertex(gid).unwrap().unwrap();
        assert_eq!(vertex.props_at(value).unwrap(), None);
    }
    dba.commit().unwrap();
    {
        let vertex = concurrent.find_vertex(gid).unwrap().unwrap();
        assert_eq!(vertex.props_at(value).unwrap(), None);
    }
}

#[test]
fn commit_visibility_is_monotonic() {
    let db = db();
    let n = db.property("n").unwrap();
    let mut gids = Vec::new();
    for value in 0..5 {
        gids.push(seed_vertex(&db, value));
    }
    // Everything committed before this transaction began is visible.
    let dba = db.access();
    for (index, gid) in gids.iter().enumerate() {
        let vertex = dba.find_vertex(*gid).unwrap().unwrap();
        assert_eq!(
            vertex.props_at(n).unwrap(),
            Some(PropertyValue::Int(index as i64))
        );
    }
    assert_eq!(dba.vertices().count(), 5);
}

#[test]
fn write_skew_makes_one_commit_fail() {
    let db = db();
    let n = db.property("n").unwrap();
    let g1 = seed_vertex(&db, 10);
    let g2 = seed_vertex(&db, 10);

    let t1 = db.access();
    let t2 = db.access();
    {
        // T1 reads v1 and writes v2.
        let v1 = t1.find_vertex(g1).unwrap().unwrap();
        assert_eq!(v1.props_at(n).unwrap(), Some(PropertyValue::Int(10)));
        let mut v2 = t1.find_vertex(g2).unwrap().unwrap();
        v2.props_set(n, PropertyValue::Int(5)).unwrap();
    }
    {
        // T2 reads v2 and writes v1.
        let v2 = t2.find_vertex(g2).unwrap().unwrap();
        assert_eq!(v2.props_at(n).unwrap(), Some(PropertyValue::Int(10)));
        let mut v1 = t2.find_vertex(g1).unwrap().unwrap();
        v1.props_set(n, PropertyValue::Int(5)).unwrap();
    }
    t1.commit().unwrap();
    let err = t2.commit().unwrap_err();
    assert!(matches!(err, GraphError::Serialization(_)));

    // The surviving writes are T1's.
    let check = db.access();
    let v1 = check.find_vertex(g1).unwrap().unwrap();
    let v2 = check.find_vertex(g2).unwrap().unwrap();
    assert_eq!(v1.props_at(n).unwrap(), Some(PropertyValue::Int(10)));
    assert_eq!(v2.props_at(n).unwrap(), Some(PropertyValue::Int(5)));
}

#[test]
fn conflicting_updates_fail_fast_at_the_statement() {
    let db = db();
    let n = db.property("n").unwrap();
    let gid = seed_vertex(&db, 0);

    let first = db.access();
    let second = db.access();
    {
        let mut vertex = first.find_vertex(gid).unwrap().unwrap();
        vertex.props_set(n, PropertyValue::Int(1)).unwrap();
    }
    {
        let mut vertex = second.find_vertex(gid).unwrap().unwrap();
        let err = vertex.props_set(n, PropertyValue::Int(2)).unwrap_err();
        assert!(matches!(err, GraphError::Serialization(_)));
    }
    second.abort();
    first.commit().unwrap();
}

#[test]
fn switching_between_old_and_new_versions() {
    let db = db();
    let gid = seed_vertex(&db, 1);
    let n = db.property("n").unwrap();

    let dba = db.access();
    let mut vertex = dba.find_vertex(gid).unwrap().unwrap();
    vertex.props_set(n, PropertyValue::Int(2)).unwrap();
    // Reads follow the in-progress version by default.
    assert_eq!(vertex.props_at(n).unwrap(), Some(PropertyValue::Int(2)));
    vertex.switch_old();
    assert_eq!(vertex.props_at(n).unwrap(), Some(PropertyValue::Int(1)));
    vertex.switch_new().unwrap();
    assert_eq!(vertex.props_at(n).unwrap(), Some(PropertyValue::Int(2)));
}

#[test]
fn deleted_records_reject_further_writes() {
    let db = db();
    let gid = seed_vertex(&db, 1);
    let n = db.property("n").unwrap();

    let dba = db.access();
    {
        let vertex = dba.find_vertex(gid).unwrap().unwrap();
        assert!(dba.remove_vertex(&vertex).unwrap());
    }
    dba.advance_command().unwrap();
    assert!(dba.find_vertex(gid).unwrap().is_none());
    // Re-resolving through a stale gid and writing must fail.
    let check = db.access();
    {
        let vertex = check.find_vertex(gid).unwrap().unwrap();
        drop(vertex);
    }
    dba.commit().unwrap();

    let late = db.access();
    assert!(late.find_vertex(gid).unwrap().is_none());
    // A transaction that saw the record before the delete can still not
    // write through it once the delete committed.
    let mut vertex = check.find_vertex(gid).unwrap().unwrap();
    let err = vertex.props_set(n, PropertyValue::Int(3)).unwrap_err();
    assert!(matches!(err, GraphError::Serialization(_)));
}

#[test]
fn labels_round_trip_through_the_accessor() {
    let db = db();
    let person = db.label("Person").unwrap();
    let admin = db.label("Admin").unwrap();

    let dba = db.access();
    let gid = {
        let mut vertex = dba.insert_vertex().unwrap();
        assert!(vertex.add_label(person).unwrap());
        assert!(!vertex.add_label(person).unwrap());
        assert!(vertex.add_label(admin).unwrap());
        assert!(vertex.remove_label(admin).unwrap());
        vertex.gid()
    };
    dba.commit().unwrap();

    let dba = db.access();
    let vertex = dba.find_vertex(gid).unwrap().unwrap();
    assert_eq!(vertex.labels().unwrap(), vec![person]);
    assert!(vertex.has_label(person).unwrap());
    assert!(!vertex.has_label(admin).unwrap());
}

#[test]
fn property_erase_is_transactional() {
    let db = db();
    let gid = seed_vertex(&db, 7);
    let n = db.property("n").unwrap();

    let dba = db.access();
    let reader = db.access();
    {
        let mut vertex = dba.find_vertex(gid).unwrap().unwrap();
        assert_eq!(
            vertex.props_erase(n).unwrap(),
            Some(PropertyValue::Int(7))
        );
        assert_eq!(vertex.props_at(n).unwrap(), None);
    }
    dba.commit().unwrap();
    {
        let vertex = reader.find_vertex(gid).unwrap().unwrap();
        assert_eq!(vertex.props_at(n).unwrap(), Some(PropertyValue::Int(7)));
    }
    let late = db.access();
    let vertex = late.find_vertex(gid).unwrap().unwrap();
    assert_eq!(vertex.props_at(n).unwrap(), None);
    assert!(vertex.properties().unwrap().is_empty());
}

#[test]
fn termination_signal_cancels_from_another_thread() {
    let db = db();
    let dba = db.access();
    let signal = dba.transaction().termination_signal();
    let handle = std::thread::spawn(move || signal.terminate());
    handle.join().unwrap();
    assert!(matches!(dba.insert_vertex(), Err(GraphError::Cancelled)));
    let err = dba.commit().unwrap_err();
    assert!(matches!(err, GraphError::Cancelled));
}
